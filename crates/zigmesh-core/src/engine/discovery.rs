// ── Discovery driving ──
//
// Queue requests, process due entries against the radio, upsert the
// registry and run post-discovery automation.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::automation::{self, AutomationPlan};
use crate::clock::millis;
use crate::discovery::{
    DiscoveryOptions, FailureOutcome, ProcessReport, QueueEntry, QueueOutcome, descriptors,
};
use crate::error::{EngineError, RadioResultExt};
use crate::event::EngineEvent;
use crate::model::{DescriptorReport, DiscoveredDevice, ShortAddr};
use crate::radio::Radio;
use crate::store::{DeviceQuery, Upsert};

use super::Engine;

impl<R: Radio> Engine<R> {
    /// Ask for discovery of a remote device. Debounced per address.
    pub fn queue_discovery(&mut self, short_addr: ShortAddr) -> Result<QueueOutcome, EngineError> {
        if !short_addr.is_remote_device() {
            return Err(EngineError::invalid(
                "short_addr",
                format!("{short_addr} is not a remote device address"),
            ));
        }
        let outcome = self.queue.queue(self.now(), short_addr);
        debug!(short_addr = %short_addr, outcome = ?outcome, "discovery requested");
        Ok(outcome)
    }

    /// Pending entries in FIFO order.
    pub fn pending_discovery(&self) -> Vec<QueueEntry> {
        self.queue.pending()
    }

    /// Process up to `max_items` due queue entries.
    pub async fn process_discovery(&mut self, max_items: usize) -> ProcessReport {
        let now = self.now();
        if self.config.opportunistic_last_joined && self.caps.last_joined_hint {
            if let Some(short_addr) = self
                .radio
                .last_joined_short_addr()
                .filter(|s| s.is_remote_device())
                .filter(|s| !self.registry.contains(*s) && !self.queue.contains(*s))
            {
                debug!(short_addr = %short_addr, "queueing last joined device");
                self.queue.queue(now, short_addr);
            }
        }

        let mut report = ProcessReport::default();
        // Queued work keeps partial descriptors; strict mode is for
        // explicit `discover_device` calls.
        let options = DiscoveryOptions {
            strict: false,
            ..DiscoveryOptions::from_config(&self.config, &self.caps)
        };
        for short_addr in self.queue.due(now, max_items) {
            let Some(attempt) = self.queue.begin_attempt(short_addr) else {
                continue;
            };
            report.processed += 1;
            debug!(short_addr = %short_addr, attempt, "discovering device");

            match descriptors::discover(&mut self.radio, short_addr, &options).await {
                Ok(descriptor) => {
                    self.ingest(&descriptor);
                    self.queue.complete_success(short_addr);
                    report.success += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    match self.queue.complete_failure(self.now(), short_addr, e.to_string()) {
                        Some(FailureOutcome::Requeued { attempt, backoff }) => {
                            warn!(
                                short_addr = %short_addr,
                                attempt,
                                backoff_ms = millis(backoff),
                                error = %e,
                                "discovery failed; requeued"
                            );
                        }
                        Some(FailureOutcome::GaveUp { attempt }) => {
                            warn!(short_addr = %short_addr, attempt, error = %e, "discovery abandoned");
                            self.emit(EngineEvent::DiscoveryAbandoned {
                                short_addr,
                                attempt,
                                error: e.to_string(),
                            });
                        }
                        None => {}
                    }
                }
            }
        }
        report.queue_depth = self.queue.len();
        report
    }

    /// Discover one device now, outside the queue.
    pub async fn discover_device(
        &mut self,
        short_addr: ShortAddr,
        endpoints: Option<Vec<u8>>,
        strict: Option<bool>,
    ) -> Result<DiscoveredDevice, EngineError> {
        if !short_addr.is_remote_device() {
            return Err(EngineError::invalid(
                "short_addr",
                format!("{short_addr} is not a remote device address"),
            ));
        }
        let mut options = DiscoveryOptions::from_config(&self.config, &self.caps);
        options.endpoints = endpoints;
        if let Some(strict) = strict {
            options.strict = strict;
        }
        let descriptor = descriptors::discover(&mut self.radio, short_addr, &options).await?;
        self.ingest(&descriptor);
        self.queue.remove(short_addr);
        self.registry
            .get(short_addr)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("device {short_addr}")))
    }

    /// Open the network for joins for `duration_s` seconds.
    pub fn permit_join(&mut self, duration_s: u8) -> Result<(), EngineError> {
        if !self.caps.permit_join {
            return Err(EngineError::unavailable("permit_join"));
        }
        self.radio.permit_join(duration_s).op("permit_join")?;
        info!(duration_s, "permit join opened");
        Ok(())
    }

    /// Keep processing discovery until a device matches `query`.
    pub async fn wait_for_device(
        &mut self,
        query: &DeviceQuery,
        timeout: Duration,
        poll: Duration,
        batch: usize,
    ) -> Result<DiscoveredDevice, EngineError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if let Some(device) = self.find_devices(query).into_iter().next() {
                return Ok(device.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout {
                    step: "matching device".into(),
                    waited_ms: millis(now - started),
                });
            }
            self.drain_events().await;
            self.process_discovery(batch).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(poll.min(remaining)).await;
        }
    }

    /// Turn a descriptor report into a registry entry, notify and run
    /// automation.
    fn ingest(&mut self, descriptor: &DescriptorReport) {
        let now = self.now();
        let short_addr = descriptor.short_addr;
        let device = DiscoveredDevice::from_report(descriptor, self.config.state_policy(), now);
        let ieee_addr = device.ieee_addr();
        let upsert = self.registry.upsert(device);

        let endpoints = self
            .registry
            .get(short_addr)
            .map(DiscoveredDevice::endpoints)
            .unwrap_or_default();
        match upsert {
            Upsert::Added => {
                info!(short_addr = %short_addr, endpoints = ?endpoints, "device added");
                self.emit(EngineEvent::DeviceAdded {
                    short_addr,
                    ieee_addr,
                });
            }
            Upsert::Updated => {
                info!(short_addr = %short_addr, "device rediscovered");
                self.emit(EngineEvent::DeviceUpdated {
                    short_addr,
                    ieee_addr,
                });
            }
            Upsert::Readdressed { previous } => {
                info!(short_addr = %short_addr, previous = %previous, "device changed short address");
                self.emit(EngineEvent::DeviceUpdated {
                    short_addr,
                    ieee_addr,
                });
            }
        }

        if !(self.config.auto_configure_reporting || self.config.auto_bind) {
            return;
        }
        let plan = AutomationPlan {
            configure_reporting: self.config.auto_configure_reporting,
            bind: self.config.auto_bind,
            local_ieee: self.radio.ieee_addr().ok(),
            local_endpoint: self.config.local_endpoint,
        };
        if let Some(device) = self.registry.get(short_addr) {
            automation::run(&mut self.radio, &self.caps, device, &plan, &mut self.automation);
        }
    }
}
