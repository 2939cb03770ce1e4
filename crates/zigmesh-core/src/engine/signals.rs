// ── Signal routing and self-heal ──
//
// Network signals update commissioning counters, queue joined devices
// and may trigger a heal run. Attribute reports are folded into the
// device state cache. A heal run is guarded by `in_progress`; triggers
// that arrive while it runs are counted as suppressed.

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clock::millis;
use crate::commissioning::{HealAction, HealReason, HealResult, HealTrigger};
use crate::error::{EngineError, RadioResultExt, tolerate_already};
use crate::event::{CommissioningEvent, EngineEvent};
use crate::model::{NetworkMode, StateSource};
use crate::radio::{AttributeEvent, NetworkSignal, Radio, RadioEvent, SignalEvent};
use crate::store::StateWrite;

use super::Engine;

/// Async work a callback asks for once the sync bookkeeping is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Followup {
    None,
    SelfHeal(HealTrigger),
    ProcessDiscovery,
}

impl<R: Radio> Engine<R> {
    /// Apply one radio callback, running any heal or discovery it
    /// triggers.
    pub async fn handle_event(&mut self, event: RadioEvent) {
        match self.dispatch(event) {
            Followup::None => {}
            Followup::SelfHeal(trigger) => self.run_self_heal(trigger).await,
            Followup::ProcessDiscovery => {
                self.process_discovery(1).await;
            }
        }
    }

    pub(crate) fn dispatch(&mut self, event: RadioEvent) -> Followup {
        match event {
            RadioEvent::Signal(signal) => self.on_signal(signal),
            RadioEvent::Attribute(report) => {
                self.on_attribute(report);
                Followup::None
            }
        }
    }

    // ── Signals ─────────────────────────────────────────────────────

    fn on_signal(&mut self, event: SignalEvent) -> Followup {
        let SignalEvent { signal, status } = event;
        let now = self.now();
        let role = self.config.role;
        let ok = status == 0;
        debug!(signal = ?signal, status, "network signal");

        self.commissioning.on_signal(now, signal, status);

        if ok && signal.is_profile_sync(role) {
            self.sync_runtime_profile();
        }

        if signal == NetworkSignal::PanIdConflict {
            self.self_heal.conflicts += 1;
            warn!(status, "PAN ID conflict detected");
            self.emit(EngineEvent::Commissioning(
                CommissioningEvent::PanIdConflictDetected { status },
            ));
            return Followup::SelfHeal(HealTrigger {
                reason: HealReason::PanIdConflict,
                signal,
                status,
            });
        }

        if !ok && signal.is_steering_failure(role) {
            self.self_heal.steering_failures += 1;
            return Followup::SelfHeal(HealTrigger {
                reason: HealReason::SteeringFailure,
                signal,
                status,
            });
        }

        if ok && signal.is_join() && self.config.auto_discovery && self.caps.last_joined_hint {
            if let Some(short_addr) = self
                .radio
                .last_joined_short_addr()
                .filter(|s| s.is_remote_device())
            {
                let outcome = self.queue.queue(now, short_addr);
                debug!(short_addr = %short_addr, outcome = ?outcome, "join signal queued discovery");
                return Followup::ProcessDiscovery;
            }
        }

        Followup::None
    }

    // ── Attribute reports ───────────────────────────────────────────

    fn on_attribute(&mut self, report: AttributeEvent) {
        if report.status != 0 {
            debug!(
                cluster = report.cluster,
                attr = report.attr,
                status = report.status,
                "ignoring failed attribute report"
            );
            return;
        }
        let now = self.now();
        let write = StateWrite::new(
            Some(report.endpoint),
            report.cluster,
            report.attr,
            report.value,
            StateSource::Attribute,
        )
        .authoritative(true)
        .attributed(report.source_short_addr, Some(report.endpoint))
        .attr_type(report.attr_type);

        match report.source_short_addr {
            Some(short_addr) => {
                let Some(device) = self.registry.get_mut(short_addr) else {
                    debug!(short_addr = %short_addr, "attribute report from unknown device");
                    return;
                };
                if device.endpoints_for(report.cluster).contains(&report.endpoint) {
                    device.write_state(now, write);
                } else {
                    debug!(
                        short_addr = %short_addr,
                        endpoint = report.endpoint,
                        cluster = report.cluster,
                        "attribute report for unmapped endpoint"
                    );
                }
            }
            // Unattributed: every device exposing the cluster on that
            // endpoint takes the value.
            None => {
                for device in self.registry.iter_mut() {
                    if device.endpoints_for(report.cluster).contains(&report.endpoint) {
                        device.write_state(now, write.clone());
                    }
                }
            }
        }
    }

    // ── Self-heal ───────────────────────────────────────────────────

    pub(crate) async fn run_self_heal(&mut self, trigger: HealTrigger) {
        let policy = self.config.self_heal;
        if !policy.enabled || !self.started {
            debug!(reason = %trigger.reason, "self-heal skipped");
            return;
        }
        if self.self_heal.in_progress {
            self.suppress(trigger);
            return;
        }

        self.self_heal.begin(&trigger);
        let action = HealAction::for_reason(self.config.role, trigger.reason);
        let retry = policy.retry();
        info!(reason = %trigger.reason, action = %action, status = trigger.status, "self-heal started");

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            self.self_heal.attempts += 1;
            let outcome = self.heal_once(action);
            self.emit(EngineEvent::Commissioning(CommissioningEvent::SelfHealRetry {
                reason: trigger.reason,
                action,
                attempt,
                ok: outcome.is_ok(),
                error: outcome.as_ref().err().map(ToString::to_string),
            }));
            self.drain_nested().await;

            match outcome {
                Ok(()) => {
                    info!(reason = %trigger.reason, attempt, "self-heal succeeded");
                    break HealResult::Success;
                }
                Err(e) => {
                    warn!(reason = %trigger.reason, attempt, error = %e, "self-heal attempt failed");
                }
            }

            if attempt == 1 && self.config.role.is_node() && self.mode == NetworkMode::Guided {
                self.apply_guided_fallback();
            }

            if retry.exhausted(attempt) {
                warn!(reason = %trigger.reason, attempts = attempt, "self-heal retries exhausted");
                self.emit(EngineEvent::Commissioning(CommissioningEvent::SelfHealExhausted {
                    reason: trigger.reason,
                    attempts: attempt,
                }));
                break HealResult::Failed;
            }

            let backoff = retry.backoff_after(attempt);
            self.self_heal.last_backoff_ms = millis(backoff);
            debug!(attempt, backoff_ms = millis(backoff), "self-heal backing off");
            sleep(backoff).await;
            self.drain_nested().await;
        };

        self.self_heal.finish(result);
    }

    /// One corrective primitive call. Already-in-state counts as done.
    fn heal_once(&mut self, action: HealAction) -> Result<(), EngineError> {
        let now = self.now();
        match action {
            HealAction::Reform => {
                self.commissioning.record_form_attempt(now);
                let result = tolerate_already(self.radio.start(true).op("start"));
                if let Err(e) = &result {
                    self.commissioning.record_form_failure(e.radio_status());
                }
                result
            }
            HealAction::Rejoin => {
                self.commissioning.record_join_attempt(now);
                let result = if self.caps.steering {
                    tolerate_already(self.radio.start_steering().op("start_steering"))
                } else {
                    tolerate_already(self.radio.start(false).op("start"))
                };
                if let Err(e) = &result {
                    self.commissioning.record_join_failure(e.radio_status());
                }
                result
            }
        }
    }

    /// Apply callbacks that arrived during a heal. Further heal
    /// triggers are only counted.
    async fn drain_nested(&mut self) {
        while let Ok(event) = self.radio_rx.try_recv() {
            match self.dispatch(event) {
                Followup::None => {}
                Followup::SelfHeal(trigger) => self.suppress(trigger),
                Followup::ProcessDiscovery => {
                    self.process_discovery(1).await;
                }
            }
        }
    }

    fn suppress(&mut self, trigger: HealTrigger) {
        self.self_heal.suppressed += 1;
        warn!(reason = %trigger.reason, status = trigger.status, "self-heal already running; trigger suppressed");
        self.emit(EngineEvent::Commissioning(CommissioningEvent::SelfHealSuppressed {
            reason: trigger.reason,
        }));
    }

    /// Guided nodes drop a stale learned channel for the broad join
    /// mask, once.
    pub(crate) fn apply_guided_fallback(&mut self) {
        let mask = self.config.auto_join_channel_mask;
        if self.applied_mask == Some(mask) {
            return;
        }
        if self.caps.identity_config {
            if let Err(e) = tolerate_already(self.radio.set_channel_mask(mask).op("set_channel_mask")) {
                warn!(error = %e, "guided fallback could not apply join mask");
                return;
            }
        }
        self.applied_mask = Some(mask);
        self.self_heal.guided_fallback_count += 1;
        info!(channel_mask = %mask, "guided node fell back to the auto-join mask");
        self.emit(EngineEvent::Commissioning(CommissioningEvent::GuidedFallback {
            channel_mask: mask,
        }));
    }
}

