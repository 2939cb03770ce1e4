// ── Start sequence ──
//
// Resolve the identity plan, pick a channel when the plan asks for it,
// push identity to the stack, start it, and read the runtime identity
// back into the cached profile. Node roles then join a parent with a
// short steering backoff.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::{ChannelRequest, select_channel};
use crate::clock::millis;
use crate::commissioning::{ChannelPlan, IdentityPlan, plan_identity};
use crate::error::{EngineError, RadioResultExt, tolerate_already};
use crate::event::{CommissioningEvent, EngineEvent};
use crate::model::{ChannelMask, MAX_CHANNEL, MIN_CHANNEL, NetworkMode, PanId, ProfileUpdate};
use crate::radio::{EventSink, NetworkSignal, Radio};
use crate::retry::RetryPolicy;

use super::Engine;

/// Parent-join budget for node roles.
const JOIN_RETRY: RetryPolicy = RetryPolicy::new(4, Duration::from_millis(25), Duration::from_millis(400));

/// Status recorded when steering never got going.
const JOIN_TIMEOUT_STATUS: i32 = 116;

impl<R: Radio> Engine<R> {
    /// Start the stack, forming a network (coordinator) or joining one.
    ///
    /// Already-in-state answers from the stack are treated as success,
    /// so calling `start` again during recovery is safe.
    pub async fn start(&mut self, form_network: bool) -> Result<(), EngineError> {
        let now = self.now();
        let role = self.config.role;
        self.commissioning.start_count += 1;
        self.form_network = form_network;
        if form_network {
            self.commissioning.record_form_attempt(now);
        } else if !role.is_node() {
            self.commissioning.record_join_attempt(now);
        }

        let plan = plan_identity(&self.config, &self.profile, form_network);
        self.mode = plan.mode;
        debug!(mode = %plan.mode, channel = ?plan.channel, "identity plan resolved");

        let mask = self.resolve_channel(&plan)?;
        self.apply_identity(&plan, mask)?;

        if let Err(e) = self.boot_stack(form_network) {
            warn!(form_network, error = %e, "stack start failed");
            if form_network {
                self.commissioning.record_form_failure(e.radio_status());
            } else {
                self.commissioning.record_join_failure(e.radio_status());
            }
            return Err(e);
        }

        if role.is_node() {
            self.join_parent().await?;
        }
        self.started = true;

        let formed_at = (form_network && self.profile.formed_at.is_none()).then_some(now);
        self.profile.apply(ProfileUpdate {
            channel_mask: mask,
            pan_id: plan.pan_id,
            extended_pan_id: plan.extended_pan_id,
            source: Some(plan.mode.profile_source()),
            formed_at,
        });
        if plan.mode != NetworkMode::Fixed {
            self.sync_runtime_profile();
        }

        info!(
            role = %role,
            mode = %plan.mode,
            form_network,
            channel_mask = ?mask.map(|m| m.to_string()),
            "stack started"
        );
        Ok(())
    }

    /// Init the stack, hook up callbacks and issue the start primitive.
    fn boot_stack(&mut self, form_network: bool) -> Result<(), EngineError> {
        tolerate_already(self.radio.init(self.config.role).op("init"))?;
        self.radio
            .register_event_sink(EventSink::new(self.radio_tx.clone()));
        tolerate_already(self.radio.start(form_network).op("start"))
    }

    /// Channel mask to push for this start, running the selector when
    /// the plan asks for a fresh pick.
    fn resolve_channel(&mut self, plan: &IdentityPlan) -> Result<Option<ChannelMask>, EngineError> {
        match plan.channel {
            ChannelPlan::Keep => Ok(None),
            ChannelPlan::Use { mask, source } => {
                debug!(channel_mask = %mask, source = %source, "using configured channel mask");
                Ok(Some(mask))
            }
            ChannelPlan::Select { restrict, source } => {
                let wifi = if self.config.auto_channel_scan_wifi && self.caps.wifi_scan {
                    match self.radio.scan_wifi() {
                        Ok(samples) => samples,
                        Err(e) => {
                            warn!(error = %e, "wifi scan failed; using preferred order");
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };
                let decision = select_channel(&ChannelRequest {
                    mask: restrict,
                    preferred: self.config.auto_channel_preferred.clone(),
                    blacklist: self.config.auto_channel_blacklist.clone(),
                    wifi,
                })?;
                info!(
                    channel = decision.selected_channel,
                    strategy = %decision.strategy,
                    wifi_scan_count = decision.wifi_scan_count,
                    source = %source,
                    "channel selected"
                );
                let mask = decision.channel_mask;
                self.last_channel = Some(decision);
                Ok(Some(mask))
            }
        }
    }

    /// Push identity to the stack. `fixed` fails without the setters;
    /// other modes carry on with whatever the stack already has.
    fn apply_identity(&mut self, plan: &IdentityPlan, mask: Option<ChannelMask>) -> Result<(), EngineError> {
        let wants_identity = mask.is_some() || plan.pan_id.is_some() || plan.extended_pan_id.is_some();
        if !wants_identity {
            return Ok(());
        }
        if !self.caps.identity_config {
            if plan.requires_identity_config() {
                return Err(EngineError::unavailable("set_network_identity"));
            }
            debug!(mode = %plan.mode, "stack has no identity setters; leaving identity to the stack");
            return Ok(());
        }

        if let Some(pan_id) = plan.pan_id {
            tolerate_already(self.radio.set_pan_id(pan_id).op("set_pan_id"))?;
        }
        if let Some(ext) = plan.extended_pan_id {
            tolerate_already(self.radio.set_extended_pan_id(ext).op("set_extended_pan_id"))?;
        }
        if let Some(mask) = mask {
            tolerate_already(self.radio.set_channel_mask(mask).op("set_channel_mask"))?;
            self.applied_mask = Some(mask);
        }
        Ok(())
    }

    /// Steer toward a parent with capped backoff. Guided nodes fall
    /// back to the auto-join mask after the first failure.
    async fn join_parent(&mut self) -> Result<(), EngineError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let now = self.now();
            self.commissioning.record_join_attempt(now);
            let result = if self.caps.steering {
                tolerate_already(self.radio.start_steering().op("start_steering"))
            } else {
                tolerate_already(self.radio.start(false).op("start"))
            };

            let err = match result {
                Ok(()) => {
                    debug!(attempt, "steering started");
                    return Ok(());
                }
                Err(e @ EngineError::ProtocolUnavailable { .. }) => return Err(e),
                Err(e) => e,
            };
            warn!(attempt, error = %err, "parent join attempt failed");

            if attempt == 1 && self.mode == NetworkMode::Guided {
                self.apply_guided_fallback();
            }
            if JOIN_RETRY.exhausted(attempt) {
                self.commissioning
                    .on_signal(self.now(), NetworkSignal::Steering, JOIN_TIMEOUT_STATUS);
                return Err(err);
            }
            let backoff = JOIN_RETRY.backoff_after(attempt);
            debug!(attempt, backoff_ms = millis(backoff), "retrying parent join");
            sleep(backoff).await;
        }
    }

    /// Read the runtime identity back and fold any difference into the
    /// cached profile. Returns whether the profile changed.
    pub(crate) fn sync_runtime_profile(&mut self) -> bool {
        if !self.caps.network_runtime {
            return false;
        }
        let runtime = match self.radio.network_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                debug!(error = %e, "runtime snapshot unavailable");
                return false;
            }
        };

        let mut update = ProfileUpdate::default();
        let mut changed = false;

        if let Some(mask) = runtime
            .channel
            .filter(|c| (MIN_CHANNEL..=MAX_CHANNEL).contains(c))
            .and_then(|c| ChannelMask::single(c).ok())
        {
            if self.profile.channel_mask != Some(mask) {
                update.channel_mask = Some(mask);
                changed = true;
            }
        }
        if let Some(pan_id) = runtime.pan_id.and_then(|p| PanId::new(p).ok()) {
            if self.profile.pan_id != Some(pan_id) {
                update.pan_id = Some(pan_id);
                changed = true;
            }
        }
        if let Some(ext) = runtime
            .extended_pan_id
            .filter(|e| e.bytes() != [0; 8] && e.bytes() != [0xFF; 8])
        {
            if self.profile.extended_pan_id != Some(ext) {
                update.extended_pan_id = Some(ext);
                changed = true;
            }
        }
        if runtime.formed && self.profile.formed_at.is_none() {
            update.formed_at = Some(self.now());
            changed = true;
        }
        if !changed {
            return false;
        }

        update.source = Some(self.mode.profile_source());
        self.profile.apply(update);
        info!(channel = ?self.profile.channel(), "network profile synced from runtime");
        self.emit(EngineEvent::Commissioning(CommissioningEvent::ProfileSynced {
            profile: self.profile.clone(),
        }));
        true
    }
}
