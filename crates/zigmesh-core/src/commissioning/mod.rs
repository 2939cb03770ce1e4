// ── Commissioning state machine ──
//
// Form/join counters and timing, updated from start attempts and from
// network signals. Counters only move forward; `reset` is explicit.

pub mod mode;
pub mod self_heal;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{elapsed, millis};
use crate::error::is_timeout_status;
use crate::radio::NetworkSignal;

pub use mode::{ChannelPlan, ChannelSource, IdentityPlan, plan_identity};
pub use self_heal::{HealAction, HealReason, HealResult, HealTrigger, SelfHealStats};

/// Form and join counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommissioningStats {
    pub start_count: u64,
    pub form_attempts: u64,
    pub form_success: u64,
    pub form_failures: u64,
    pub join_attempts: u64,
    pub join_success: u64,
    pub join_failures: u64,
    pub timeout_events: u64,
    pub conflict_events: u64,
    pub form_started_at: Option<DateTime<Utc>>,
    pub join_started_at: Option<DateTime<Utc>>,
    pub last_time_to_form_ms: Option<u64>,
    pub last_time_to_join_ms: Option<u64>,
    pub last_signal: Option<NetworkSignal>,
    pub last_status: Option<i32>,
}

impl CommissioningStats {
    pub fn record_form_attempt(&mut self, now: DateTime<Utc>) {
        self.form_attempts += 1;
        self.form_started_at.get_or_insert(now);
    }

    pub fn record_join_attempt(&mut self, now: DateTime<Utc>) {
        self.join_attempts += 1;
        self.join_started_at.get_or_insert(now);
    }

    pub fn record_form_success(&mut self, now: DateTime<Utc>) {
        self.form_success += 1;
        if let Some(started) = self.form_started_at.take() {
            self.last_time_to_form_ms = Some(millis(elapsed(now, started)));
        }
    }

    /// A failed formation; timeout statuses are counted here only.
    pub fn record_form_failure(&mut self, status: Option<i32>) {
        self.form_failures += 1;
        self.count_timeout(status);
    }

    pub fn record_join_success(&mut self, now: DateTime<Utc>) {
        self.join_success += 1;
        if let Some(started) = self.join_started_at.take() {
            self.last_time_to_join_ms = Some(millis(elapsed(now, started)));
        }
    }

    /// A failed join; timeout statuses are counted here only.
    pub fn record_join_failure(&mut self, status: Option<i32>) {
        self.join_failures += 1;
        self.count_timeout(status);
    }

    fn count_timeout(&mut self, status: Option<i32>) {
        if status.is_some_and(is_timeout_status) {
            self.timeout_events += 1;
        }
    }

    /// Fold one network signal into the counters.
    pub fn on_signal(&mut self, now: DateTime<Utc>, signal: NetworkSignal, status: i32) {
        self.last_signal = Some(signal);
        self.last_status = Some(status);
        match signal {
            NetworkSignal::Formation if status == 0 => self.record_form_success(now),
            NetworkSignal::Formation | NetworkSignal::FormationCancelled => {
                self.record_form_failure(Some(status));
            }
            NetworkSignal::Steering if status == 0 => self.record_join_success(now),
            NetworkSignal::Steering | NetworkSignal::SteeringCancelled => {
                self.record_join_failure(Some(status));
            }
            NetworkSignal::FirstStart | NetworkSignal::Reboot
                if status == 0 && self.join_started_at.is_some() =>
            {
                self.record_join_success(now);
            }
            NetworkSignal::PanIdConflict => self.conflict_events += 1,
            _ => {}
        }
    }
}
