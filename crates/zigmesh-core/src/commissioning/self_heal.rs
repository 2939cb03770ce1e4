// ── Self-heal bookkeeping ──
//
// What triggered a heal, which corrective action it runs, and the
// counters surfaced by `self_heal_stats()`. The retry loop itself lives
// on the engine because it drives the radio.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::Role;
use crate::radio::NetworkSignal;

/// Why a heal started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealReason {
    PanIdConflict,
    SteeringFailure,
}

/// Corrective primitive action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealAction {
    /// Form the network again.
    Reform,
    /// Restart steering.
    Rejoin,
}

impl HealAction {
    /// Coordinators reform on conflicts; everything else rejoins.
    pub const fn for_reason(role: Role, reason: HealReason) -> Self {
        match (role, reason) {
            (Role::Coordinator, HealReason::PanIdConflict) => Self::Reform,
            _ => Self::Rejoin,
        }
    }
}

/// Outcome of the last finished heal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealResult {
    Success,
    Failed,
}

/// A pending heal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealTrigger {
    pub reason: HealReason,
    pub signal: NetworkSignal,
    pub status: i32,
}

/// Self-heal counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfHealStats {
    pub conflicts: u64,
    pub steering_failures: u64,
    pub attempts: u64,
    pub success: u64,
    pub failed: u64,
    /// Triggers that arrived while a heal was running.
    pub suppressed: u64,
    pub guided_fallback_count: u64,
    pub in_progress: bool,
    pub last_reason: Option<HealReason>,
    pub last_signal: Option<NetworkSignal>,
    pub last_status: Option<i32>,
    pub last_backoff_ms: u64,
    pub last_result: Option<HealResult>,
}

impl SelfHealStats {
    pub(crate) fn begin(&mut self, trigger: &HealTrigger) {
        self.in_progress = true;
        self.last_reason = Some(trigger.reason);
        self.last_signal = Some(trigger.signal);
        self.last_status = Some(trigger.status);
    }

    pub(crate) fn finish(&mut self, result: HealResult) {
        self.in_progress = false;
        self.last_result = Some(result);
        match result {
            HealResult::Success => {
                self.success += 1;
                self.last_backoff_ms = 0;
            }
            HealResult::Failed => self.failed += 1,
        }
    }
}
