// ── Runtime engine configuration ──
//
// Every tuning knob of the engine. Core never reads config files: the
// CLI (via `zigmesh-config`) or an embedding application constructs an
// `EngineConfig` and hands it in. `normalized()` clamps numeric knobs
// into range and rejects malformed identity input.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{
    ChannelMask, ExtendedPanId, NetworkMode, PanId, Role, StaleReadPolicy, StatePolicy,
    duration_ms, normalize_channel_list,
};
use crate::retry::RetryPolicy;

const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Channels tried first when nothing else decides, in order.
pub const DEFAULT_PREFERRED_CHANNELS: [u8; 16] =
    [15, 20, 25, 11, 14, 19, 24, 12, 13, 16, 17, 18, 21, 22, 23, 26];

// ── Self-heal policy ────────────────────────────────────────────────

/// Bounded corrective retry after a failure signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfHealPolicy {
    pub enabled: bool,
    pub retry_max: u32,
    #[serde(with = "duration_ms")]
    pub retry_base: Duration,
    #[serde(with = "duration_ms")]
    pub retry_max_backoff: Duration,
}

impl SelfHealPolicy {
    pub fn for_role(role: Role) -> Self {
        Self {
            enabled: true,
            retry_max: 2,
            retry_base: ms(100),
            retry_max_backoff: if role.is_node() { ms(1000) } else { ms(2000) },
        }
    }

    pub fn normalized(self) -> Self {
        let retry_base = self.retry_base.min(ms(60_000));
        Self {
            enabled: self.enabled,
            retry_max: self.retry_max.min(10),
            retry_base,
            retry_max_backoff: self.retry_max_backoff.clamp(retry_base, ms(300_000)),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max, self.retry_base, self.retry_max_backoff)
    }
}

impl Default for SelfHealPolicy {
    fn default() -> Self {
        Self::for_role(Role::Coordinator)
    }
}

// ── EngineConfig ────────────────────────────────────────────────────

/// Engine tuning and network identity inputs.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct EngineConfig {
    pub role: Role,
    pub max_devices: usize,

    // Descriptor discovery
    pub strict_discovery: bool,
    pub discover_timeout: Duration,
    pub discover_poll: Duration,
    pub include_power_desc: bool,
    pub include_green_power: bool,
    pub fallback_without_power_desc: bool,
    pub opportunistic_last_joined: bool,
    pub auto_discovery: bool,

    // State cache
    pub state_ttl: Duration,
    pub stale_read_policy: StaleReadPolicy,
    pub state_cache_max: usize,
    pub offline_after: Duration,

    // Discovery queue
    pub join_debounce: Duration,
    pub discovery_retry_max: u32,
    pub discovery_retry_base: Duration,
    pub discovery_retry_max_backoff: Duration,
    pub discovery_queue_max: usize,

    // Post-discovery automation
    pub auto_bind: bool,
    pub auto_configure_reporting: bool,
    pub local_endpoint: u8,

    // Persistence
    pub persistence_path: Option<PathBuf>,
    pub persistence_min_interval: Duration,

    // Network identity
    pub network_mode: NetworkMode,
    pub pan_id: Option<PanId>,
    pub extended_pan_id: Option<ExtendedPanId>,
    pub channel_mask: Option<ChannelMask>,
    pub auto_channel_mask: Option<ChannelMask>,
    pub auto_channel_preferred: Vec<u8>,
    pub auto_channel_blacklist: Vec<u8>,
    pub auto_channel_scan_wifi: bool,
    pub auto_join_channel_mask: ChannelMask,

    pub self_heal: SelfHealPolicy,
}

impl EngineConfig {
    /// Defaults for a role; node roles get the shorter self-heal cap.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            self_heal: SelfHealPolicy::for_role(role),
            ..Self::default()
        }
    }

    /// Clamp every numeric knob and validate the channel lists.
    pub fn normalized(mut self) -> Result<Self, EngineError> {
        self.max_devices = self.max_devices.max(1);
        self.discover_poll = self.discover_poll.clamp(ms(50), ms(10_000));
        self.discover_timeout = self
            .discover_timeout
            .clamp(ms(500), ms(120_000))
            .max(self.discover_poll * 2);
        self.state_ttl = self.state_ttl.min(StatePolicy::TTL_MAX);
        self.state_cache_max = self
            .state_cache_max
            .clamp(StatePolicy::MAX_ENTRIES_MIN, StatePolicy::MAX_ENTRIES_MAX);
        self.offline_after = self.offline_after.min(ms(86_400_000));
        self.join_debounce = self.join_debounce.min(ms(60_000));
        self.discovery_retry_max = self.discovery_retry_max.min(10);
        self.discovery_retry_base = self.discovery_retry_base.clamp(ms(50), ms(60_000));
        self.discovery_retry_max_backoff = self
            .discovery_retry_max_backoff
            .clamp(self.discovery_retry_base, ms(300_000));
        self.discovery_queue_max = self.discovery_queue_max.clamp(1, 128);
        self.local_endpoint = self.local_endpoint.clamp(1, 240);
        self.persistence_min_interval = self.persistence_min_interval.min(ms(86_400_000));
        self.auto_channel_preferred =
            normalize_channel_list("auto_channel_preferred", &self.auto_channel_preferred)?;
        self.auto_channel_blacklist =
            normalize_channel_list("auto_channel_blacklist", &self.auto_channel_blacklist)?;
        self.self_heal = self.self_heal.normalized();
        Ok(self)
    }

    /// Mode actually used on start. Explicit identity in `auto` implies
    /// `fixed`; `guided` is left alone.
    pub fn effective_mode(&self) -> NetworkMode {
        let explicit =
            self.pan_id.is_some() || self.extended_pan_id.is_some() || self.channel_mask.is_some();
        match self.network_mode {
            NetworkMode::Auto if explicit => NetworkMode::Fixed,
            mode => mode,
        }
    }

    pub fn state_policy(&self) -> StatePolicy {
        StatePolicy {
            ttl: self.state_ttl,
            stale_read_policy: self.stale_read_policy,
            max_entries: self.state_cache_max,
        }
        .normalized()
    }

    pub fn discovery_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.discovery_retry_max,
            self.discovery_retry_base,
            self.discovery_retry_max_backoff,
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let state = StatePolicy::default();
        Self {
            role: Role::Coordinator,
            max_devices: 32,
            strict_discovery: false,
            discover_timeout: ms(5000),
            discover_poll: ms(200),
            include_power_desc: true,
            include_green_power: false,
            fallback_without_power_desc: true,
            opportunistic_last_joined: true,
            auto_discovery: true,
            state_ttl: state.ttl,
            stale_read_policy: state.stale_read_policy,
            state_cache_max: state.max_entries,
            offline_after: ms(300_000),
            join_debounce: ms(3000),
            discovery_retry_max: 3,
            discovery_retry_base: ms(400),
            discovery_retry_max_backoff: ms(5000),
            discovery_queue_max: 16,
            auto_bind: false,
            auto_configure_reporting: false,
            local_endpoint: 1,
            persistence_path: None,
            persistence_min_interval: ms(30_000),
            network_mode: NetworkMode::Auto,
            pan_id: None,
            extended_pan_id: None,
            channel_mask: None,
            auto_channel_mask: None,
            auto_channel_preferred: DEFAULT_PREFERRED_CHANNELS.to_vec(),
            auto_channel_blacklist: Vec::new(),
            auto_channel_scan_wifi: true,
            auto_join_channel_mask: ChannelMask::ALL,
            self_heal: SelfHealPolicy::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn knobs_are_clamped_not_rejected() {
        let config = EngineConfig {
            discover_poll: ms(10),
            discover_timeout: ms(10),
            discovery_queue_max: 0,
            discovery_retry_max: 99,
            discovery_retry_base: ms(1000),
            discovery_retry_max_backoff: ms(10),
            state_cache_max: 1,
            local_endpoint: 0,
            ..EngineConfig::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(config.discover_poll, ms(50));
        assert_eq!(config.discover_timeout, ms(500));
        assert_eq!(config.discovery_queue_max, 1);
        assert_eq!(config.discovery_retry_max, 10);
        assert_eq!(config.discovery_retry_max_backoff, ms(1000));
        assert_eq!(config.state_cache_max, 8);
        assert_eq!(config.local_endpoint, 1);
    }

    #[test]
    fn timeout_is_at_least_two_polls() {
        let config = EngineConfig {
            discover_poll: ms(5000),
            discover_timeout: ms(600),
            ..EngineConfig::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(config.discover_timeout, ms(10_000));
    }

    #[test]
    fn bad_channel_lists_are_rejected() {
        let config = EngineConfig {
            auto_channel_blacklist: vec![10],
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.normalized(),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn explicit_identity_upgrades_auto_only() {
        let mut config = EngineConfig {
            pan_id: Some(PanId::new(0x1A62).unwrap()),
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_mode(), NetworkMode::Fixed);
        config.network_mode = NetworkMode::Guided;
        assert_eq!(config.effective_mode(), NetworkMode::Guided);
    }

    #[test]
    fn node_roles_use_shorter_self_heal_cap() {
        assert_eq!(EngineConfig::for_role(Role::Router).self_heal.retry_max_backoff, ms(1000));
        assert_eq!(EngineConfig::default().self_heal.retry_max_backoff, ms(2000));
    }
}
