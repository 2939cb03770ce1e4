//! Configuration files for zigmesh tools.
//!
//! A TOML file under the platform config directory, overlaid with
//! `ZIGMESH_`-prefixed environment variables, translated into
//! `zigmesh_core::EngineConfig`. Durations are written as milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zigmesh_core::config::DEFAULT_PREFERRED_CHANNELS;
use zigmesh_core::{
    ChannelMask, EngineConfig, EngineError, ExtendedPanId, NetworkMode, PanId, Role,
    SelfHealPolicy, StaleReadPolicy,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<EngineError> for ConfigError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidRange { field, reason } => Self::Validation { field, reason },
            other => Self::Validation {
                field: "engine".into(),
                reason: other.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// CLI presentation defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Discovery, state cache and automation knobs.
    #[serde(default)]
    pub engine: EngineSection,

    /// Network identity and channel planning.
    #[serde(default)]
    pub network: NetworkSection,

    /// Unset fields fall back to the role's self-heal defaults.
    #[serde(default)]
    pub self_heal: SelfHealSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct EngineSection {
    pub role: Role,
    pub max_devices: usize,
    pub strict_discovery: bool,
    pub discover_timeout_ms: u64,
    pub discover_poll_ms: u64,
    pub include_power_desc: bool,
    pub include_green_power: bool,
    pub fallback_without_power_desc: bool,
    pub opportunistic_last_joined: bool,
    pub auto_discovery: bool,
    pub state_ttl_ms: u64,
    pub stale_read_policy: StaleReadPolicy,
    pub state_cache_max: usize,
    pub offline_after_ms: u64,
    pub join_debounce_ms: u64,
    pub discovery_retry_max: u32,
    pub discovery_retry_base_ms: u64,
    pub discovery_retry_max_backoff_ms: u64,
    pub discovery_queue_max: usize,
    pub auto_bind: bool,
    pub auto_configure_reporting: bool,
    pub local_endpoint: u8,
    pub persistence_path: Option<PathBuf>,
    pub persistence_min_interval_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            role: d.role,
            max_devices: d.max_devices,
            strict_discovery: d.strict_discovery,
            discover_timeout_ms: millis(d.discover_timeout),
            discover_poll_ms: millis(d.discover_poll),
            include_power_desc: d.include_power_desc,
            include_green_power: d.include_green_power,
            fallback_without_power_desc: d.fallback_without_power_desc,
            opportunistic_last_joined: d.opportunistic_last_joined,
            auto_discovery: d.auto_discovery,
            state_ttl_ms: millis(d.state_ttl),
            stale_read_policy: d.stale_read_policy,
            state_cache_max: d.state_cache_max,
            offline_after_ms: millis(d.offline_after),
            join_debounce_ms: millis(d.join_debounce),
            discovery_retry_max: d.discovery_retry_max,
            discovery_retry_base_ms: millis(d.discovery_retry_base),
            discovery_retry_max_backoff_ms: millis(d.discovery_retry_max_backoff),
            discovery_queue_max: d.discovery_queue_max,
            auto_bind: d.auto_bind,
            auto_configure_reporting: d.auto_configure_reporting,
            local_endpoint: d.local_endpoint,
            persistence_path: d.persistence_path,
            persistence_min_interval_ms: millis(d.persistence_min_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkSection {
    pub mode: NetworkMode,

    /// Hex PAN id, e.g. "0x1A62".
    pub pan_id: Option<String>,

    /// 16 hex digits, colons allowed.
    pub extended_pan_id: Option<String>,

    /// Pinned formation/join channels.
    pub channels: Option<Vec<u8>>,

    /// Candidate channels for automatic selection.
    pub auto_channels: Option<Vec<u8>>,

    pub preferred_channels: Vec<u8>,
    pub blacklist: Vec<u8>,
    pub scan_wifi: bool,

    /// Channels a router or end device joins on in guided mode.
    pub join_channels: Option<Vec<u8>>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Auto,
            pan_id: None,
            extended_pan_id: None,
            channels: None,
            auto_channels: None,
            preferred_channels: DEFAULT_PREFERRED_CHANNELS.to_vec(),
            blacklist: Vec::new(),
            scan_wifi: true,
            join_channels: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SelfHealSection {
    pub enabled: Option<bool>,
    pub retry_max: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub retry_max_backoff_ms: Option<u64>,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn mask(channels: Option<&Vec<u8>>) -> Result<Option<ChannelMask>, ConfigError> {
    channels
        .map(|list| ChannelMask::from_channels(list.iter().copied()))
        .transpose()
        .map_err(ConfigError::from)
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build a normalized `EngineConfig`. Numeric knobs are clamped by the
    /// engine; malformed identity input is rejected here.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let e = &self.engine;
        let n = &self.network;

        let pan_id = n.pan_id.as_deref().map(str::parse::<PanId>).transpose()?;
        let extended_pan_id = n
            .extended_pan_id
            .as_deref()
            .map(str::parse::<ExtendedPanId>)
            .transpose()?;

        let base = SelfHealPolicy::for_role(e.role);
        let self_heal = SelfHealPolicy {
            enabled: self.self_heal.enabled.unwrap_or(base.enabled),
            retry_max: self.self_heal.retry_max.unwrap_or(base.retry_max),
            retry_base: self
                .self_heal
                .retry_base_ms
                .map_or(base.retry_base, Duration::from_millis),
            retry_max_backoff: self
                .self_heal
                .retry_max_backoff_ms
                .map_or(base.retry_max_backoff, Duration::from_millis),
        };

        let config = EngineConfig {
            role: e.role,
            max_devices: e.max_devices,
            strict_discovery: e.strict_discovery,
            discover_timeout: Duration::from_millis(e.discover_timeout_ms),
            discover_poll: Duration::from_millis(e.discover_poll_ms),
            include_power_desc: e.include_power_desc,
            include_green_power: e.include_green_power,
            fallback_without_power_desc: e.fallback_without_power_desc,
            opportunistic_last_joined: e.opportunistic_last_joined,
            auto_discovery: e.auto_discovery,
            state_ttl: Duration::from_millis(e.state_ttl_ms),
            stale_read_policy: e.stale_read_policy,
            state_cache_max: e.state_cache_max,
            offline_after: Duration::from_millis(e.offline_after_ms),
            join_debounce: Duration::from_millis(e.join_debounce_ms),
            discovery_retry_max: e.discovery_retry_max,
            discovery_retry_base: Duration::from_millis(e.discovery_retry_base_ms),
            discovery_retry_max_backoff: Duration::from_millis(e.discovery_retry_max_backoff_ms),
            discovery_queue_max: e.discovery_queue_max,
            auto_bind: e.auto_bind,
            auto_configure_reporting: e.auto_configure_reporting,
            local_endpoint: e.local_endpoint,
            persistence_path: e.persistence_path.clone(),
            persistence_min_interval: Duration::from_millis(e.persistence_min_interval_ms),
            network_mode: n.mode,
            pan_id,
            extended_pan_id,
            channel_mask: mask(n.channels.as_ref())?,
            auto_channel_mask: mask(n.auto_channels.as_ref())?,
            auto_channel_preferred: n.preferred_channels.clone(),
            auto_channel_blacklist: n.blacklist.clone(),
            auto_channel_scan_wifi: n.scan_wifi,
            auto_join_channel_mask: mask(n.join_channels.as_ref())?.unwrap_or(ChannelMask::ALL),
            self_heal,
        };
        Ok(config.normalized()?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "zigmesh").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("zigmesh");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the file at `path`, then `ZIGMESH_SECTION__KEY` env vars.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ZIGMESH_").split("__"))
}

/// Load the config from an explicit file (missing file means defaults).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment_for(path).extract()?;
    Ok(config)
}

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parents.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}
