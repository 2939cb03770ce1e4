// ── Discovered device model ──
//
// One real mesh peer: identity learned from descriptors, the derived
// cluster/feature indices, and the attribute state cache. Cache
// operations live in `store::state_cache`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::addr::{IeeeAddr, ShortAddr};
use super::cluster::Feature;
use super::value::AttrValue;
use crate::error::EngineError;

// ── Descriptors ─────────────────────────────────────────────────────

/// Node descriptor fields the engine keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// 0 = coordinator, 1 = router, 2 = end device.
    pub logical_type: u8,
    pub manufacturer_code: u16,
    pub mac_capabilities: u8,
    pub max_buffer_size: u8,
}

/// Power descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerDescriptor {
    pub current_power_mode: u8,
    pub available_power_sources: u8,
    pub current_power_source: u8,
    pub current_power_source_level: u8,
}

/// Simple descriptor of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub endpoint: u8,
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
    pub input_clusters: Vec<u16>,
    pub output_clusters: Vec<u16>,
}

/// Everything one descriptor-discovery pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorReport {
    pub short_addr: ShortAddr,
    pub ieee_addr: Option<IeeeAddr>,
    pub node: Option<NodeDescriptor>,
    pub power: Option<PowerDescriptor>,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Per-field failures recorded in non-strict mode.
    pub errors: Vec<String>,
}

impl DescriptorReport {
    /// Empty report for `short_addr`.
    pub fn new(short_addr: ShortAddr) -> Self {
        Self {
            short_addr,
            ieee_addr: None,
            node: None,
            power: None,
            endpoints: Vec::new(),
            errors: Vec::new(),
        }
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// Per-endpoint application identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointIdentity {
    pub profile_id: u16,
    pub device_id: u16,
    pub device_version: u8,
}

/// Identity snapshot, immutable until the device is rediscovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub ieee_addr: Option<IeeeAddr>,
    pub manufacturer_code: Option<u16>,
    pub logical_type: Option<u8>,
    #[serde(default)]
    pub endpoints: BTreeMap<u8, EndpointIdentity>,
    pub power_source: Option<u8>,
    pub power_source_level: Option<u8>,
    #[serde(default)]
    pub discovery_errors: Vec<String>,
}

impl DeviceIdentity {
    /// Lowest endpoint; its profile/device ids describe the device.
    pub fn primary_endpoint(&self) -> Option<u8> {
        self.endpoints.keys().next().copied()
    }

    pub fn profile_id(&self) -> Option<u16> {
        self.primary().map(|e| e.profile_id)
    }

    pub fn device_id(&self) -> Option<u16> {
        self.primary().map(|e| e.device_id)
    }

    fn primary(&self) -> Option<&EndpointIdentity> {
        self.endpoints.values().next()
    }
}

/// Input and output clusters of one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointClusters {
    pub input: Vec<u16>,
    pub output: Vec<u16>,
}

// ── State cache types ───────────────────────────────────────────────

/// How a cached value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateSource {
    Discovery,
    Attribute,
    Control,
    Read,
}

/// What a non-stale read does with an entry older than the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StaleReadPolicy {
    /// Return the cached value regardless of age.
    #[default]
    Allow,
    /// Treat an expired entry as absent.
    Refresh,
    /// Fail with `StaleState`.
    Raise,
}

/// Cache tuning carried by every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePolicy {
    /// Zero means "never stale".
    #[serde(with = "crate::model::duration_ms")]
    pub ttl: Duration,
    pub stale_read_policy: StaleReadPolicy,
    pub max_entries: usize,
}

impl StatePolicy {
    pub const TTL_MAX: Duration = Duration::from_millis(86_400_000);
    pub const MAX_ENTRIES_MIN: usize = 8;
    pub const MAX_ENTRIES_MAX: usize = 512;

    /// Clamp every knob into its accepted range.
    pub fn normalized(self) -> Self {
        Self {
            ttl: self.ttl.min(Self::TTL_MAX),
            stale_read_policy: self.stale_read_policy,
            max_entries: self
                .max_entries
                .clamp(Self::MAX_ENTRIES_MIN, Self::MAX_ENTRIES_MAX),
        }
    }
}

impl Default for StatePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(120_000),
            stale_read_policy: StaleReadPolicy::Allow,
            max_entries: 64,
        }
    }
}

/// Aggregate cache key (default endpoint only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub cluster: u16,
    pub attr: u16,
}

/// Full-fidelity cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointStateKey {
    pub endpoint: u8,
    pub cluster: u16,
    pub attr: u16,
}

impl EndpointStateKey {
    pub const fn state_key(self) -> StateKey {
        StateKey {
            cluster: self.cluster,
            attr: self.attr,
        }
    }
}

/// Metadata stored next to every cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMeta {
    pub updated_at: DateTime<Utc>,
    pub source: StateSource,
    pub authoritative: bool,
    pub endpoint: Option<u8>,
    pub source_short_addr: Option<ShortAddr>,
    pub source_endpoint: Option<u8>,
    pub attr_type: Option<u8>,
}

/// Cached value plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: AttrValue,
    pub meta: StateMeta,
}

/// Metadata view returned by `state_info`, with the computed staleness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    #[serde(flatten)]
    pub meta: StateMeta,
    pub stale: bool,
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Online/offline tracking fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub last_seen: DateTime<Utc>,
    pub last_seen_source: Option<String>,
    pub forced_offline: bool,
    pub offline_reason: Option<String>,
    pub offline_set_at: Option<DateTime<Utc>>,
}

/// Lifecycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    pub short_addr: ShortAddr,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub last_seen_age_ms: u64,
    pub last_seen_source: Option<String>,
    pub forced_offline: bool,
    pub offline_reason: Option<String>,
    pub offline_set_at: Option<DateTime<Utc>>,
}

// ── DiscoveredDevice ────────────────────────────────────────────────

/// One mesh peer known to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub short_addr: ShortAddr,
    pub identity: DeviceIdentity,
    pub endpoint_clusters: BTreeMap<u8, EndpointClusters>,
    pub(crate) cluster_to_endpoints: BTreeMap<u16, Vec<u8>>,
    pub(crate) feature_to_endpoints: BTreeMap<Feature, Vec<u8>>,
    pub(crate) state: BTreeMap<StateKey, StateEntry>,
    pub(crate) state_by_endpoint: BTreeMap<EndpointStateKey, StateEntry>,
    pub(crate) policy: StatePolicy,
    pub(crate) presence: Presence,
}

impl DiscoveredDevice {
    /// Build a device from the clusters each endpoint exposes.
    pub fn new(
        short_addr: ShortAddr,
        identity: DeviceIdentity,
        endpoint_clusters: BTreeMap<u8, EndpointClusters>,
        policy: StatePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let mut device = Self {
            short_addr,
            identity,
            endpoint_clusters,
            cluster_to_endpoints: BTreeMap::new(),
            feature_to_endpoints: BTreeMap::new(),
            state: BTreeMap::new(),
            state_by_endpoint: BTreeMap::new(),
            policy: policy.normalized(),
            presence: Presence {
                last_seen: now,
                last_seen_source: Some("discovery".into()),
                forced_offline: false,
                offline_reason: None,
                offline_set_at: None,
            },
        };
        device.rebuild_indices();
        device
    }

    /// Build a device from a descriptor-discovery report.
    pub fn from_report(report: &DescriptorReport, policy: StatePolicy, now: DateTime<Utc>) -> Self {
        let mut endpoints = BTreeMap::new();
        let mut clusters = BTreeMap::new();
        for desc in report.endpoints.iter().filter(|d| d.endpoint > 0) {
            endpoints.insert(
                desc.endpoint,
                EndpointIdentity {
                    profile_id: desc.profile_id,
                    device_id: desc.device_id,
                    device_version: desc.device_version,
                },
            );
            clusters.insert(
                desc.endpoint,
                EndpointClusters {
                    input: desc.input_clusters.clone(),
                    output: desc.output_clusters.clone(),
                },
            );
        }
        let identity = DeviceIdentity {
            ieee_addr: report.ieee_addr,
            manufacturer_code: report.node.map(|n| n.manufacturer_code),
            logical_type: report.node.map(|n| n.logical_type),
            endpoints,
            power_source: report.power.map(|p| p.current_power_source),
            power_source_level: report.power.map(|p| p.current_power_source_level),
            discovery_errors: report.errors.clone(),
        };
        Self::new(report.short_addr, identity, clusters, policy, now)
    }

    /// Recompute `cluster_to_endpoints` and `feature_to_endpoints` from
    /// the endpoint cluster lists. Input clusters only.
    pub(crate) fn rebuild_indices(&mut self) {
        self.cluster_to_endpoints.clear();
        self.feature_to_endpoints.clear();
        for (&endpoint, clusters) in &self.endpoint_clusters {
            for &cluster in &clusters.input {
                push_sorted(self.cluster_to_endpoints.entry(cluster).or_default(), endpoint);
                if let Some(feature) = Feature::from_cluster(cluster) {
                    push_sorted(self.feature_to_endpoints.entry(feature).or_default(), endpoint);
                }
            }
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn ieee_addr(&self) -> Option<IeeeAddr> {
        self.identity.ieee_addr
    }

    pub fn endpoints(&self) -> Vec<u8> {
        self.endpoint_clusters.keys().copied().collect()
    }

    pub fn features(&self) -> Vec<Feature> {
        self.feature_to_endpoints.keys().copied().collect()
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.feature_to_endpoints.contains_key(&feature)
    }

    pub fn cluster_to_endpoints(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.cluster_to_endpoints
    }

    pub fn feature_to_endpoints(&self) -> &BTreeMap<Feature, Vec<u8>> {
        &self.feature_to_endpoints
    }

    /// Endpoints exposing `cluster` as an input, ascending.
    pub fn endpoints_for(&self, cluster: u16) -> &[u8] {
        self.cluster_to_endpoints
            .get(&cluster)
            .map_or(&[], Vec::as_slice)
    }

    /// Default endpoint for a cluster: the first one exposing it.
    pub fn default_endpoint(&self, cluster: u16) -> Option<u8> {
        self.endpoints_for(cluster).first().copied()
    }

    pub fn policy(&self) -> StatePolicy {
        self.policy
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    // ── Feature resolution ──────────────────────────────────────────

    /// Ordered endpoints exposing `feature`.
    pub fn feature_endpoints(&self, feature: Feature) -> &[u8] {
        self.feature_to_endpoints
            .get(&feature)
            .map_or(&[], Vec::as_slice)
    }

    /// Resolve one endpoint for a feature.
    ///
    /// With no selector the feature must map to exactly one endpoint. A
    /// selector naming one of the endpoints is used verbatim; otherwise
    /// it is a 1-based index into the sorted endpoint list.
    pub fn select_feature_endpoint(
        &self,
        feature: Feature,
        selector: Option<u8>,
    ) -> Result<u8, EngineError> {
        let endpoints = self.feature_endpoints(feature);
        if endpoints.is_empty() {
            return Err(EngineError::not_found(format!(
                "feature '{feature}' on device {}",
                self.short_addr
            )));
        }
        let Some(selector) = selector else {
            return match endpoints {
                [only] => Ok(*only),
                _ => Err(EngineError::Ambiguous {
                    what: format!("feature '{feature}'"),
                    candidates: endpoints.to_vec(),
                }),
            };
        };
        if endpoints.contains(&selector) {
            return Ok(selector);
        }
        let index = usize::from(selector);
        if index == 0 || index > endpoints.len() {
            return Err(EngineError::invalid(
                "selector",
                format!(
                    "feature '{feature}' selector {selector} out of range (1..={})",
                    endpoints.len()
                ),
            ));
        }
        endpoints
            .get(index - 1)
            .copied()
            .ok_or_else(|| EngineError::invalid("selector", "out of range"))
    }
}

fn push_sorted(list: &mut Vec<u8>, endpoint: u8) {
    if let Err(pos) = list.binary_search(&endpoint) {
        list.insert(pos, endpoint);
    }
}
