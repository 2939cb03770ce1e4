// ── Persisted registry snapshot ──
//
// Logical schema of the saved profile and device registry, plus JSON
// file helpers. Derived indices are written for inspection but rebuilt
// from `endpoint_clusters` on restore.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SelfHealPolicy;
use crate::error::EngineError;
use crate::model::{
    AttrValue, DeviceIdentity, DiscoveredDevice, EndpointClusters, EndpointStateKey, Feature,
    NetworkMode, NetworkProfile, Presence, ShortAddr, StateEntry, StateKey, StateMeta, StatePolicy,
};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Aggregate cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(flatten)]
    pub key: StateKey,
    pub value: AttrValue,
    pub meta: StateMeta,
}

/// Per-endpoint cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStateRecord {
    #[serde(flatten)]
    pub key: EndpointStateKey,
    pub value: AttrValue,
    pub meta: StateMeta,
}

/// One persisted device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub short_addr: ShortAddr,
    pub identity: DeviceIdentity,
    pub endpoint_clusters: BTreeMap<u8, EndpointClusters>,
    #[serde(default)]
    pub cluster_to_endpoints: BTreeMap<u16, Vec<u8>>,
    #[serde(default)]
    pub feature_to_endpoints: BTreeMap<Feature, Vec<u8>>,
    #[serde(default)]
    pub state: Vec<StateRecord>,
    #[serde(default)]
    pub state_by_endpoint: Vec<EndpointStateRecord>,
    pub lifecycle: Presence,
    pub state_policy: StatePolicy,
}

impl DeviceRecord {
    pub fn from_device(device: &DiscoveredDevice) -> Self {
        Self {
            short_addr: device.short_addr,
            identity: device.identity.clone(),
            endpoint_clusters: device.endpoint_clusters.clone(),
            cluster_to_endpoints: device.cluster_to_endpoints.clone(),
            feature_to_endpoints: device.feature_to_endpoints.clone(),
            state: device
                .state
                .iter()
                .map(|(key, entry)| StateRecord {
                    key: *key,
                    value: entry.value.clone(),
                    meta: entry.meta.clone(),
                })
                .collect(),
            state_by_endpoint: device
                .state_by_endpoint
                .iter()
                .map(|(key, entry)| EndpointStateRecord {
                    key: *key,
                    value: entry.value.clone(),
                    meta: entry.meta.clone(),
                })
                .collect(),
            lifecycle: device.presence.clone(),
            state_policy: device.policy,
        }
    }

    /// Rebuild a device under `policy`. `None` for rows that cannot
    /// describe a real peer.
    pub fn into_device(self, policy: StatePolicy) -> Option<DiscoveredDevice> {
        if !self.short_addr.is_remote_device() {
            return None;
        }
        if self.endpoint_clusters.keys().any(|ep| *ep == 0) {
            return None;
        }
        let mut device = DiscoveredDevice::new(
            self.short_addr,
            self.identity,
            self.endpoint_clusters,
            policy,
            self.lifecycle.last_seen,
        );
        device.presence = self.lifecycle;
        for row in self.state {
            device.state.insert(
                row.key,
                StateEntry {
                    value: row.value,
                    meta: row.meta,
                },
            );
        }
        for row in self.state_by_endpoint {
            device.state_by_endpoint.insert(
                row.key,
                StateEntry {
                    value: row.value,
                    meta: row.meta,
                },
            );
        }
        device.prune_state();
        Some(device)
    }
}

/// Everything `dump()` captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(default)]
    pub network_profile: NetworkProfile,
    #[serde(default)]
    pub self_heal_policy: SelfHealPolicy,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
}

/// Same shape with opaque device rows, so one bad row does not sink
/// the whole file.
#[derive(Deserialize)]
struct LenientSnapshot {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    network_mode: NetworkMode,
    #[serde(default)]
    network_profile: NetworkProfile,
    #[serde(default)]
    self_heal_policy: SelfHealPolicy,
    #[serde(default)]
    devices: Vec<serde_json::Value>,
}

impl RegistrySnapshot {
    /// Parse JSON, dropping device rows that do not decode. Returns the
    /// snapshot and the number of skipped rows.
    pub fn from_json(text: &str) -> Result<(Self, usize), EngineError> {
        let raw: LenientSnapshot = serde_json::from_str(text)?;
        if raw.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(EngineError::invalid(
                "schema_version",
                format!(
                    "snapshot version {} is newer than supported {SNAPSHOT_SCHEMA_VERSION}",
                    raw.schema_version
                ),
            ));
        }
        let mut skipped = 0;
        let mut devices = Vec::with_capacity(raw.devices.len());
        for row in raw.devices {
            match serde_json::from_value::<DeviceRecord>(row) {
                Ok(record) => devices.push(record),
                Err(e) => {
                    warn!(error = %e, "skipping malformed device row");
                    skipped += 1;
                }
            }
        }
        Ok((
            Self {
                schema_version: raw.schema_version,
                saved_at: raw.saved_at,
                network_mode: raw.network_mode,
                network_profile: raw.network_profile,
                self_heal_policy: raw.self_heal_policy,
                devices,
            },
            skipped,
        ))
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read_file(path: &Path) -> Result<(Self, usize), EngineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Write via a sibling temp file and rename.
    pub fn write_file(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, self.to_json()?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), devices = self.devices.len(), "snapshot written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{StateSource, cluster_id};
    use crate::store::StateWrite;
    use pretty_assertions::assert_eq;

    fn sample() -> DiscoveredDevice {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            1,
            EndpointClusters {
                input: vec![cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL],
                output: Vec::new(),
            },
        );
        let mut dev = DiscoveredDevice::new(
            ShortAddr(0x1234),
            DeviceIdentity::default(),
            clusters,
            StatePolicy::default(),
            DateTime::<Utc>::UNIX_EPOCH,
        );
        dev.write_state(
            DateTime::<Utc>::UNIX_EPOCH,
            StateWrite::new(Some(1), cluster_id::LEVEL_CONTROL, 0, AttrValue::Int(128), StateSource::Attribute),
        );
        dev
    }

    #[test]
    fn device_record_restores_indices_and_state() {
        let dev = sample();
        let record = DeviceRecord::from_device(&dev);
        let json = serde_json::to_string(&record).unwrap();
        let back: DeviceRecord = serde_json::from_str(&json).unwrap();
        let restored = back.into_device(StatePolicy::default()).unwrap();
        assert_eq!(restored, dev);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let good = serde_json::to_value(DeviceRecord::from_device(&sample())).unwrap();
        let text = serde_json::json!({
            "schema_version": 1,
            "saved_at": "1970-01-01T00:00:00Z",
            "devices": [good, {"short_addr": "nope"}],
        })
        .to_string();
        let (snapshot, skipped) = RegistrySnapshot::from_json(&text).unwrap();
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let text = r#"{"schema_version": 9, "saved_at": "1970-01-01T00:00:00Z"}"#;
        assert!(matches!(
            RegistrySnapshot::from_json(text),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn coordinator_rows_are_not_devices() {
        let mut record = DeviceRecord::from_device(&sample());
        record.short_addr = ShortAddr::COORDINATOR;
        assert!(record.into_device(StatePolicy::default()).is_none());
    }
}
