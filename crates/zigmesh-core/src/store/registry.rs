// ── Device registry ──
//
// Bounded `short_addr -> DiscoveredDevice` map. Over capacity, the
// device with the oldest `last_seen` is evicted.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DiscoveredDevice, Feature, IeeeAddr, ShortAddr};

/// Result of inserting a freshly discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
    /// Same IEEE address seen under a new short address.
    Readdressed { previous: ShortAddr },
}

/// Filter for device lookups. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceQuery {
    #[serde(default)]
    pub features: Vec<Feature>,
    pub manufacturer_code: Option<u16>,
    pub profile_id: Option<u16>,
    pub device_id: Option<u16>,
    pub ieee_addr: Option<IeeeAddr>,
    pub online: Option<bool>,
}

impl DeviceQuery {
    pub fn with_feature(feature: Feature) -> Self {
        Self {
            features: vec![feature],
            ..Self::default()
        }
    }

    pub fn matches(&self, device: &DiscoveredDevice, now: DateTime<Utc>, offline_after: Duration) -> bool {
        let identity = &device.identity;
        self.features.iter().all(|f| device.has_feature(*f))
            && self
                .manufacturer_code
                .is_none_or(|code| identity.manufacturer_code == Some(code))
            && self.profile_id.is_none_or(|id| identity.profile_id() == Some(id))
            && self.device_id.is_none_or(|id| identity.device_id() == Some(id))
            && self.ieee_addr.is_none_or(|ieee| identity.ieee_addr == Some(ieee))
            && self
                .online
                .is_none_or(|online| device.is_online(now, offline_after) == online)
    }
}

/// Every known mesh peer.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<ShortAddr, DiscoveredDevice>,
    max_devices: usize,
}

impl DeviceRegistry {
    pub fn new(max_devices: usize) -> Self {
        Self {
            devices: BTreeMap::new(),
            max_devices: max_devices.max(1),
        }
    }

    /// Insert a discovered device. A rediscovered device keeps its
    /// cached state; its identity and cluster map are replaced.
    pub fn upsert(&mut self, mut device: DiscoveredDevice) -> Upsert {
        let short_addr = device.short_addr;
        let mut outcome = Upsert::Added;

        if let Some(ieee) = device.ieee_addr() {
            let stale = self
                .devices
                .values()
                .find(|d| d.short_addr != short_addr && d.ieee_addr() == Some(ieee))
                .map(|d| d.short_addr);
            if let Some(previous) = stale {
                if let Some(old) = self.devices.remove(&previous) {
                    carry_state(&mut device, old);
                }
                outcome = Upsert::Readdressed { previous };
            }
        }

        if let Some(old) = self.devices.remove(&short_addr) {
            carry_state(&mut device, old);
            if outcome == Upsert::Added {
                outcome = Upsert::Updated;
            }
        }

        self.devices.insert(short_addr, device);
        self.prune();
        outcome
    }

    /// Insert without rediscovery semantics (snapshot restore).
    pub(crate) fn insert(&mut self, device: DiscoveredDevice) {
        self.devices.insert(device.short_addr, device);
        self.prune();
    }

    fn prune(&mut self) {
        while self.devices.len() > self.max_devices {
            let oldest = self
                .devices
                .values()
                .min_by(|a, b| {
                    a.presence
                        .last_seen
                        .cmp(&b.presence.last_seen)
                        .then_with(|| a.short_addr.cmp(&b.short_addr))
                })
                .map(|d| d.short_addr);
            let Some(short_addr) = oldest else { break };
            self.devices.remove(&short_addr);
        }
    }

    pub fn get(&self, short_addr: ShortAddr) -> Option<&DiscoveredDevice> {
        self.devices.get(&short_addr)
    }

    pub fn get_mut(&mut self, short_addr: ShortAddr) -> Option<&mut DiscoveredDevice> {
        self.devices.get_mut(&short_addr)
    }

    pub fn find_by_ieee(&self, ieee: IeeeAddr) -> Option<&DiscoveredDevice> {
        self.devices.values().find(|d| d.ieee_addr() == Some(ieee))
    }

    pub fn contains(&self, short_addr: ShortAddr) -> bool {
        self.devices.contains_key(&short_addr)
    }

    pub fn remove(&mut self, short_addr: ShortAddr) -> Option<DiscoveredDevice> {
        self.devices.remove(&short_addr)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Devices in ascending short-address order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DiscoveredDevice> {
        self.devices.values_mut()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn max_devices(&self) -> usize {
        self.max_devices
    }
}

fn carry_state(device: &mut DiscoveredDevice, old: DiscoveredDevice) {
    for (key, entry) in old.state {
        device.state.entry(key).or_insert(entry);
    }
    for (key, entry) in old.state_by_endpoint {
        device.state_by_endpoint.entry(key).or_insert(entry);
    }
    device.prune_state();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::add;
    use crate::model::{
        AttrValue, DeviceIdentity, EndpointClusters, StatePolicy, StateSource, cluster_id,
    };
    use crate::store::StateWrite;

    fn at(ms: u64) -> DateTime<Utc> {
        add(DateTime::<Utc>::UNIX_EPOCH, Duration::from_millis(ms))
    }

    fn device(short: u16, ieee: Option<u8>, seen: u64) -> DiscoveredDevice {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            1,
            EndpointClusters {
                input: vec![cluster_id::ON_OFF],
                output: Vec::new(),
            },
        );
        let identity = DeviceIdentity {
            ieee_addr: ieee.map(|b| IeeeAddr([b; 8])),
            manufacturer_code: Some(0x117C),
            ..DeviceIdentity::default()
        };
        DiscoveredDevice::new(ShortAddr(short), identity, clusters, StatePolicy::default(), at(seen))
    }

    #[test]
    fn evicts_oldest_last_seen() {
        let mut registry = DeviceRegistry::new(2);
        registry.upsert(device(0x0001, None, 10));
        registry.upsert(device(0x0002, None, 5));
        registry.upsert(device(0x0003, None, 20));
        let left: Vec<u16> = registry.iter().map(|d| d.short_addr.raw()).collect();
        assert_eq!(left, vec![0x0001, 0x0003]);
    }

    #[test]
    fn rediscovery_keeps_cached_state() {
        let mut registry = DeviceRegistry::new(8);
        let mut first = device(0x1234, Some(0xAA), 0);
        first.write_state(
            at(0),
            StateWrite::new(Some(1), cluster_id::ON_OFF, 0, AttrValue::Bool(true), StateSource::Attribute),
        );
        assert_eq!(registry.upsert(first), Upsert::Added);
        assert_eq!(registry.upsert(device(0x1234, Some(0xAA), 50)), Upsert::Updated);
        assert_eq!(registry.get(ShortAddr(0x1234)).unwrap().state().len(), 1);
    }

    #[test]
    fn readdressed_device_replaces_old_short_addr() {
        let mut registry = DeviceRegistry::new(8);
        registry.upsert(device(0x1111, Some(0xAA), 0));
        let outcome = registry.upsert(device(0x2222, Some(0xAA), 10));
        assert_eq!(outcome, Upsert::Readdressed { previous: ShortAddr(0x1111) });
        assert!(!registry.contains(ShortAddr(0x1111)));
        assert_eq!(
            registry.find_by_ieee(IeeeAddr([0xAA; 8])).unwrap().short_addr,
            ShortAddr(0x2222)
        );
    }

    #[test]
    fn query_matches_every_field() {
        let dev = device(0x1234, Some(0xAA), 0);
        let now = at(0);
        let window = Duration::from_secs(300);
        assert!(DeviceQuery::with_feature(Feature::OnOff).matches(&dev, now, window));
        assert!(!DeviceQuery::with_feature(Feature::Lock).matches(&dev, now, window));
        let query = DeviceQuery {
            manufacturer_code: Some(0x117C),
            online: Some(true),
            ..DeviceQuery::default()
        };
        assert!(query.matches(&dev, now, window));
        let offline = DeviceQuery {
            online: Some(false),
            ..DeviceQuery::default()
        };
        assert!(!offline.matches(&dev, now, window));
    }
}
