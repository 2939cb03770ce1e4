// ── Device state cache ──
//
// Per-device attribute cache with TTL and staleness policy, plus the
// online/offline lifecycle. Two maps are kept: `state_by_endpoint` has
// full fidelity, `state` carries the default endpoint of each cluster
// (and writes for clusters no endpoint exposes). An endpoint-less write
// lands on the cluster's default endpoint, so both maps stay in step.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{elapsed, millis};
use crate::error::EngineError;
use crate::model::{
    AttrValue, DiscoveredDevice, EndpointStateKey, Lifecycle, ShortAddr, StaleReadPolicy,
    StateEntry, StateInfo, StateKey, StateMeta, StatePolicy, StateSource,
};

/// One cache write.
#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    pub endpoint: Option<u8>,
    pub cluster: u16,
    pub attr: u16,
    pub value: AttrValue,
    pub source: StateSource,
    pub authoritative: bool,
    pub source_short_addr: Option<ShortAddr>,
    pub source_endpoint: Option<u8>,
    pub attr_type: Option<u8>,
}

impl StateWrite {
    pub fn new(
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
        value: AttrValue,
        source: StateSource,
    ) -> Self {
        Self {
            endpoint,
            cluster,
            attr,
            value,
            source,
            authoritative: !matches!(source, StateSource::Control),
            source_short_addr: None,
            source_endpoint: None,
            attr_type: None,
        }
    }

    #[must_use]
    pub fn authoritative(mut self, authoritative: bool) -> Self {
        self.authoritative = authoritative;
        self
    }

    #[must_use]
    pub fn attributed(mut self, short_addr: Option<ShortAddr>, endpoint: Option<u8>) -> Self {
        self.source_short_addr = short_addr;
        self.source_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn attr_type(mut self, attr_type: Option<u8>) -> Self {
        self.attr_type = attr_type;
        self
    }
}

fn is_stale(policy: &StatePolicy, age: Duration) -> bool {
    !policy.ttl.is_zero() && age > policy.ttl
}

impl DiscoveredDevice {
    // ── Writes ──────────────────────────────────────────────────────

    /// Insert or overwrite a cached value, refresh `last_seen`, and prune
    /// both maps back under the capacity bound.
    pub fn write_state(&mut self, now: DateTime<Utc>, write: StateWrite) {
        let default_endpoint = self.default_endpoint(write.cluster);
        let endpoint = write.endpoint.or(default_endpoint);
        let entry = StateEntry {
            value: write.value,
            meta: StateMeta {
                updated_at: now,
                source: write.source,
                authoritative: write.authoritative,
                endpoint,
                source_short_addr: write.source_short_addr,
                source_endpoint: write.source_endpoint,
                attr_type: write.attr_type,
            },
        };

        let mirror = match (endpoint, default_endpoint) {
            (None, _) | (_, None) => true,
            (Some(ep), Some(default)) => ep == default,
        };
        if let Some(endpoint) = endpoint {
            self.state_by_endpoint.insert(
                EndpointStateKey {
                    endpoint,
                    cluster: write.cluster,
                    attr: write.attr,
                },
                entry.clone(),
            );
        }
        if mirror {
            self.state.insert(
                StateKey {
                    cluster: write.cluster,
                    attr: write.attr,
                },
                entry,
            );
        }

        self.touch_seen(now, write.source.to_string());
        self.prune_state();
    }

    /// Drop the oldest entries until both maps fit `max_entries`. An
    /// aggregate entry takes its default-endpoint mirror with it.
    pub(crate) fn prune_state(&mut self) {
        let max = self.policy.max_entries;
        while self.state.len() > max {
            let Some(key) = oldest(&self.state) else { break };
            self.state.remove(&key);
            if let Some(endpoint) = self.default_endpoint(key.cluster) {
                self.state_by_endpoint.remove(&EndpointStateKey {
                    endpoint,
                    cluster: key.cluster,
                    attr: key.attr,
                });
            }
        }
        while self.state_by_endpoint.len() > max {
            let Some(key) = oldest(&self.state_by_endpoint) else { break };
            self.state_by_endpoint.remove(&key);
        }
    }

    /// Replace the cache policy and enforce the new bound.
    pub fn set_state_policy(&mut self, policy: StatePolicy) {
        self.policy = policy.normalized();
        self.prune_state();
    }

    // ── Reads ───────────────────────────────────────────────────────

    fn lookup(&self, endpoint: Option<u8>, cluster: u16, attr: u16) -> Option<&StateEntry> {
        match endpoint {
            Some(endpoint) => self.state_by_endpoint.get(&EndpointStateKey {
                endpoint,
                cluster,
                attr,
            }),
            None => self.state.get(&StateKey { cluster, attr }),
        }
    }

    /// Cached value, subject to the stale-read policy unless
    /// `allow_stale` is set.
    pub fn read_state(
        &self,
        now: DateTime<Utc>,
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
        allow_stale: bool,
    ) -> Result<Option<StateEntry>, EngineError> {
        let Some(entry) = self.lookup(endpoint, cluster, attr) else {
            return Ok(None);
        };
        if allow_stale {
            return Ok(Some(entry.clone()));
        }
        let age = elapsed(now, entry.meta.updated_at);
        if !is_stale(&self.policy, age) {
            return Ok(Some(entry.clone()));
        }
        match self.policy.stale_read_policy {
            StaleReadPolicy::Allow => Ok(Some(entry.clone())),
            StaleReadPolicy::Refresh => Ok(None),
            StaleReadPolicy::Raise => Err(EngineError::StaleState {
                cluster,
                attr,
                age_ms: millis(age),
            }),
        }
    }

    /// Metadata with the computed staleness flag.
    pub fn state_info(
        &self,
        now: DateTime<Utc>,
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
    ) -> Option<StateInfo> {
        self.lookup(endpoint, cluster, attr).map(|entry| StateInfo {
            meta: entry.meta.clone(),
            stale: is_stale(&self.policy, elapsed(now, entry.meta.updated_at)),
        })
    }

    pub fn state(&self) -> &BTreeMap<StateKey, StateEntry> {
        &self.state
    }

    pub fn state_by_endpoint(&self) -> &BTreeMap<EndpointStateKey, StateEntry> {
        &self.state_by_endpoint
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Record activity; clears a forced-offline mark.
    pub fn touch_seen(&mut self, now: DateTime<Utc>, source: impl Into<String>) {
        self.presence.last_seen = now;
        self.presence.last_seen_source = Some(source.into());
        self.presence.forced_offline = false;
        self.presence.offline_reason = None;
        self.presence.offline_set_at = None;
    }

    pub fn mark_offline(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.presence.forced_offline = true;
        self.presence.offline_reason = Some(reason.into());
        self.presence.offline_set_at = Some(now);
    }

    /// Zero `offline_after` means "always online" unless forced offline.
    pub fn is_online(&self, now: DateTime<Utc>, offline_after: Duration) -> bool {
        if self.presence.forced_offline {
            return false;
        }
        offline_after.is_zero() || elapsed(now, self.presence.last_seen) <= offline_after
    }

    pub fn lifecycle(&self, now: DateTime<Utc>, offline_after: Duration) -> Lifecycle {
        Lifecycle {
            short_addr: self.short_addr,
            online: self.is_online(now, offline_after),
            last_seen: self.presence.last_seen,
            last_seen_age_ms: millis(elapsed(now, self.presence.last_seen)),
            last_seen_source: self.presence.last_seen_source.clone(),
            forced_offline: self.presence.forced_offline,
            offline_reason: self.presence.offline_reason.clone(),
            offline_set_at: self.presence.offline_set_at,
        }
    }
}

/// Key of the entry with the oldest `updated_at`; ties go to the
/// smallest key.
fn oldest<K: Ord + Copy>(map: &BTreeMap<K, StateEntry>) -> Option<K> {
    map.iter()
        .min_by(|(ka, a), (kb, b)| {
            a.meta
                .updated_at
                .cmp(&b.meta.updated_at)
                .then_with(|| ka.cmp(kb))
        })
        .map(|(k, _)| *k)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::add;
    use crate::model::{DeviceIdentity, EndpointClusters, cluster_id};

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    fn device(policy: StatePolicy) -> DiscoveredDevice {
        let mut clusters = BTreeMap::new();
        for ep in [1u8, 2] {
            clusters.insert(
                ep,
                EndpointClusters {
                    input: vec![cluster_id::ON_OFF],
                    output: Vec::new(),
                },
            );
        }
        DiscoveredDevice::new(ShortAddr(0x1234), DeviceIdentity::default(), clusters, policy, t0())
    }

    fn on(endpoint: Option<u8>, value: bool) -> StateWrite {
        StateWrite::new(
            endpoint,
            cluster_id::ON_OFF,
            0,
            AttrValue::Bool(value),
            StateSource::Attribute,
        )
    }

    #[test]
    fn default_endpoint_writes_are_mirrored() {
        let mut dev = device(StatePolicy::default());
        dev.write_state(t0(), on(Some(2), true));
        assert!(dev.read_state(t0(), None, cluster_id::ON_OFF, 0, false).unwrap().is_none());
        dev.write_state(t0(), on(Some(1), true));
        let agg = dev.read_state(t0(), None, cluster_id::ON_OFF, 0, false).unwrap().unwrap();
        assert_eq!(agg.value, AttrValue::Bool(true));
        assert_eq!(agg.meta.endpoint, Some(1));
        assert!(dev.read_state(t0(), Some(2), cluster_id::ON_OFF, 0, false).unwrap().is_some());
    }

    #[test]
    fn endpoint_less_writes_land_on_default_endpoint() {
        let mut dev = device(StatePolicy::default());
        dev.write_state(t0(), on(Some(1), false));
        dev.write_state(t0(), on(None, true));
        let agg = dev.read_state(t0(), None, cluster_id::ON_OFF, 0, false).unwrap().unwrap();
        let ep1 = dev.read_state(t0(), Some(1), cluster_id::ON_OFF, 0, false).unwrap().unwrap();
        assert_eq!(agg.value, AttrValue::Bool(true));
        assert_eq!(ep1.value, AttrValue::Bool(true));
        assert_eq!(ep1.meta.endpoint, Some(1));
        assert!(dev.read_state(t0(), Some(2), cluster_id::ON_OFF, 0, false).unwrap().is_none());

        // No endpoint carries the cluster: only the aggregate is written.
        dev.write_state(
            t0(),
            StateWrite::new(None, 0x0402, 0, AttrValue::Int(2150), StateSource::Attribute),
        );
        assert_eq!(dev.state().len(), 2);
        assert_eq!(dev.state_by_endpoint().len(), 1);
    }

    #[test]
    fn young_entries_are_never_stale() {
        for stale_read_policy in [StaleReadPolicy::Allow, StaleReadPolicy::Refresh, StaleReadPolicy::Raise] {
            let policy = StatePolicy {
                ttl: Duration::from_millis(1000),
                stale_read_policy,
                max_entries: 64,
            };
            let mut dev = device(policy);
            dev.write_state(t0(), on(Some(1), true));
            let now = add(t0(), Duration::from_millis(1000));
            assert!(dev.read_state(now, Some(1), cluster_id::ON_OFF, 0, false).unwrap().is_some());
            assert!(!dev.state_info(now, Some(1), cluster_id::ON_OFF, 0).unwrap().stale);
        }
    }

    #[test]
    fn expired_entries_follow_policy() {
        let later = add(t0(), Duration::from_millis(1001));
        let mut policy = StatePolicy {
            ttl: Duration::from_millis(1000),
            stale_read_policy: StaleReadPolicy::Allow,
            max_entries: 64,
        };
        let mut dev = device(policy);
        dev.write_state(t0(), on(Some(1), true));
        assert!(dev.read_state(later, Some(1), cluster_id::ON_OFF, 0, false).unwrap().is_some());

        policy.stale_read_policy = StaleReadPolicy::Refresh;
        dev.set_state_policy(policy);
        assert!(dev.read_state(later, Some(1), cluster_id::ON_OFF, 0, false).unwrap().is_none());
        assert!(dev.read_state(later, Some(1), cluster_id::ON_OFF, 0, true).unwrap().is_some());

        policy.stale_read_policy = StaleReadPolicy::Raise;
        dev.set_state_policy(policy);
        assert!(matches!(
            dev.read_state(later, Some(1), cluster_id::ON_OFF, 0, false),
            Err(EngineError::StaleState { age_ms: 1001, .. })
        ));
    }

    #[test]
    fn zero_ttl_never_goes_stale() {
        let mut dev = device(StatePolicy {
            ttl: Duration::ZERO,
            stale_read_policy: StaleReadPolicy::Raise,
            max_entries: 64,
        });
        dev.write_state(t0(), on(None, false));
        let much_later = add(t0(), Duration::from_secs(365 * 86_400));
        assert!(dev.read_state(much_later, None, cluster_id::ON_OFF, 0, false).unwrap().is_some());
    }

    #[test]
    fn pruning_drops_oldest_first() {
        let mut dev = device(StatePolicy {
            max_entries: 8,
            ..StatePolicy::default()
        });
        for attr in 0u16..10 {
            let at = add(t0(), Duration::from_millis(u64::from(attr)));
            dev.write_state(
                at,
                StateWrite::new(Some(2), 0x0402, attr, AttrValue::Int(i64::from(attr)), StateSource::Attribute),
            );
        }
        assert_eq!(dev.state_by_endpoint().len(), 8);
        let attrs: Vec<u16> = dev.state_by_endpoint().keys().map(|k| k.attr).collect();
        assert_eq!(attrs, (2..10).collect::<Vec<_>>());
        assert_eq!(dev.state().len(), 8);
    }

    #[test]
    fn lifecycle_tracks_forced_offline_and_age() {
        let mut dev = device(StatePolicy::default());
        let window = Duration::from_secs(300);
        assert!(dev.is_online(add(t0(), window), window));
        assert!(!dev.is_online(add(t0(), window + Duration::from_millis(1)), window));
        assert!(dev.is_online(add(t0(), Duration::from_secs(10_000)), Duration::ZERO));

        dev.mark_offline(t0(), "operator");
        let report = dev.lifecycle(t0(), window);
        assert!(!report.online);
        assert_eq!(report.offline_reason.as_deref(), Some("operator"));

        dev.write_state(t0(), on(Some(1), true));
        assert!(dev.is_online(t0(), window));
        assert_eq!(dev.presence().last_seen_source.as_deref(), Some("attribute"));
    }
}
