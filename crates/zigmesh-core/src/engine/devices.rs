// ── Device queries and reads ──

use tracing::debug;

use crate::error::{EngineError, RadioResultExt};
use crate::model::{
    AttrValue, DiscoveredDevice, Feature, IeeeAddr, Lifecycle, ShortAddr, StateEntry, StateInfo,
    StateSource,
};
use crate::radio::Radio;
use crate::store::{DeviceQuery, StateWrite};

use super::Engine;

impl<R: Radio> Engine<R> {
    // ── Lookups ─────────────────────────────────────────────────────

    /// A known device. With `online_only`, offline devices are hidden.
    pub fn get_device(&self, short_addr: ShortAddr, online_only: bool) -> Option<&DiscoveredDevice> {
        let now = self.now();
        self.registry
            .get(short_addr)
            .filter(|d| !online_only || d.is_online(now, self.config.offline_after))
    }

    pub fn get_device_by_ieee(&self, ieee: IeeeAddr) -> Option<&DiscoveredDevice> {
        self.registry.find_by_ieee(ieee)
    }

    /// Devices sorted by short address.
    pub fn list_devices(&self, online_only: bool) -> Vec<&DiscoveredDevice> {
        let now = self.now();
        self.registry
            .iter()
            .filter(|d| !online_only || d.is_online(now, self.config.offline_after))
            .collect()
    }

    pub fn find_devices(&self, query: &DeviceQuery) -> Vec<&DiscoveredDevice> {
        let now = self.now();
        self.registry
            .iter()
            .filter(|d| query.matches(d, now, self.config.offline_after))
            .collect()
    }

    /// First device matching `query`.
    pub fn select_device(&self, query: &DeviceQuery) -> Result<&DiscoveredDevice, EngineError> {
        self.find_devices(query)
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::not_found("device matching query"))
    }

    pub(super) fn device(&self, short_addr: ShortAddr) -> Result<&DiscoveredDevice, EngineError> {
        self.registry
            .get(short_addr)
            .ok_or_else(|| EngineError::not_found(format!("device {short_addr}")))
    }

    pub(super) fn device_mut(&mut self, short_addr: ShortAddr) -> Result<&mut DiscoveredDevice, EngineError> {
        self.registry
            .get_mut(short_addr)
            .ok_or_else(|| EngineError::not_found(format!("device {short_addr}")))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn device_status(&self, short_addr: ShortAddr) -> Result<Lifecycle, EngineError> {
        let device = self.device(short_addr)?;
        Ok(device.lifecycle(self.now(), self.config.offline_after))
    }

    pub fn mark_device_offline(&mut self, short_addr: ShortAddr, reason: &str) -> Result<(), EngineError> {
        let now = self.now();
        self.device_mut(short_addr)?.mark_offline(now, reason);
        debug!(short_addr = %short_addr, reason, "device marked offline");
        Ok(())
    }

    pub fn mark_device_online(&mut self, short_addr: ShortAddr, source: &str) -> Result<(), EngineError> {
        let now = self.now();
        self.device_mut(short_addr)?.touch_seen(now, source);
        Ok(())
    }

    // ── Feature endpoints ───────────────────────────────────────────

    pub fn feature_endpoints(&self, short_addr: ShortAddr, feature: Feature) -> Result<Vec<u8>, EngineError> {
        Ok(self.device(short_addr)?.feature_endpoints(feature).to_vec())
    }

    pub fn select_feature_endpoint(
        &self,
        short_addr: ShortAddr,
        feature: Feature,
        selector: Option<u8>,
    ) -> Result<u8, EngineError> {
        self.device(short_addr)?
            .select_feature_endpoint(feature, selector)
    }

    // ── State ───────────────────────────────────────────────────────

    /// Cached value under the device's stale-read policy.
    pub fn read_state(
        &self,
        short_addr: ShortAddr,
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
        allow_stale: bool,
    ) -> Result<Option<StateEntry>, EngineError> {
        self.device(short_addr)?
            .read_state(self.now(), endpoint, cluster, attr, allow_stale)
    }

    pub fn state_info(
        &self,
        short_addr: ShortAddr,
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
    ) -> Result<Option<StateInfo>, EngineError> {
        Ok(self
            .device(short_addr)?
            .state_info(self.now(), endpoint, cluster, attr))
    }

    /// Read an attribute, serving from the cache when allowed. A radio
    /// read is written back as authoritative.
    pub fn read_attribute(
        &mut self,
        short_addr: ShortAddr,
        endpoint: Option<u8>,
        cluster: u16,
        attr: u16,
        use_cache: bool,
    ) -> Result<AttrValue, EngineError> {
        let now = self.now();
        let device = self.device(short_addr)?;
        let endpoint = match endpoint {
            Some(endpoint) => endpoint,
            None => device.default_endpoint(cluster).ok_or_else(|| {
                EngineError::not_found(format!("cluster 0x{cluster:04x} on device {short_addr}"))
            })?,
        };
        if use_cache {
            if let Some(entry) = device.read_state(now, Some(endpoint), cluster, attr, false)? {
                debug!(short_addr = %short_addr, cluster, attr, "attribute served from cache");
                return Ok(entry.value);
            }
        }

        let value = self
            .radio
            .read_attribute(short_addr, endpoint, cluster, attr)
            .op("read_attribute")?;
        self.device_mut(short_addr)?.write_state(
            now,
            StateWrite::new(Some(endpoint), cluster, attr, value.clone(), StateSource::Read)
                .authoritative(true),
        );
        Ok(value)
    }
}
