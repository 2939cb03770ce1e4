// ── Policy engine ──
//
// Declarative reporting and binding policies resolved against a
// device's endpoints, stored per (device, endpoint), and applied on
// demand or right after discovery.

pub mod binding;
pub mod reporting;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{DiscoveredDevice, Feature, IeeeAddr, ShortAddr};

pub use binding::{
    BINDABLE_CLUSTERS, BindResult, BindStatus, BindingApplyReport, BindingPolicy, EnrollResult,
    apply_binding, default_bind_clusters,
};
pub use reporting::{
    EntryResult, ReportingApplyReport, ReportingEntry, ReportingPolicy, ReportingPreset,
    apply_low_power, apply_reporting, merge_overrides,
};

/// Which endpoints of a device a policy addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTarget {
    Endpoint(u8),
    /// Every endpoint exposing the feature, or the one picked by the
    /// selector.
    Feature {
        feature: Feature,
        selector: Option<u8>,
    },
    All,
}

impl PolicyTarget {
    pub fn feature(&self) -> Option<Feature> {
        match self {
            Self::Feature { feature, .. } => Some(*feature),
            _ => None,
        }
    }

    /// Endpoints of `device` this target names.
    pub fn resolve(&self, device: &DiscoveredDevice) -> Result<Vec<u8>, EngineError> {
        match *self {
            Self::Endpoint(endpoint) => {
                if device.endpoint_clusters.contains_key(&endpoint) {
                    Ok(vec![endpoint])
                } else {
                    Err(EngineError::not_found(format!(
                        "endpoint {endpoint} on device {}",
                        device.short_addr
                    )))
                }
            }
            Self::Feature {
                feature,
                selector: Some(selector),
            } => device
                .select_feature_endpoint(feature, Some(selector))
                .map(|ep| vec![ep]),
            Self::Feature {
                feature,
                selector: None,
            } => {
                let endpoints = device.feature_endpoints(feature);
                if endpoints.is_empty() {
                    Err(EngineError::not_found(format!(
                        "feature '{feature}' on device {}",
                        device.short_addr
                    )))
                } else {
                    Ok(endpoints.to_vec())
                }
            }
            Self::All => Ok(device.endpoints()),
        }
    }
}

/// Operator request for a reporting policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingRequest {
    pub target: PolicyTarget,
    /// Defaults to the feature's preset when targeting a feature.
    pub preset: Option<ReportingPreset>,
    #[serde(default)]
    pub overrides: Vec<ReportingEntry>,
    #[serde(default)]
    pub low_power: bool,
}

impl ReportingRequest {
    pub fn preset(target: PolicyTarget, preset: ReportingPreset) -> Self {
        Self {
            target,
            preset: Some(preset),
            overrides: Vec::new(),
            low_power: false,
        }
    }

    /// Resolve into one stored policy per targeted endpoint.
    pub fn resolve(&self, device: &DiscoveredDevice) -> Result<Vec<ReportingPolicy>, EngineError> {
        let preset = self
            .preset
            .or_else(|| self.target.feature().and_then(ReportingPreset::for_feature));
        let base = preset.map(ReportingPreset::entries).unwrap_or_default();
        let mut entries = merge_overrides(&base, &self.overrides);
        if entries.is_empty() {
            return Err(EngineError::invalid(
                "reporting",
                "no preset applies and no override entries given",
            ));
        }
        if self.low_power {
            apply_low_power(&mut entries);
        }
        Ok(self
            .target
            .resolve(device)?
            .into_iter()
            .map(|endpoint| ReportingPolicy {
                short_addr: device.short_addr,
                endpoint,
                preset,
                low_power: self.low_power,
                entries: entries.clone(),
            })
            .collect())
    }
}

/// Operator request for a binding policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRequest {
    pub target: PolicyTarget,
    /// Overrides the capability default list.
    pub clusters: Option<Vec<u16>>,
    pub dst_ieee: Option<IeeeAddr>,
    pub dst_endpoint: Option<u8>,
    #[serde(default = "default_true")]
    pub ias_enroll: bool,
}

fn default_true() -> bool {
    true
}

impl BindingRequest {
    pub fn new(target: PolicyTarget) -> Self {
        Self {
            target,
            clusters: None,
            dst_ieee: None,
            dst_endpoint: None,
            ias_enroll: true,
        }
    }

    /// Resolve into one stored policy per targeted endpoint. Default
    /// lists are narrowed to the clusters the endpoint exposes.
    pub fn resolve(
        &self,
        device: &DiscoveredDevice,
        local_endpoint: u8,
    ) -> Result<Vec<BindingPolicy>, EngineError> {
        let endpoints = self.target.resolve(device)?;
        let mut policies = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let clusters = match (&self.clusters, self.target.feature()) {
                (Some(explicit), _) => explicit.clone(),
                (None, feature) => {
                    let defaults = feature.map_or_else(|| BINDABLE_CLUSTERS.to_vec(), default_bind_clusters);
                    let exposed = device.endpoint_clusters.get(&endpoint);
                    defaults
                        .into_iter()
                        .filter(|c| {
                            exposed.is_some_and(|e| e.input.contains(c) || e.output.contains(c))
                        })
                        .collect()
                }
            };
            policies.push(BindingPolicy {
                short_addr: device.short_addr,
                endpoint,
                clusters,
                dst_ieee: self.dst_ieee,
                dst_endpoint: self.dst_endpoint.unwrap_or(local_endpoint),
                ias_enroll: self.ias_enroll,
            });
        }
        Ok(policies)
    }
}

/// Stored policies keyed by (device, endpoint).
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    reporting: BTreeMap<(ShortAddr, u8), ReportingPolicy>,
    binding: BTreeMap<(ShortAddr, u8), BindingPolicy>,
}

impl PolicyStore {
    pub fn put_reporting(&mut self, policy: ReportingPolicy) {
        self.reporting
            .insert((policy.short_addr, policy.endpoint), policy);
    }

    pub fn put_binding(&mut self, policy: BindingPolicy) {
        self.binding
            .insert((policy.short_addr, policy.endpoint), policy);
    }

    /// Policies for one device, or all when `short_addr` is `None`.
    pub fn reporting(&self, short_addr: Option<ShortAddr>) -> Vec<ReportingPolicy> {
        self.reporting
            .values()
            .filter(|p| short_addr.is_none_or(|s| p.short_addr == s))
            .cloned()
            .collect()
    }

    pub fn binding(&self, short_addr: Option<ShortAddr>) -> Vec<BindingPolicy> {
        self.binding
            .values()
            .filter(|p| short_addr.is_none_or(|s| p.short_addr == s))
            .cloned()
            .collect()
    }

    /// Remove policies for a device (one endpoint or all). Returns the
    /// number removed.
    pub fn clear_reporting(&mut self, short_addr: ShortAddr, endpoint: Option<u8>) -> usize {
        let before = self.reporting.len();
        self.reporting
            .retain(|(s, ep), _| *s != short_addr || endpoint.is_some_and(|e| e != *ep));
        before - self.reporting.len()
    }

    pub fn clear_binding(&mut self, short_addr: ShortAddr, endpoint: Option<u8>) -> usize {
        let before = self.binding.len();
        self.binding
            .retain(|(s, ep), _| *s != short_addr || endpoint.is_some_and(|e| e != *ep));
        before - self.binding.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    use crate::model::{DeviceIdentity, EndpointClusters, StatePolicy, cluster_id};

    fn light() -> DiscoveredDevice {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            1,
            EndpointClusters {
                input: vec![cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL],
                output: Vec::new(),
            },
        );
        clusters.insert(
            2,
            EndpointClusters {
                input: vec![cluster_id::ON_OFF, cluster_id::IAS_ZONE],
                output: Vec::new(),
            },
        );
        DiscoveredDevice::new(
            ShortAddr(0x4321),
            DeviceIdentity::default(),
            clusters,
            StatePolicy::default(),
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    #[test]
    fn targets_resolve_against_device() {
        let dev = light();
        let on_off = PolicyTarget::Feature {
            feature: Feature::OnOff,
            selector: None,
        };
        assert_eq!(on_off.resolve(&dev).unwrap(), vec![1, 2]);
        assert_eq!(PolicyTarget::Endpoint(2).resolve(&dev).unwrap(), vec![2]);
        assert!(PolicyTarget::Endpoint(9).resolve(&dev).is_err());
        assert_eq!(PolicyTarget::All.resolve(&dev).unwrap(), vec![1, 2]);
    }

    #[test]
    fn feature_reporting_uses_its_preset() {
        let dev = light();
        let request = ReportingRequest {
            target: PolicyTarget::Feature {
                feature: Feature::IasZone,
                selector: None,
            },
            preset: None,
            overrides: Vec::new(),
            low_power: true,
        };
        let policies = request.resolve(&dev).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].endpoint, 2);
        assert_eq!(policies[0].preset, Some(ReportingPreset::IasZone));
        assert_eq!(policies[0].entries[0].min_interval, 30);

        let nothing = ReportingRequest {
            target: PolicyTarget::Endpoint(1),
            preset: None,
            overrides: Vec::new(),
            low_power: false,
        };
        assert!(nothing.resolve(&dev).is_err());
    }

    #[test]
    fn binding_defaults_follow_exposed_clusters() {
        let dev = light();
        let policies = BindingRequest::new(PolicyTarget::Feature {
            feature: Feature::Level,
            selector: None,
        })
        .resolve(&dev, 1)
        .unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].clusters, vec![cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL]);

        let all = BindingRequest::new(PolicyTarget::Endpoint(2)).resolve(&dev, 1).unwrap();
        assert_eq!(all[0].clusters, vec![cluster_id::ON_OFF, cluster_id::IAS_ZONE]);
    }

    #[test]
    fn store_clears_by_device_and_endpoint() {
        let dev = light();
        let mut store = PolicyStore::default();
        for policy in BindingRequest::new(PolicyTarget::All).resolve(&dev, 1).unwrap() {
            store.put_binding(policy);
        }
        assert_eq!(store.binding(Some(dev.short_addr)).len(), 2);
        assert_eq!(store.clear_binding(dev.short_addr, Some(1)), 1);
        assert_eq!(store.binding(None).len(), 1);
        assert_eq!(store.clear_binding(dev.short_addr, None), 1);
        assert!(store.binding(None).is_empty());
    }
}
