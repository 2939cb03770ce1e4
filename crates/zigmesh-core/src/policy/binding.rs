// ── Binding policy ──
//
// Which clusters to bind from a device endpoint to a destination, and
// the per-cluster application. IAS zones are also enrolled by writing
// the destination address into the CIE address attribute.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::warn;

use crate::error::{EngineError, RadioResultExt};
use crate::model::{AttrValue, Feature, IeeeAddr, ShortAddr, attr_id, cluster_id, zcl_type};
use crate::radio::{BindRequest, Capabilities, Radio};

/// Clusters auto-binding considers, in bind order.
pub const BINDABLE_CLUSTERS: [u16; 8] = [
    cluster_id::ON_OFF,
    cluster_id::LEVEL_CONTROL,
    cluster_id::THERMOSTAT,
    cluster_id::OCCUPANCY_SENSING,
    cluster_id::IAS_ZONE,
    cluster_id::ELECTRICAL_MEASUREMENT,
    cluster_id::WINDOW_COVERING,
    cluster_id::DOOR_LOCK,
];

/// Default cluster list for a capability.
pub fn default_bind_clusters(feature: Feature) -> Vec<u16> {
    match feature {
        Feature::OnOff => vec![cluster_id::ON_OFF],
        Feature::Level => vec![cluster_id::ON_OFF, cluster_id::LEVEL_CONTROL],
        Feature::Color => vec![
            cluster_id::ON_OFF,
            cluster_id::LEVEL_CONTROL,
            cluster_id::COLOR_CONTROL,
        ],
        other => vec![other.cluster()],
    }
}

/// A stored, resolved binding policy for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingPolicy {
    pub short_addr: ShortAddr,
    pub endpoint: u8,
    pub clusters: Vec<u16>,
    /// `None` binds to the local node.
    pub dst_ieee: Option<IeeeAddr>,
    pub dst_endpoint: u8,
    pub ias_enroll: bool,
}

/// Overall outcome of one binding apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BindStatus {
    Ok,
    Partial,
    Failed,
    Skipped,
}

/// One cluster's bind result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindResult {
    pub cluster: u16,
    pub ok: bool,
    pub error: Option<String>,
}

/// IAS CIE enrollment sub-result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollResult {
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingApplyReport {
    pub short_addr: ShortAddr,
    pub endpoint: u8,
    pub status: BindStatus,
    pub reason: Option<String>,
    pub results: Vec<BindResult>,
    pub enroll: Option<EnrollResult>,
}

impl BindingApplyReport {
    fn skipped(policy: &BindingPolicy, reason: &str) -> Self {
        Self {
            short_addr: policy.short_addr,
            endpoint: policy.endpoint,
            status: BindStatus::Skipped,
            reason: Some(reason.into()),
            results: Vec::new(),
            enroll: None,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.ok).count()
    }
}

/// Bind every cluster of `policy` from the device to the destination.
///
/// `src_ieee` is the device's own address and `local_ieee` the fallback
/// destination; without either the policy is skipped.
pub fn apply_binding<R: Radio + ?Sized>(
    radio: &mut R,
    caps: &Capabilities,
    policy: &BindingPolicy,
    src_ieee: Option<IeeeAddr>,
    local_ieee: Option<IeeeAddr>,
) -> BindingApplyReport {
    let Some(src_ieee) = src_ieee else {
        return BindingApplyReport::skipped(policy, "device IEEE address unknown");
    };
    let Some(dst_ieee) = policy.dst_ieee.or(local_ieee) else {
        return BindingApplyReport::skipped(policy, "destination IEEE address unknown");
    };

    let mut results = Vec::with_capacity(policy.clusters.len());
    for &cluster in &policy.clusters {
        let request = BindRequest {
            src_ieee,
            src_endpoint: policy.endpoint,
            cluster,
            dst_ieee,
            dst_endpoint: policy.dst_endpoint,
            req_dst_short: policy.short_addr,
        };
        let outcome = if caps.binding {
            radio.bind(&request).op("bind")
        } else {
            Err(EngineError::unavailable("bind"))
        };
        if let Err(e) = &outcome {
            warn!(short_addr = %policy.short_addr, cluster, error = %e, "bind failed");
        }
        results.push(BindResult {
            cluster,
            ok: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }

    let enroll = (policy.ias_enroll && policy.clusters.contains(&cluster_id::IAS_ZONE)).then(|| {
        let outcome = radio
            .write_attribute(
                policy.short_addr,
                policy.endpoint,
                cluster_id::IAS_ZONE,
                attr_id::IAS_CIE_ADDRESS,
                zcl_type::IEEE_ADDR,
                &AttrValue::Bytes(dst_ieee.bytes().to_vec()),
            )
            .op("write_cie_address");
        if let Err(e) = &outcome {
            warn!(short_addr = %policy.short_addr, error = %e, "IAS zone enrollment failed");
        }
        EnrollResult {
            ok: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        }
    });

    let ok = results.iter().filter(|r| r.ok).count();
    let status = if ok == results.len() {
        BindStatus::Ok
    } else if ok == 0 {
        BindStatus::Failed
    } else {
        BindStatus::Partial
    };

    BindingApplyReport {
        short_addr: policy.short_addr,
        endpoint: policy.endpoint,
        status,
        reason: None,
        results,
        enroll,
    }
}
