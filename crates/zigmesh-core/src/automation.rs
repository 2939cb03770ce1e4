// ── Post-discovery automation ──
//
// Built-in reporting presets and default bindings applied to a device
// right after it is discovered. Failures are counted, never raised.

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{DiscoveredDevice, IeeeAddr};
use crate::policy::{
    BINDABLE_CLUSTERS, BindStatus, BindingPolicy, ReportingPolicy, ReportingPreset, apply_binding,
    apply_reporting,
};
use crate::radio::{Capabilities, Radio};

/// Automation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutomationStats {
    pub reporting_applied: u64,
    pub reporting_failed: u64,
    pub bind_attempted: u64,
    pub bind_skipped: u64,
    pub bind_failed: u64,
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// What automation should do for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomationPlan {
    pub configure_reporting: bool,
    pub bind: bool,
    pub local_ieee: Option<IeeeAddr>,
    pub local_endpoint: u8,
}

/// Apply presets and bindings for a newly discovered device.
pub fn run<R: Radio + ?Sized>(
    radio: &mut R,
    caps: &Capabilities,
    device: &DiscoveredDevice,
    plan: &AutomationPlan,
    stats: &mut AutomationStats,
) {
    if plan.configure_reporting {
        for feature in device.features() {
            let Some(preset) = ReportingPreset::for_feature(feature) else {
                continue;
            };
            for &endpoint in device.feature_endpoints(feature) {
                let policy = ReportingPolicy {
                    short_addr: device.short_addr,
                    endpoint,
                    preset: Some(preset),
                    low_power: false,
                    entries: preset.entries(),
                };
                let report = apply_reporting(radio, caps, &policy);
                stats.reporting_applied += count(report.applied);
                stats.reporting_failed += count(report.failed);
            }
        }
    }

    if plan.bind {
        for cluster in BINDABLE_CLUSTERS {
            for &endpoint in device.endpoints_for(cluster) {
                let policy = BindingPolicy {
                    short_addr: device.short_addr,
                    endpoint,
                    clusters: vec![cluster],
                    dst_ieee: None,
                    dst_endpoint: plan.local_endpoint,
                    ias_enroll: true,
                };
                let report = apply_binding(radio, caps, &policy, device.ieee_addr(), plan.local_ieee);
                match report.status {
                    BindStatus::Skipped => {
                        debug!(short_addr = %device.short_addr, cluster, reason = ?report.reason, "bind skipped");
                        stats.bind_skipped += 1;
                    }
                    _ => {
                        stats.bind_attempted += 1;
                        stats.bind_failed += count(report.failed_count());
                    }
                }
            }
        }
    }

    info!(
        short_addr = %device.short_addr,
        reporting_applied = stats.reporting_applied,
        bind_attempted = stats.bind_attempted,
        "post-discovery automation finished"
    );
}
