// ── Reporting policy ──
//
// Attribute reporting presets per capability, operator overrides merged
// by (cluster, attr), and per-entry application.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{debug, warn};

use crate::error::{EngineError, RadioResultExt};
use crate::model::{Feature, ShortAddr, attr_id, cluster_id, zcl_type};
use crate::radio::{Capabilities, Radio};

/// One configure-reporting record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportingEntry {
    pub cluster: u16,
    pub attr: u16,
    pub attr_type: u8,
    pub min_interval: u16,
    pub max_interval: u16,
    pub reportable_change: u32,
}

impl ReportingEntry {
    pub const fn new(
        cluster: u16,
        attr: u16,
        attr_type: u8,
        min_interval: u16,
        max_interval: u16,
        reportable_change: u32,
    ) -> Self {
        Self {
            cluster,
            attr,
            attr_type,
            min_interval,
            max_interval,
            reportable_change,
        }
    }
}

/// Built-in preset families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportingPreset {
    DoorLock,
    Thermostat,
    Occupancy,
    Contact,
    Motion,
    IasZone,
    Cover,
    Energy,
}

impl ReportingPreset {
    pub fn entries(self) -> Vec<ReportingEntry> {
        use cluster_id::{DOOR_LOCK, ELECTRICAL_MEASUREMENT, IAS_ZONE, OCCUPANCY_SENSING, THERMOSTAT, WINDOW_COVERING};
        match self {
            Self::DoorLock => vec![ReportingEntry::new(DOOR_LOCK, attr_id::LOCK_STATE, zcl_type::ENUM8, 0, 3600, 1)],
            Self::Thermostat => vec![
                ReportingEntry::new(THERMOSTAT, attr_id::THERMOSTAT_LOCAL_TEMPERATURE, zcl_type::S16, 10, 300, 50),
                ReportingEntry::new(
                    THERMOSTAT,
                    attr_id::THERMOSTAT_OCCUPIED_HEATING_SETPOINT,
                    zcl_type::S16,
                    5,
                    600,
                    50,
                ),
                ReportingEntry::new(THERMOSTAT, attr_id::THERMOSTAT_SYSTEM_MODE, zcl_type::ENUM8, 1, 3600, 1),
            ],
            Self::Occupancy => vec![ReportingEntry::new(
                OCCUPANCY_SENSING,
                attr_id::OCCUPANCY,
                zcl_type::BITMAP8,
                1,
                300,
                1,
            )],
            Self::Contact | Self::Motion | Self::IasZone => vec![ReportingEntry::new(
                IAS_ZONE,
                attr_id::IAS_ZONE_STATUS,
                zcl_type::BITMAP16,
                1,
                300,
                1,
            )],
            Self::Cover => vec![
                ReportingEntry::new(WINDOW_COVERING, attr_id::COVER_LIFT_PERCENTAGE, zcl_type::U8, 1, 300, 1),
                ReportingEntry::new(WINDOW_COVERING, attr_id::COVER_TILT_PERCENTAGE, zcl_type::U8, 1, 300, 1),
            ],
            Self::Energy => vec![
                ReportingEntry::new(ELECTRICAL_MEASUREMENT, attr_id::ACTIVE_POWER, zcl_type::S16, 5, 300, 1),
                ReportingEntry::new(ELECTRICAL_MEASUREMENT, attr_id::RMS_VOLTAGE, zcl_type::U16, 5, 300, 1),
                ReportingEntry::new(ELECTRICAL_MEASUREMENT, attr_id::RMS_CURRENT, zcl_type::U16, 5, 300, 1),
            ],
        }
    }

    /// Preset applied automatically for a discovered feature.
    pub const fn for_feature(feature: Feature) -> Option<Self> {
        match feature {
            Feature::Lock => Some(Self::DoorLock),
            Feature::Thermostat => Some(Self::Thermostat),
            Feature::Occupancy => Some(Self::Occupancy),
            Feature::IasZone => Some(Self::IasZone),
            Feature::Cover => Some(Self::Cover),
            Feature::Energy => Some(Self::Energy),
            _ => None,
        }
    }
}

/// Replace preset entries with matching overrides and append the rest,
/// keeping preset order first.
pub fn merge_overrides(preset: &[ReportingEntry], overrides: &[ReportingEntry]) -> Vec<ReportingEntry> {
    let mut merged: Vec<ReportingEntry> = preset
        .iter()
        .map(|entry| {
            overrides
                .iter()
                .rev()
                .find(|o| o.cluster == entry.cluster && o.attr == entry.attr)
                .copied()
                .unwrap_or(*entry)
        })
        .collect();
    for o in overrides {
        if !merged.iter().any(|m| m.cluster == o.cluster && m.attr == o.attr) {
            merged.push(*o);
        }
    }
    merged
}

/// Stretch intervals for battery devices.
pub fn apply_low_power(entries: &mut [ReportingEntry]) {
    for entry in entries {
        entry.min_interval = entry.min_interval.max(30);
        entry.max_interval = entry.max_interval.max(900).max(entry.min_interval);
    }
}

/// A stored, resolved reporting policy for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingPolicy {
    pub short_addr: ShortAddr,
    pub endpoint: u8,
    pub preset: Option<ReportingPreset>,
    pub low_power: bool,
    pub entries: Vec<ReportingEntry>,
}

/// Outcome of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryResult {
    pub cluster: u16,
    pub attr: u16,
    pub ok: bool,
    pub error: Option<String>,
}

/// Per-entry outcome of applying one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportingApplyReport {
    pub short_addr: ShortAddr,
    pub endpoint: u8,
    pub applied: usize,
    pub failed: usize,
    pub results: Vec<EntryResult>,
}

/// Issue one configure-reporting call per entry.
pub fn apply_reporting<R: Radio + ?Sized>(
    radio: &mut R,
    caps: &Capabilities,
    policy: &ReportingPolicy,
) -> ReportingApplyReport {
    let mut report = ReportingApplyReport {
        short_addr: policy.short_addr,
        endpoint: policy.endpoint,
        applied: 0,
        failed: 0,
        results: Vec::with_capacity(policy.entries.len()),
    };
    for entry in &policy.entries {
        let result = if caps.reporting {
            radio
                .configure_reporting(policy.short_addr, policy.endpoint, entry)
                .op("configure_reporting")
        } else {
            Err(EngineError::unavailable("configure_reporting"))
        };
        match result {
            Ok(()) => {
                report.applied += 1;
                report.results.push(EntryResult {
                    cluster: entry.cluster,
                    attr: entry.attr,
                    ok: true,
                    error: None,
                });
            }
            Err(e) => {
                warn!(
                    short_addr = %policy.short_addr,
                    endpoint = policy.endpoint,
                    cluster = entry.cluster,
                    attr = entry.attr,
                    error = %e,
                    "configure reporting failed"
                );
                report.failed += 1;
                report.results.push(EntryResult {
                    cluster: entry.cluster,
                    attr: entry.attr,
                    ok: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    debug!(
        short_addr = %policy.short_addr,
        applied = report.applied,
        failed = report.failed,
        "reporting policy applied"
    );
    report
}
