// ── Clusters, attributes and feature tags ──
//
// Well-known ZCL identifiers used by the engine, and the mapping from a
// cluster to the logical feature it implies.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// ZCL cluster identifiers.
pub mod cluster_id {
    pub const BASIC: u16 = 0x0000;
    pub const POWER_CONFIG: u16 = 0x0001;
    pub const ON_OFF: u16 = 0x0006;
    pub const LEVEL_CONTROL: u16 = 0x0008;
    pub const DOOR_LOCK: u16 = 0x0101;
    pub const WINDOW_COVERING: u16 = 0x0102;
    pub const THERMOSTAT: u16 = 0x0201;
    pub const COLOR_CONTROL: u16 = 0x0300;
    pub const TEMPERATURE_MEASUREMENT: u16 = 0x0402;
    pub const PRESSURE_MEASUREMENT: u16 = 0x0403;
    pub const RELATIVE_HUMIDITY: u16 = 0x0405;
    pub const OCCUPANCY_SENSING: u16 = 0x0406;
    pub const IAS_ZONE: u16 = 0x0500;
    pub const ELECTRICAL_MEASUREMENT: u16 = 0x0B04;
}

/// ZCL attribute identifiers, grouped by cluster.
pub mod attr_id {
    pub const ON_OFF: u16 = 0x0000;
    pub const CURRENT_LEVEL: u16 = 0x0000;
    pub const LOCK_STATE: u16 = 0x0000;
    pub const COVER_LIFT_PERCENTAGE: u16 = 0x0008;
    pub const COVER_TILT_PERCENTAGE: u16 = 0x0009;
    pub const COLOR_CURRENT_X: u16 = 0x0003;
    pub const COLOR_CURRENT_Y: u16 = 0x0004;
    pub const COLOR_TEMPERATURE_MIREDS: u16 = 0x0007;
    pub const THERMOSTAT_LOCAL_TEMPERATURE: u16 = 0x0000;
    pub const THERMOSTAT_OCCUPIED_HEATING_SETPOINT: u16 = 0x0012;
    pub const THERMOSTAT_SYSTEM_MODE: u16 = 0x001C;
    pub const MEASURED_VALUE: u16 = 0x0000;
    pub const OCCUPANCY: u16 = 0x0000;
    pub const IAS_ZONE_STATUS: u16 = 0x0002;
    pub const IAS_CIE_ADDRESS: u16 = 0x0010;
    pub const RMS_VOLTAGE: u16 = 0x0505;
    pub const RMS_CURRENT: u16 = 0x0508;
    pub const ACTIVE_POWER: u16 = 0x050B;
}

/// ZCL data type tags.
pub mod zcl_type {
    pub const BOOL: u8 = 0x10;
    pub const BITMAP8: u8 = 0x18;
    pub const BITMAP16: u8 = 0x19;
    pub const U8: u8 = 0x20;
    pub const U16: u8 = 0x21;
    pub const S16: u8 = 0x29;
    pub const ENUM8: u8 = 0x30;
    pub const IEEE_ADDR: u8 = 0xF0;
}

/// Home Automation profile.
pub const PROFILE_HOME_AUTOMATION: u16 = 0x0104;

/// Endpoint reserved for Green Power proxies; skipped during discovery
/// unless explicitly requested.
pub const GREEN_POWER_ENDPOINT: u8 = 242;

/// Logical capability implied by the presence of an input cluster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    OnOff,
    Level,
    Color,
    Temperature,
    Humidity,
    Pressure,
    Occupancy,
    Lock,
    Cover,
    IasZone,
    Thermostat,
    Energy,
}

impl Feature {
    /// The cluster that implies this feature.
    pub const fn cluster(self) -> u16 {
        match self {
            Self::OnOff => cluster_id::ON_OFF,
            Self::Level => cluster_id::LEVEL_CONTROL,
            Self::Color => cluster_id::COLOR_CONTROL,
            Self::Temperature => cluster_id::TEMPERATURE_MEASUREMENT,
            Self::Humidity => cluster_id::RELATIVE_HUMIDITY,
            Self::Pressure => cluster_id::PRESSURE_MEASUREMENT,
            Self::Occupancy => cluster_id::OCCUPANCY_SENSING,
            Self::Lock => cluster_id::DOOR_LOCK,
            Self::Cover => cluster_id::WINDOW_COVERING,
            Self::IasZone => cluster_id::IAS_ZONE,
            Self::Thermostat => cluster_id::THERMOSTAT,
            Self::Energy => cluster_id::ELECTRICAL_MEASUREMENT,
        }
    }

    pub const fn from_cluster(cluster: u16) -> Option<Self> {
        match cluster {
            cluster_id::ON_OFF => Some(Self::OnOff),
            cluster_id::LEVEL_CONTROL => Some(Self::Level),
            cluster_id::COLOR_CONTROL => Some(Self::Color),
            cluster_id::TEMPERATURE_MEASUREMENT => Some(Self::Temperature),
            cluster_id::RELATIVE_HUMIDITY => Some(Self::Humidity),
            cluster_id::PRESSURE_MEASUREMENT => Some(Self::Pressure),
            cluster_id::OCCUPANCY_SENSING => Some(Self::Occupancy),
            cluster_id::DOOR_LOCK => Some(Self::Lock),
            cluster_id::WINDOW_COVERING => Some(Self::Cover),
            cluster_id::IAS_ZONE => Some(Self::IasZone),
            cluster_id::THERMOSTAT => Some(Self::Thermostat),
            cluster_id::ELECTRICAL_MEASUREMENT => Some(Self::Energy),
            _ => None,
        }
    }
}
