// ── Actuator control ──
//
// High-level commands resolve to a feature endpoint, go out either as a
// cluster command or as an attribute write, and leave the expected
// value in the cache as non-authoritative `control` state.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, RadioResultExt};
use crate::model::{AttrValue, Feature, ShortAddr, StateSource, attr_id, cluster_id, zcl_type};
use crate::radio::Radio;
use crate::store::StateWrite;

use super::Engine;

/// ZCL lock state values.
const LOCK_STATE_LOCKED: i64 = 1;
const LOCK_STATE_UNLOCKED: i64 = 2;

/// IAS zone status bit for the primary alarm.
const IAS_ZONE_STATUS_ALARM1: i64 = 0x0001;

/// Lowest heating setpoint the thermostat cluster accepts (absolute zero).
const MIN_SETPOINT_CENTIDEGREES: i16 = -27_315;

/// Highest thermostat system mode (sleep).
const MAX_SYSTEM_MODE: u8 = 9;

/// High-level actuator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    On,
    Off,
    Toggle,
    /// Move to level with on/off; transition in tenths of a second.
    Level { level: u8, transition_ds: u16 },
    Lock,
    Unlock,
    /// Occupied heating setpoint in hundredths of a degree Celsius.
    HeatingSetpoint { centidegrees: i16 },
    /// Thermostat system mode (0 off, 1 auto, 3 cool, 4 heat, ...).
    SystemMode { mode: u8 },
    CoverLift { percent: u8 },
    CoverTilt { percent: u8 },
    /// Raise or clear the primary IAS zone alarm bit.
    IasAlarm { active: bool },
    ActivePower { watts: i16 },
    RmsVoltage { volts: u16 },
    RmsCurrent { milliamps: u16 },
    ColorXy { x: u16, y: u16, transition_ds: u16 },
    ColorTemperature { mireds: u16, transition_ds: u16 },
}

/// How a command reaches the device.
#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    Command {
        cluster: u16,
        command: u8,
        payload: Vec<u8>,
    },
    Write {
        cluster: u16,
        attr: u16,
        attr_type: u8,
        value: AttrValue,
    },
}

/// Delivery plus the cache entries to record once it is accepted.
#[derive(Debug, Clone, PartialEq)]
struct ControlPlan {
    delivery: Delivery,
    optimistic: Vec<(u16, u16, AttrValue)>,
}

fn le_payload(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn write(cluster: u16, attr: u16, attr_type: u8, value: i64) -> ControlPlan {
    ControlPlan {
        delivery: Delivery::Write {
            cluster,
            attr,
            attr_type,
            value: AttrValue::Int(value),
        },
        optimistic: vec![(cluster, attr, AttrValue::Int(value))],
    }
}

impl ControlCommand {
    pub const fn feature(self) -> Feature {
        match self {
            Self::On | Self::Off | Self::Toggle => Feature::OnOff,
            Self::Level { .. } => Feature::Level,
            Self::Lock | Self::Unlock => Feature::Lock,
            Self::HeatingSetpoint { .. } | Self::SystemMode { .. } => Feature::Thermostat,
            Self::CoverLift { .. } | Self::CoverTilt { .. } => Feature::Cover,
            Self::IasAlarm { .. } => Feature::IasZone,
            Self::ActivePower { .. } | Self::RmsVoltage { .. } | Self::RmsCurrent { .. } => Feature::Energy,
            Self::ColorXy { .. } | Self::ColorTemperature { .. } => Feature::Color,
        }
    }

    /// Resolve the command against the cached state of its endpoint.
    /// `cached(cluster, attr)` returns the last known value, if any.
    fn plan(self, cached: impl Fn(u16, u16) -> Option<AttrValue>) -> ControlPlan {
        let command = |cluster, command, payload, optimistic| ControlPlan {
            delivery: Delivery::Command {
                cluster,
                command,
                payload,
            },
            optimistic,
        };
        let on_off = |on: bool| vec![(cluster_id::ON_OFF, attr_id::ON_OFF, AttrValue::Bool(on))];

        match self {
            Self::Off => command(cluster_id::ON_OFF, 0x00, Vec::new(), on_off(false)),
            Self::On => command(cluster_id::ON_OFF, 0x01, Vec::new(), on_off(true)),
            Self::Toggle => {
                let flipped = cached(cluster_id::ON_OFF, attr_id::ON_OFF)
                    .and_then(|v| v.as_bool())
                    .map(|on| on_off(!on))
                    .unwrap_or_default();
                command(cluster_id::ON_OFF, 0x02, Vec::new(), flipped)
            }
            Self::Level {
                level,
                transition_ds,
            } => {
                let [lo, hi] = transition_ds.to_le_bytes();
                command(
                    cluster_id::LEVEL_CONTROL,
                    0x04,
                    vec![level, lo, hi],
                    vec![(
                        cluster_id::LEVEL_CONTROL,
                        attr_id::CURRENT_LEVEL,
                        AttrValue::Int(i64::from(level)),
                    )],
                )
            }
            Self::Lock => command(
                cluster_id::DOOR_LOCK,
                0x00,
                Vec::new(),
                vec![(cluster_id::DOOR_LOCK, attr_id::LOCK_STATE, AttrValue::Int(LOCK_STATE_LOCKED))],
            ),
            Self::Unlock => command(
                cluster_id::DOOR_LOCK,
                0x01,
                Vec::new(),
                vec![(cluster_id::DOOR_LOCK, attr_id::LOCK_STATE, AttrValue::Int(LOCK_STATE_UNLOCKED))],
            ),
            Self::HeatingSetpoint { centidegrees } => write(
                cluster_id::THERMOSTAT,
                attr_id::THERMOSTAT_OCCUPIED_HEATING_SETPOINT,
                zcl_type::S16,
                i64::from(centidegrees.max(MIN_SETPOINT_CENTIDEGREES)),
            ),
            Self::SystemMode { mode } => write(
                cluster_id::THERMOSTAT,
                attr_id::THERMOSTAT_SYSTEM_MODE,
                zcl_type::ENUM8,
                i64::from(mode.min(MAX_SYSTEM_MODE)),
            ),
            Self::CoverLift { percent } => write(
                cluster_id::WINDOW_COVERING,
                attr_id::COVER_LIFT_PERCENTAGE,
                zcl_type::U8,
                i64::from(percent.min(100)),
            ),
            Self::CoverTilt { percent } => write(
                cluster_id::WINDOW_COVERING,
                attr_id::COVER_TILT_PERCENTAGE,
                zcl_type::U8,
                i64::from(percent.min(100)),
            ),
            Self::IasAlarm { active } => {
                let current = cached(cluster_id::IAS_ZONE, attr_id::IAS_ZONE_STATUS)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
                    & 0xFFFF;
                let status = if active {
                    current | IAS_ZONE_STATUS_ALARM1
                } else {
                    current & !IAS_ZONE_STATUS_ALARM1
                };
                write(cluster_id::IAS_ZONE, attr_id::IAS_ZONE_STATUS, zcl_type::BITMAP16, status)
            }
            Self::ActivePower { watts } => write(
                cluster_id::ELECTRICAL_MEASUREMENT,
                attr_id::ACTIVE_POWER,
                zcl_type::S16,
                i64::from(watts),
            ),
            Self::RmsVoltage { volts } => write(
                cluster_id::ELECTRICAL_MEASUREMENT,
                attr_id::RMS_VOLTAGE,
                zcl_type::U16,
                i64::from(volts),
            ),
            Self::RmsCurrent { milliamps } => write(
                cluster_id::ELECTRICAL_MEASUREMENT,
                attr_id::RMS_CURRENT,
                zcl_type::U16,
                i64::from(milliamps),
            ),
            Self::ColorXy { x, y, transition_ds } => command(
                cluster_id::COLOR_CONTROL,
                0x07,
                le_payload(&[x, y, transition_ds]),
                vec![
                    (cluster_id::COLOR_CONTROL, attr_id::COLOR_CURRENT_X, AttrValue::Int(i64::from(x))),
                    (cluster_id::COLOR_CONTROL, attr_id::COLOR_CURRENT_Y, AttrValue::Int(i64::from(y))),
                ],
            ),
            Self::ColorTemperature {
                mireds,
                transition_ds,
            } => command(
                cluster_id::COLOR_CONTROL,
                0x0A,
                le_payload(&[mireds, transition_ds]),
                vec![(
                    cluster_id::COLOR_CONTROL,
                    attr_id::COLOR_TEMPERATURE_MIREDS,
                    AttrValue::Int(i64::from(mireds)),
                )],
            ),
        }
    }
}

impl<R: Radio> Engine<R> {
    /// Send a control command to the selected feature endpoint and
    /// record the expected state optimistically. Returns the endpoint
    /// used.
    pub fn control(
        &mut self,
        short_addr: ShortAddr,
        command: ControlCommand,
        selector: Option<u8>,
    ) -> Result<u8, EngineError> {
        let now = self.now();
        let device = self.device(short_addr)?;
        let endpoint = device.select_feature_endpoint(command.feature(), selector)?;
        let plan = command.plan(|cluster, attr| {
            device
                .read_state(now, Some(endpoint), cluster, attr, true)
                .ok()
                .flatten()
                .map(|entry| entry.value)
        });

        match &plan.delivery {
            Delivery::Command {
                cluster,
                command: command_id,
                payload,
            } => self
                .radio
                .send_command(short_addr, endpoint, *cluster, *command_id, payload)
                .op("send_command")?,
            Delivery::Write {
                cluster,
                attr,
                attr_type,
                value,
            } => self
                .radio
                .write_attribute(short_addr, endpoint, *cluster, *attr, *attr_type, value)
                .op("write_attribute")?,
        }
        debug!(short_addr = %short_addr, endpoint, ?command, "control command sent");

        let device = self.device_mut(short_addr)?;
        for (cluster, attr, value) in plan.optimistic {
            device.write_state(
                now,
                StateWrite::new(Some(endpoint), cluster, attr, value, StateSource::Control),
            );
        }
        Ok(endpoint)
    }
}
