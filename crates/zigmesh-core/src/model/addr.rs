// ── Addressing and network identity ──
//
// Validated newtypes for mesh addresses and identity fields. Malformed
// input is rejected with `InvalidRange` before it reaches the radio.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;

/// Lowest and highest 2.4 GHz Zigbee channels.
pub const MIN_CHANNEL: u8 = 11;
pub const MAX_CHANNEL: u8 = 26;

// ── ShortAddr ───────────────────────────────────────────────────────

/// Transient 16-bit mesh address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortAddr(pub u16);

impl ShortAddr {
    pub const COORDINATOR: Self = Self(0x0000);

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// `false` for the coordinator, the "unknown" sentinel and broadcast.
    pub const fn is_remote_device(self) -> bool {
        !matches!(self.0, 0x0000 | 0xFFFE | 0xFFFF)
    }
}

impl fmt::Display for ShortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<u16> for ShortAddr {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl FromStr for ShortAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse::<u16>(),
        };
        parsed
            .map(Self)
            .map_err(|_| EngineError::invalid("short_addr", format!("'{s}' is not a 16-bit address")))
    }
}

// ── 64-bit identifiers ──────────────────────────────────────────────

fn parse_hex8(field: &str, s: &str) -> Result<[u8; 8], EngineError> {
    let compact: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    if compact.len() != 16 {
        return Err(EngineError::invalid(field, "expected 16 hex characters"));
    }
    let mut out = [0u8; 8];
    for (i, byte) in out.iter_mut().enumerate() {
        let pair = compact
            .get(i * 2..i * 2 + 2)
            .ok_or_else(|| EngineError::invalid(field, "expected 16 hex characters"))?;
        *byte = u8::from_str_radix(pair, 16)
            .map_err(|_| EngineError::invalid(field, format!("'{s}' is not hexadecimal")))?;
    }
    Ok(out)
}

fn write_hex8(bytes: &[u8; 8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 8]);

        impl $name {
            pub const fn bytes(&self) -> [u8; 8] {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write_hex8(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex8($field, s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_identifier!(
    /// 64-bit IEEE (EUI-64) device address.
    IeeeAddr,
    "ieee_addr"
);

hex_identifier!(
    /// 64-bit extended PAN identifier.
    ExtendedPanId,
    "extended_pan_id"
);

// ── PanId ───────────────────────────────────────────────────────────

/// 16-bit PAN identifier in `0x0001..=0xFFFE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PanId(u16);

impl PanId {
    pub fn new(raw: u16) -> Result<Self, EngineError> {
        if raw == 0x0000 || raw == 0xFFFF {
            return Err(EngineError::invalid(
                "pan_id",
                format!("0x{raw:04X} outside 0x0001..=0xFFFE"),
            ));
        }
        Ok(Self(raw))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for PanId {
    type Error = EngineError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<PanId> for u16 {
    fn from(pan: PanId) -> Self {
        pan.0
    }
}

impl fmt::Display for PanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl FromStr for PanId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = ShortAddr::from_str(s)
            .map_err(|_| EngineError::invalid("pan_id", format!("'{s}' is not a 16-bit value")))?;
        Self::new(raw.0)
    }
}

// ── ChannelMask ─────────────────────────────────────────────────────

/// Bitset over channels 11–26 (bit `n` set = channel `n` allowed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChannelMask(u32);

impl ChannelMask {
    /// Every 2.4 GHz channel.
    pub const ALL: Self = Self(0x07FF_F800);

    pub fn new(raw: u32) -> Result<Self, EngineError> {
        if raw == 0 {
            return Err(EngineError::invalid("channel_mask", "mask selects no channel"));
        }
        if raw & !Self::ALL.0 != 0 {
            return Err(EngineError::invalid(
                "channel_mask",
                format!("0x{raw:08X} has bits outside channels 11..=26"),
            ));
        }
        Ok(Self(raw))
    }

    /// Mask with exactly one channel.
    pub fn single(channel: u8) -> Result<Self, EngineError> {
        validate_channel("channel", channel)?;
        Ok(Self(1u32 << channel))
    }

    pub fn from_channels(channels: impl IntoIterator<Item = u8>) -> Result<Self, EngineError> {
        let mut raw = 0u32;
        for channel in channels {
            validate_channel("channel_mask", channel)?;
            raw |= 1u32 << channel;
        }
        Self::new(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn contains(self, channel: u8) -> bool {
        (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) && self.0 & (1u32 << channel) != 0
    }

    /// Ascending channel list.
    pub fn channels(self) -> Vec<u8> {
        (MIN_CHANNEL..=MAX_CHANNEL)
            .filter(|ch| self.contains(*ch))
            .collect()
    }

    /// The channel when exactly one bit is set.
    pub fn single_channel(self) -> Option<u8> {
        if self.0.count_ones() != 1 {
            return None;
        }
        u8::try_from(self.0.trailing_zeros()).ok()
    }
}

impl TryFrom<u32> for ChannelMask {
    type Error = EngineError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<ChannelMask> for u32 {
    fn from(mask: ChannelMask) -> Self {
        mask.0
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Reject channels outside 11–26.
pub fn validate_channel(field: &str, channel: u8) -> Result<u8, EngineError> {
    if (MIN_CHANNEL..=MAX_CHANNEL).contains(&channel) {
        Ok(channel)
    } else {
        Err(EngineError::invalid(
            field,
            format!("channel {channel} outside {MIN_CHANNEL}..={MAX_CHANNEL}"),
        ))
    }
}

/// Validate and deduplicate a channel list, keeping first-seen order.
pub fn normalize_channel_list(field: &str, channels: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut out: Vec<u8> = Vec::with_capacity(channels.len());
    for &channel in channels {
        validate_channel(field, channel)?;
        if !out.contains(&channel) {
            out.push(channel);
        }
    }
    Ok(out)
}
