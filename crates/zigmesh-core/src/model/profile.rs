// ── Network identity model ──
//
// Role, commissioning mode and the persisted network profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::addr::{ChannelMask, ExtendedPanId, PanId};

/// Role this node plays in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    #[default]
    Coordinator,
    Router,
    EndDevice,
}

impl Role {
    /// Routers and end devices join; only the coordinator forms.
    pub const fn is_node(self) -> bool {
        matches!(self, Self::Router | Self::EndDevice)
    }
}

/// How the network identity is chosen on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkMode {
    /// Channel picked dynamically, PAN identity left to the stack.
    #[default]
    Auto,
    /// Operator-supplied identity applied verbatim every start.
    Fixed,
    /// Reuse a learned profile, falling back to auto selection.
    Guided,
}

impl NetworkMode {
    pub const fn profile_source(self) -> ProfileSource {
        match self {
            Self::Auto => ProfileSource::Auto,
            Self::Fixed => ProfileSource::Fixed,
            Self::Guided => ProfileSource::Guided,
        }
    }
}

/// Where the cached profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProfileSource {
    #[default]
    Auto,
    Fixed,
    Guided,
    Restored,
}

/// Last known or desired network identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub channel_mask: Option<ChannelMask>,
    pub pan_id: Option<PanId>,
    pub extended_pan_id: Option<ExtendedPanId>,
    #[serde(default = "restored_source")]
    pub source: ProfileSource,
    pub formed_at: Option<DateTime<Utc>>,
}

fn restored_source() -> ProfileSource {
    ProfileSource::Restored
}

/// Partial profile update; `None` fields leave the profile untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub channel_mask: Option<ChannelMask>,
    pub pan_id: Option<PanId>,
    pub extended_pan_id: Option<ExtendedPanId>,
    pub source: Option<ProfileSource>,
    pub formed_at: Option<DateTime<Utc>>,
}

impl NetworkProfile {
    pub fn apply(&mut self, update: ProfileUpdate) {
        if let Some(mask) = update.channel_mask {
            self.channel_mask = Some(mask);
        }
        if let Some(pan) = update.pan_id {
            self.pan_id = Some(pan);
        }
        if let Some(ext) = update.extended_pan_id {
            self.extended_pan_id = Some(ext);
        }
        if let Some(source) = update.source {
            self.source = source;
        }
        if let Some(at) = update.formed_at {
            self.formed_at = Some(at);
        }
    }

    /// The single channel, when the mask pins exactly one.
    pub fn channel(&self) -> Option<u8> {
        self.channel_mask.and_then(ChannelMask::single_channel)
    }

    pub fn is_empty(&self) -> bool {
        self.channel_mask.is_none() && self.pan_id.is_none() && self.extended_pan_id.is_none()
    }
}
