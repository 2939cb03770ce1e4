// ── Network identity resolution ──
//
// Decides, before a start, which channel mask and PAN identity to push
// to the stack for the effective mode and role. Fresh channel
// selection needs the radio, so it is returned as a plan step rather
// than performed here.

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::config::EngineConfig;
use crate::model::{ChannelMask, ExtendedPanId, NetworkMode, NetworkProfile, PanId};

/// Where the channel mask came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelSource {
    Explicit,
    RestoredProfile,
    AutoSelect,
    AutoJoin,
    GuidedExplicit,
    GuidedRestoredProfile,
    GuidedAutoSelect,
    GuidedAutoFallback,
}

/// How to obtain the channel mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPlan {
    /// Leave the stack's mask alone.
    Keep,
    /// Apply this mask.
    Use { mask: ChannelMask, source: ChannelSource },
    /// Run the channel selector, restricted by `restrict`.
    Select {
        restrict: Option<ChannelMask>,
        source: ChannelSource,
    },
}

/// Identity to apply before starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPlan {
    pub mode: NetworkMode,
    pub channel: ChannelPlan,
    pub pan_id: Option<PanId>,
    pub extended_pan_id: Option<ExtendedPanId>,
}

impl IdentityPlan {
    /// `fixed` requires the identity setters; other modes degrade.
    pub fn requires_identity_config(&self) -> bool {
        self.mode == NetworkMode::Fixed
            && (self.pan_id.is_some()
                || self.extended_pan_id.is_some()
                || matches!(self.channel, ChannelPlan::Use { .. }))
    }
}

/// Resolve the identity plan for one start.
pub fn plan_identity(config: &EngineConfig, profile: &NetworkProfile, form_network: bool) -> IdentityPlan {
    let mode = config.effective_mode();
    let is_node = config.role.is_node();

    let channel = match mode {
        NetworkMode::Fixed => match config.channel_mask {
            Some(mask) => ChannelPlan::Use {
                mask,
                source: ChannelSource::Explicit,
            },
            None => ChannelPlan::Keep,
        },
        NetworkMode::Auto if is_node => ChannelPlan::Use {
            mask: config.auto_join_channel_mask,
            source: ChannelSource::AutoJoin,
        },
        NetworkMode::Auto if form_network => match profile.channel_mask {
            Some(mask) => ChannelPlan::Use {
                mask,
                source: ChannelSource::RestoredProfile,
            },
            None => ChannelPlan::Select {
                restrict: config.auto_channel_mask,
                source: ChannelSource::AutoSelect,
            },
        },
        NetworkMode::Auto => ChannelPlan::Keep,
        NetworkMode::Guided => {
            if let Some(mask) = config.channel_mask {
                ChannelPlan::Use {
                    mask,
                    source: ChannelSource::GuidedExplicit,
                }
            } else if let Some(mask) = profile.channel_mask {
                ChannelPlan::Use {
                    mask,
                    source: ChannelSource::GuidedRestoredProfile,
                }
            } else if is_node {
                ChannelPlan::Use {
                    mask: config.auto_join_channel_mask,
                    source: ChannelSource::GuidedAutoFallback,
                }
            } else if form_network {
                ChannelPlan::Select {
                    restrict: config.auto_channel_mask,
                    source: ChannelSource::GuidedAutoSelect,
                }
            } else {
                ChannelPlan::Keep
            }
        }
    };

    let (pan_id, extended_pan_id) = match mode {
        NetworkMode::Auto => (None, None),
        NetworkMode::Fixed => (config.pan_id, config.extended_pan_id),
        NetworkMode::Guided => (
            config.pan_id.or(profile.pan_id),
            config.extended_pan_id.or(profile.extended_pan_id),
        ),
    };

    IdentityPlan {
        mode,
        channel,
        pan_id,
        extended_pan_id,
    }
}
