// ── Channel selector ──
//
// Deterministic scoring of 2.4 GHz Zigbee channels against observed
// Wi-Fi access points. Lower score wins; ties go to the operator's
// preferred order, then the channel number.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::EngineError;
use crate::model::{ChannelMask, MAX_CHANNEL, MIN_CHANNEL};
use crate::radio::WifiSample;

/// Wi-Fi channels that exist in the 2.4 GHz band.
const WIFI_CHANNELS: std::ops::RangeInclusive<u8> = 1..=14;

/// Channels every vendor joins without special configuration.
const INTEROP_CHANNELS: [u8; 4] = [11, 15, 20, 25];

/// How the channel was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SelectionStrategy {
    WifiAware,
    PreferredFallback,
}

/// Per-candidate score breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelScore {
    pub channel: u8,
    pub interference: f64,
    pub penalty: f64,
    pub total: f64,
}

/// Inputs of one selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Restrict candidates to this mask.
    pub mask: Option<ChannelMask>,
    pub preferred: Vec<u8>,
    pub blacklist: Vec<u8>,
    pub wifi: Vec<WifiSample>,
}

/// Outcome surfaced for observability and applied on formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDecision {
    pub strategy: SelectionStrategy,
    pub selected_channel: u8,
    pub channel_mask: ChannelMask,
    pub wifi_scan_count: usize,
    pub candidates: Vec<u8>,
    pub blacklist: Vec<u8>,
    pub preferred: Vec<u8>,
    /// Ranked best first.
    pub scores: Vec<ChannelScore>,
}

/// Centre frequency of a Zigbee channel in MHz.
pub fn zigbee_center_mhz(channel: u8) -> f64 {
    2405.0 + f64::from(channel.saturating_sub(MIN_CHANNEL)) * 5.0
}

/// Centre frequency of a 2.4 GHz Wi-Fi channel in MHz.
pub fn wifi_center_mhz(channel: u8) -> f64 {
    2412.0 + f64::from(channel.saturating_sub(1)) * 5.0
}

/// Triangular spectral overlap: 1 within 2 MHz, 0 from 20 MHz apart.
pub fn overlap(zigbee_channel: u8, wifi_channel: u8) -> f64 {
    let delta = (zigbee_center_mhz(zigbee_channel) - wifi_center_mhz(wifi_channel)).abs();
    if delta >= 20.0 {
        0.0
    } else if delta <= 2.0 {
        1.0
    } else {
        (20.0 - delta) / 18.0
    }
}

/// Linear power of a dBm reading.
pub fn rssi_weight(rssi: i8) -> f64 {
    10f64.powf(f64::from(rssi) / 10.0)
}

/// Small bias toward the interop channels; channel 26 is often
/// power-limited.
pub fn channel_penalty(channel: u8) -> f64 {
    if INTEROP_CHANNELS.contains(&channel) {
        0.0
    } else if channel == MAX_CHANNEL {
        0.0005
    } else {
        0.0001
    }
}

/// Candidate channels: the mask minus the blacklist, or every channel
/// when that leaves nothing.
pub fn candidates(mask: Option<ChannelMask>, blacklist: &[u8]) -> Vec<u8> {
    let base = mask.unwrap_or(ChannelMask::ALL).channels();
    let filtered: Vec<u8> = base
        .into_iter()
        .filter(|ch| !blacklist.contains(ch))
        .collect();
    if filtered.is_empty() {
        ChannelMask::ALL.channels()
    } else {
        filtered
    }
}

/// Pick a channel.
pub fn select_channel(request: &ChannelRequest) -> Result<ChannelDecision, EngineError> {
    let candidates = candidates(request.mask, &request.blacklist);
    let wifi: Vec<WifiSample> = request
        .wifi
        .iter()
        .copied()
        .filter(|s| WIFI_CHANNELS.contains(&s.channel))
        .collect();
    let strategy = if wifi.is_empty() {
        SelectionStrategy::PreferredFallback
    } else {
        SelectionStrategy::WifiAware
    };

    let mut scores: Vec<ChannelScore> = candidates
        .iter()
        .map(|&channel| {
            let interference: f64 = wifi
                .iter()
                .map(|s| rssi_weight(s.rssi) * overlap(channel, s.channel))
                .sum();
            let penalty = channel_penalty(channel);
            ChannelScore {
                channel,
                interference,
                penalty,
                total: interference + penalty,
            }
        })
        .collect();

    let rank = |channel: u8| {
        request
            .preferred
            .iter()
            .position(|p| *p == channel)
            .unwrap_or(request.preferred.len() + 100)
    };
    scores.sort_by(|a, b| {
        a.total
            .total_cmp(&b.total)
            .then_with(|| rank(a.channel).cmp(&rank(b.channel)))
            .then_with(|| a.channel.cmp(&b.channel))
    });

    let best = scores
        .first()
        .map(|s| s.channel)
        .ok_or_else(|| EngineError::invalid("channel_mask", "no candidate channel"))?;

    Ok(ChannelDecision {
        strategy,
        selected_channel: best,
        channel_mask: ChannelMask::single(best)?,
        wifi_scan_count: wifi.len(),
        candidates,
        blacklist: request.blacklist.clone(),
        preferred: request.preferred.clone(),
        scores,
    })
}

impl ChannelDecision {
    pub fn score_of(&self, channel: u8) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.channel == channel)
            .map(|s| s.total)
    }
}
