//! Channel command handlers.

use tabled::Tabled;
use zigmesh_core::channel::{ChannelDecision, ChannelRequest, ChannelScore, select_channel};
use zigmesh_core::model::normalize_channel_list;
use zigmesh_core::{ChannelMask, WifiSample};

use crate::cli::{ChannelArgs, ChannelCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ScoreRow {
    #[tabled(rename = "Rank")]
    rank: usize,
    #[tabled(rename = "Channel")]
    channel: u8,
    #[tabled(rename = "Wi-Fi")]
    interference: String,
    #[tabled(rename = "Penalty")]
    penalty: String,
    #[tabled(rename = "Score")]
    total: String,
}

fn score_rows(scores: &[ChannelScore]) -> Vec<ScoreRow> {
    scores
        .iter()
        .enumerate()
        .map(|(i, s)| ScoreRow {
            rank: i + 1,
            channel: s.channel,
            interference: format!("{:.3}", s.interference),
            penalty: format!("{:.3}", s.penalty),
            total: format!("{:.3}", s.total),
        })
        .collect()
}

fn detail(d: &ChannelDecision, color: bool) -> String {
    let join = |list: &[u8]| {
        if list.is_empty() {
            "-".to_string()
        } else {
            list.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
        }
    };
    let lines = [
        format!(
            "{} {}",
            output::label("Selected:  ", color),
            output::status(&d.selected_channel.to_string(), true, color)
        ),
        format!("{} {}", output::label("Mask:      ", color), d.channel_mask),
        format!(
            "{} {}",
            output::label("Strategy:  ", color),
            output::accent(&d.strategy.to_string(), color)
        ),
        format!("{} {}", output::label("Wi-Fi APs: ", color), d.wifi_scan_count),
        format!("{} {}", output::label("Candidates:", color), join(&d.candidates)),
        format!("{} {}", output::label("Blacklist: ", color), join(&d.blacklist)),
        String::new(),
        output::render_table(&score_rows(&d.scores)),
    ];
    lines.join("\n")
}

// ── Argument parsing ────────────────────────────────────────────────

/// Parse `CH:RSSI`, e.g. `6:-42`.
fn parse_wifi(raw: &str) -> Result<WifiSample, CliError> {
    let invalid = |reason: &str| CliError::Validation {
        field: "wifi".into(),
        reason: format!("'{raw}': {reason}"),
    };
    let (channel, rssi) = raw
        .split_once(':')
        .ok_or_else(|| invalid("expected CHANNEL:RSSI"))?;
    let channel: u8 = channel
        .trim()
        .parse()
        .map_err(|_| invalid("channel is not a number"))?;
    if !(1..=14).contains(&channel) {
        return Err(invalid("Wi-Fi channel must be 1-14"));
    }
    let rssi: i8 = rssi
        .trim()
        .parse()
        .map_err(|_| invalid("RSSI must be a dBm value between -128 and 127"))?;
    Ok(WifiSample { channel, rssi })
}

fn build_request(
    mask: Option<Vec<u8>>,
    preferred: Option<Vec<u8>>,
    blacklist: Option<Vec<u8>>,
    wifi: &[String],
    global: &GlobalOpts,
) -> Result<ChannelRequest, CliError> {
    let cfg = super::load_config(global)?;
    let network = cfg.network;

    let mask = match mask.or(network.auto_channels) {
        Some(list) => Some(ChannelMask::from_channels(list)?),
        None => None,
    };
    let preferred = preferred.unwrap_or(network.preferred_channels);
    let blacklist = blacklist.unwrap_or(network.blacklist);

    Ok(ChannelRequest {
        mask,
        preferred: normalize_channel_list("preferred", &preferred)?,
        blacklist: normalize_channel_list("blacklist", &blacklist)?,
        wifi: wifi
            .iter()
            .map(|raw| parse_wifi(raw))
            .collect::<Result<_, _>>()?,
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ChannelArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ChannelCommand::Select {
            mask,
            preferred,
            blacklist,
            wifi,
        } => {
            let request = build_request(mask, preferred, blacklist, &wifi, global)?;
            let decision = select_channel(&request)?;
            tracing::info!(
                channel = decision.selected_channel,
                strategy = %decision.strategy,
                wifi_scan_count = decision.wifi_scan_count,
                "channel selected"
            );

            let color = output::should_color(&global.color);
            let out = output::render_single(
                &global.output,
                &decision,
                |d| detail(d, color),
                |d| d.selected_channel.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
