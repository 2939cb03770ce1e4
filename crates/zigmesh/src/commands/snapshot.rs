//! Snapshot command handlers.
//!
//! Read-only views over a persisted registry snapshot. Ages and online
//! state are evaluated at the snapshot's save time, not at "now".

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;
use zigmesh_core::model::{Lifecycle, ProfileSource};
use zigmesh_core::{
    DiscoveredDevice, IeeeAddr, NetworkMode, NetworkProfile, RegistrySnapshot, SelfHealPolicy,
    ShortAddr,
};

use crate::cli::{GlobalOpts, SnapshotArgs, SnapshotCommand};
use crate::error::CliError;
use crate::output;

// ── Loaded snapshot ─────────────────────────────────────────────────

struct Loaded {
    path: PathBuf,
    snapshot: RegistrySnapshot,
    devices: Vec<DiscoveredDevice>,
    skipped: usize,
    offline_after: Duration,
}

impl Loaded {
    fn at(&self) -> DateTime<Utc> {
        self.snapshot.saved_at
    }
}

fn load(file: Option<PathBuf>, global: &GlobalOpts) -> Result<Loaded, CliError> {
    let cfg = super::load_config(global)?;
    let path = file
        .or_else(|| cfg.engine.persistence_path.clone())
        .ok_or_else(|| CliError::NoSnapshot {
            config_path: super::config_file(global).display().to_string(),
        })?;

    let (snapshot, mut skipped) =
        RegistrySnapshot::read_file(&path).map_err(|source| CliError::Snapshot {
            path: path.display().to_string(),
            source,
        })?;

    let mut devices = Vec::with_capacity(snapshot.devices.len());
    for record in snapshot.devices.iter().cloned() {
        let policy = record.state_policy;
        match record.into_device(policy) {
            Some(device) => devices.push(device),
            None => skipped += 1,
        }
    }
    devices.sort_by_key(|d| d.short_addr);
    tracing::debug!(
        path = %path.display(),
        devices = devices.len(),
        skipped,
        "snapshot loaded"
    );

    Ok(Loaded {
        path,
        snapshot,
        devices,
        skipped,
        offline_after: Duration::from_millis(cfg.engine.offline_after_ms),
    })
}

// ── Views ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Summary {
    path: PathBuf,
    schema_version: u32,
    saved_at: DateTime<Utc>,
    network_mode: NetworkMode,
    channel: Option<u8>,
    pan_id: Option<String>,
    extended_pan_id: Option<String>,
    profile_source: ProfileSource,
    devices: usize,
    online: usize,
    skipped_rows: usize,
    self_heal: SelfHealPolicy,
}

#[derive(Serialize)]
struct DeviceView {
    short_addr: ShortAddr,
    ieee_addr: Option<IeeeAddr>,
    manufacturer_code: Option<u16>,
    profile_id: Option<u16>,
    device_id: Option<u16>,
    endpoints: Vec<u8>,
    features: Vec<String>,
    online: bool,
    last_seen: DateTime<Utc>,
    last_seen_source: Option<String>,
}

impl DeviceView {
    fn new(device: &DiscoveredDevice, loaded: &Loaded) -> Self {
        let presence = device.presence();
        Self {
            short_addr: device.short_addr,
            ieee_addr: device.ieee_addr(),
            manufacturer_code: device.identity.manufacturer_code,
            profile_id: device.identity.profile_id(),
            device_id: device.identity.device_id(),
            endpoints: device.endpoints(),
            features: device.features().iter().map(ToString::to_string).collect(),
            online: device.is_online(loaded.at(), loaded.offline_after),
            last_seen: presence.last_seen,
            last_seen_source: presence.last_seen_source.clone(),
        }
    }
}

#[derive(Serialize)]
struct StateView {
    endpoint: u8,
    cluster: u16,
    attr: u16,
    value: String,
    source: String,
    authoritative: bool,
    updated_at: DateTime<Utc>,
    stale: bool,
}

#[derive(Serialize)]
struct DeviceDetail {
    #[serde(flatten)]
    device: DeviceView,
    lifecycle: Lifecycle,
    state: Vec<StateView>,
}

fn state_views(device: &DiscoveredDevice, at: DateTime<Utc>) -> Vec<StateView> {
    let ttl = device.policy().ttl;
    device
        .state_by_endpoint()
        .iter()
        .map(|(key, entry)| {
            let age = (at - entry.meta.updated_at).to_std().unwrap_or_default();
            StateView {
                endpoint: key.endpoint,
                cluster: key.cluster,
                attr: key.attr,
                value: entry.value.to_string(),
                source: entry.meta.source.to_string(),
                authoritative: entry.meta.authoritative,
                updated_at: entry.meta.updated_at,
                stale: !ttl.is_zero() && age > ttl,
            }
        })
        .collect()
}

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Short")]
    short_addr: String,
    #[tabled(rename = "IEEE")]
    ieee_addr: String,
    #[tabled(rename = "Mfr")]
    manufacturer: String,
    #[tabled(rename = "Endpoints")]
    endpoints: String,
    #[tabled(rename = "Features")]
    features: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "EP")]
    endpoint: u8,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Attr")]
    attr: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Stale")]
    stale: String,
}

fn hex16(v: Option<u16>) -> String {
    v.map_or_else(|| "-".into(), |v| format!("0x{v:04X}"))
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

fn device_row(v: &DeviceView, color: bool) -> DeviceRow {
    DeviceRow {
        short_addr: v.short_addr.to_string(),
        ieee_addr: v.ieee_addr.map_or_else(|| "-".into(), |i| i.to_string()),
        manufacturer: hex16(v.manufacturer_code),
        endpoints: join(&v.endpoints),
        features: join(&v.features),
        state: output::status(if v.online { "online" } else { "offline" }, v.online, color),
        last_seen: v.last_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

fn summary_detail(s: &Summary, color: bool) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    [
        format!("{} {}", output::label("File:      ", color), s.path.display()),
        format!("{} {}", output::label("Schema:    ", color), s.schema_version),
        format!("{} {}", output::label("Saved:     ", color), s.saved_at.to_rfc3339()),
        format!("{} {}", output::label("Mode:      ", color), s.network_mode),
        format!(
            "{} {}",
            output::label("Channel:   ", color),
            s.channel.map_or_else(|| "-".into(), |c| c.to_string())
        ),
        format!("{} {}", output::label("PAN ID:    ", color), opt(&s.pan_id)),
        format!("{} {}", output::label("Ext PAN:   ", color), opt(&s.extended_pan_id)),
        format!("{} {}", output::label("Source:    ", color), s.profile_source),
        format!(
            "{} {} ({} online, {} skipped)",
            output::label("Devices:   ", color),
            s.devices,
            s.online,
            s.skipped_rows
        ),
        format!(
            "{} {} (retries {}, backoff {}-{} ms)",
            output::label("Self-heal: ", color),
            output::status(
                if s.self_heal.enabled { "enabled" } else { "disabled" },
                s.self_heal.enabled,
                color
            ),
            s.self_heal.retry_max,
            s.self_heal.retry_base.as_millis(),
            s.self_heal.retry_max_backoff.as_millis()
        ),
    ]
    .join("\n")
}

fn device_detail(d: &DeviceDetail, color: bool) -> String {
    let v = &d.device;
    let mut lines = vec![
        format!("{} {}", output::label("Short:     ", color), v.short_addr),
        format!(
            "{} {}",
            output::label("IEEE:      ", color),
            v.ieee_addr.map_or_else(|| "-".into(), |i| i.to_string())
        ),
        format!("{} {}", output::label("Mfr:       ", color), hex16(v.manufacturer_code)),
        format!("{} {}", output::label("Profile:   ", color), hex16(v.profile_id)),
        format!("{} {}", output::label("Device ID: ", color), hex16(v.device_id)),
        format!("{} {}", output::label("Endpoints: ", color), join(&v.endpoints)),
        format!("{} {}", output::label("Features:  ", color), join(&v.features)),
        format!(
            "{} {}",
            output::label("State:     ", color),
            output::status(if v.online { "online" } else { "offline" }, v.online, color)
        ),
        format!(
            "{} {} ({})",
            output::label("Last seen: ", color),
            v.last_seen.to_rfc3339(),
            v.last_seen_source.as_deref().unwrap_or("-")
        ),
    ];
    if let Some(reason) = &d.lifecycle.offline_reason {
        lines.push(format!("{} {reason}", output::label("Offline:   ", color)));
    }
    if !d.state.is_empty() {
        let rows: Vec<StateRow> = d
            .state
            .iter()
            .map(|s| StateRow {
                endpoint: s.endpoint,
                cluster: format!("0x{:04X}", s.cluster),
                attr: format!("0x{:04X}", s.attr),
                value: s.value.clone(),
                source: s.source.clone(),
                stale: if s.stale { "yes".into() } else { String::new() },
            })
            .collect();
        lines.push(String::new());
        lines.push(output::render_table(&rows));
    }
    lines.join("\n")
}

fn profile_detail(p: &NetworkProfile, color: bool) -> String {
    [
        format!(
            "{} {}",
            output::label("Channel:   ", color),
            p.channel().map_or_else(|| "-".into(), |c| c.to_string())
        ),
        format!(
            "{} {}",
            output::label("Mask:      ", color),
            p.channel_mask.map_or_else(|| "-".into(), |m| m.to_string())
        ),
        format!(
            "{} {}",
            output::label("PAN ID:    ", color),
            p.pan_id.map_or_else(|| "-".into(), |v| v.to_string())
        ),
        format!(
            "{} {}",
            output::label("Ext PAN:   ", color),
            p.extended_pan_id.map_or_else(|| "-".into(), |v| v.to_string())
        ),
        format!("{} {}", output::label("Source:    ", color), p.source),
        format!(
            "{} {}",
            output::label("Formed:    ", color),
            p.formed_at.map_or_else(|| "-".into(), |t| t.to_rfc3339())
        ),
    ]
    .join("\n")
}

// ── Lookup ──────────────────────────────────────────────────────────

/// Match a 16-hex-digit IEEE address, else a short address.
fn find<'a>(loaded: &'a Loaded, addr: &str) -> Result<&'a DiscoveredDevice, CliError> {
    let not_found = || CliError::NotFound {
        resource_type: "device".into(),
        identifier: addr.into(),
        list_command: "snapshot devices".into(),
    };

    if let Ok(ieee) = IeeeAddr::from_str(addr) {
        let matches: Vec<&DiscoveredDevice> = loaded
            .devices
            .iter()
            .filter(|d| d.ieee_addr() == Some(ieee))
            .collect();
        return match matches.as_slice() {
            [] => Err(not_found()),
            [one] => Ok(one),
            many => Err(CliError::Ambiguous {
                identifier: addr.into(),
                count: many.len(),
            }),
        };
    }

    let short = ShortAddr::from_str(addr)?;
    loaded
        .devices
        .iter()
        .find(|d| d.short_addr == short)
        .ok_or_else(not_found)
}

fn print(out: &str, global: &GlobalOpts) {
    output::print_output(out, global.quiet);
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: SnapshotArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let loaded = load(args.file, global)?;
    let color = output::should_color(&global.color);

    match args.command {
        SnapshotCommand::Show => {
            let profile = &loaded.snapshot.network_profile;
            let summary = Summary {
                path: loaded.path.clone(),
                schema_version: loaded.snapshot.schema_version,
                saved_at: loaded.at(),
                network_mode: loaded.snapshot.network_mode,
                channel: profile.channel(),
                pan_id: profile.pan_id.map(|p| p.to_string()),
                extended_pan_id: profile.extended_pan_id.map(|e| e.to_string()),
                profile_source: profile.source,
                devices: loaded.devices.len(),
                online: loaded
                    .devices
                    .iter()
                    .filter(|d| d.is_online(loaded.at(), loaded.offline_after))
                    .count(),
                skipped_rows: loaded.skipped,
                self_heal: loaded.snapshot.self_heal_policy,
            };
            let out = output::render_single(
                &global.output,
                &summary,
                |s| summary_detail(s, color),
                |s| display_path(&s.path),
            )?;
            print(&out, global);
        }

        SnapshotCommand::Devices { online } => {
            let views: Vec<DeviceView> = loaded
                .devices
                .iter()
                .map(|d| DeviceView::new(d, &loaded))
                .filter(|v| !online || v.online)
                .collect();
            let out = output::render_list(
                &global.output,
                &views,
                |v| device_row(v, color),
                |v| v.short_addr.to_string(),
            )?;
            print(&out, global);
        }

        SnapshotCommand::Device { addr } => {
            let device = find(&loaded, &addr)?;
            let detail = DeviceDetail {
                device: DeviceView::new(device, &loaded),
                lifecycle: device.lifecycle(loaded.at(), loaded.offline_after),
                state: state_views(device, loaded.at()),
            };
            let out = output::render_single(
                &global.output,
                &detail,
                |d| device_detail(d, color),
                |d| d.device.short_addr.to_string(),
            )?;
            print(&out, global);
        }

        SnapshotCommand::Profile => {
            let out = output::render_single(
                &global.output,
                &loaded.snapshot.network_profile,
                |p| profile_detail(p, color),
                |p| p.channel().map_or_else(String::new, |c| c.to_string()),
            )?;
            print(&out, global);
        }
    }
    Ok(())
}
