// ── Persistence ──
//
// Dump and restore of the profile and registry, and the throttled JSON
// file save driven by `tick()`.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{elapsed, millis};
use crate::error::EngineError;
use crate::radio::Radio;
use crate::store::{DeviceRecord, RegistrySnapshot, SNAPSHOT_SCHEMA_VERSION};

use super::Engine;

/// Result of `save()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved { count: usize },
    /// The previous save is younger than `persistence_min_interval`.
    Throttled { age_ms: u64 },
}

impl<R: Radio> Engine<R> {
    /// Capture the profile and every known device.
    pub fn dump(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: self.now(),
            network_mode: self.mode,
            network_profile: self.profile.clone(),
            self_heal_policy: self.config.self_heal,
            devices: self.registry.iter().map(DeviceRecord::from_device).collect(),
        }
    }

    /// Load a snapshot. `merge` keeps devices that are not in it;
    /// otherwise the registry is replaced. Every restored device takes
    /// the engine's current state policy. Returns the number of devices
    /// restored.
    pub fn restore(&mut self, snapshot: RegistrySnapshot, merge: bool) -> usize {
        if !merge {
            self.registry.clear();
        }
        if !snapshot.network_profile.is_empty() && (!merge || self.profile.is_empty()) {
            self.profile = snapshot.network_profile;
        }

        let policy = self.config.state_policy();
        let mut restored = 0;
        let mut skipped = 0;
        for record in snapshot.devices {
            let short_addr = record.short_addr;
            match record.into_device(policy) {
                Some(device) => {
                    self.registry.insert(device);
                    restored += 1;
                }
                None => {
                    warn!(short_addr = %short_addr, "skipping invalid device record");
                    skipped += 1;
                }
            }
        }
        info!(restored, skipped, merge, "registry restored");
        restored
    }

    /// Write the snapshot to `persistence_path`. Unless `force`d, a save
    /// within `persistence_min_interval` of the last one is skipped.
    pub fn save(&mut self, force: bool) -> Result<SaveOutcome, EngineError> {
        let path = self
            .config
            .persistence_path
            .clone()
            .ok_or(EngineError::PersistenceUnconfigured)?;
        let now = self.now();
        if !force {
            if let Some(last) = self.last_saved_at {
                let age = elapsed(now, last);
                if age < self.config.persistence_min_interval {
                    return Ok(SaveOutcome::Throttled { age_ms: millis(age) });
                }
            }
        }

        let snapshot = self.dump();
        let count = snapshot.devices.len();
        snapshot.write_file(&path)?;
        self.last_saved_at = Some(now);
        info!(path = %path.display(), count, "snapshot saved");
        Ok(SaveOutcome::Saved { count })
    }

    /// Read `persistence_path` and restore it.
    pub fn load(&mut self, merge: bool) -> Result<usize, EngineError> {
        let path = self
            .config
            .persistence_path
            .clone()
            .ok_or(EngineError::PersistenceUnconfigured)?;
        let (snapshot, skipped) = RegistrySnapshot::read_file(&path)?;
        if skipped > 0 {
            warn!(path = %path.display(), skipped, "snapshot had malformed device rows");
        }
        Ok(self.restore(snapshot, merge))
    }

    /// Time since the last successful save.
    pub fn last_save_age(&self) -> Option<Duration> {
        self.last_saved_at.map(|at| elapsed(self.now(), at))
    }
}
