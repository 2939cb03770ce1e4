// ── Mesh engine ──
//
// Owns the radio adapter and every piece of host-side mesh state:
// registry, discovery queue, commissioning counters, self-heal and the
// policy store. Radio callbacks arrive on an unbounded channel and are
// folded in by `drain_events()` / `tick()` on the caller's task.

mod control;
mod devices;
mod discovery;
mod persist;
mod policy;
mod signals;
mod start;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::automation::AutomationStats;
use crate::channel::ChannelDecision;
use crate::clock::{Clock, SystemClock};
use crate::commissioning::{CommissioningStats, SelfHealStats};
use crate::config::EngineConfig;
use crate::discovery::{DiscoveryQueue, DiscoveryStats, ProcessReport};
use crate::error::EngineError;
use crate::event::{EngineEvent, EventStream};
use crate::model::{ChannelMask, IeeeAddr, NetworkMode, NetworkProfile, Role, ShortAddr};
use crate::policy::PolicyStore;
use crate::radio::{Capabilities, NetworkRuntime, Radio, RadioEvent};
use crate::store::DeviceRegistry;

pub use control::ControlCommand;
pub use persist::SaveOutcome;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Discovery items `tick()` processes per iteration.
pub const TICK_DISCOVERY_BATCH: usize = 4;

// ── NetworkInfo ─────────────────────────────────────────────────────

/// Live runtime snapshot merged with the cached profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkInfo {
    pub role: Role,
    pub mode: NetworkMode,
    pub started: bool,
    pub form_network: bool,
    pub short_addr: Option<ShortAddr>,
    pub ieee_addr: Option<IeeeAddr>,
    /// `None` when the stack cannot report its runtime identity.
    pub runtime: Option<NetworkRuntime>,
    pub profile: NetworkProfile,
    pub applied_channel_mask: Option<ChannelMask>,
    pub channel_decision: Option<ChannelDecision>,
}

/// What one `tick()` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub events: usize,
    pub discovery: ProcessReport,
    pub saved: Option<SaveOutcome>,
}

// ── Engine ──────────────────────────────────────────────────────────

/// Host-side mesh management engine.
///
/// All operations take `&mut self`; the engine is driven from a single
/// task. Adapters deliver callbacks through the [`EventSink`] registered
/// on start, and those are applied on the next `drain_events()` or
/// `tick()`.
///
/// [`EventSink`]: crate::radio::EventSink
pub struct Engine<R: Radio> {
    radio: R,
    caps: Capabilities,
    config: EngineConfig,
    clock: Arc<dyn Clock>,

    registry: DeviceRegistry,
    queue: DiscoveryQueue,
    policies: PolicyStore,

    profile: NetworkProfile,
    mode: NetworkMode,
    started: bool,
    form_network: bool,
    applied_mask: Option<ChannelMask>,
    last_channel: Option<ChannelDecision>,

    commissioning: CommissioningStats,
    self_heal: SelfHealStats,
    automation: AutomationStats,
    last_saved_at: Option<DateTime<Utc>>,

    radio_tx: mpsc::UnboundedSender<RadioEvent>,
    radio_rx: mpsc::UnboundedReceiver<RadioEvent>,
    event_tx: broadcast::Sender<Arc<EngineEvent>>,
}

impl<R: Radio> Engine<R> {
    /// Create an engine on the system clock. The config is normalized;
    /// only invalid channel lists are rejected.
    pub fn new(radio: R, config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_clock(radio, config, Arc::new(SystemClock))
    }

    /// Create an engine reading time from `clock`.
    pub fn with_clock(radio: R, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        let config = config.normalized()?;
        let caps = radio.capabilities();
        let (radio_tx, radio_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Ok(Self {
            registry: DeviceRegistry::new(config.max_devices),
            queue: DiscoveryQueue::new(
                config.discovery_queue_max,
                config.join_debounce,
                config.discovery_retry(),
            ),
            policies: PolicyStore::default(),
            profile: NetworkProfile::default(),
            mode: config.effective_mode(),
            started: false,
            form_network: false,
            applied_mask: None,
            last_channel: None,
            commissioning: CommissioningStats::default(),
            self_heal: SelfHealStats::default(),
            automation: AutomationStats::default(),
            last_saved_at: None,
            radio,
            caps,
            config,
            clock,
            radio_tx,
            radio_rx,
            event_tx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    /// Mode resolved by the last start.
    pub fn network_mode(&self) -> NetworkMode {
        self.mode
    }

    /// Subscribe to device and commissioning events.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_tx.subscribe())
    }

    // ── Observability ───────────────────────────────────────────────

    /// Form/join counters. `reset` clears them after the read.
    pub fn commissioning_stats(&mut self, reset: bool) -> CommissioningStats {
        if reset {
            std::mem::take(&mut self.commissioning)
        } else {
            self.commissioning.clone()
        }
    }

    pub fn self_heal_stats(&self) -> SelfHealStats {
        self.self_heal.clone()
    }

    pub fn discovery_stats(&self) -> DiscoveryStats {
        self.queue.stats()
    }

    pub fn automation_stats(&self) -> AutomationStats {
        self.automation.clone()
    }

    pub fn last_channel_decision(&self) -> Option<&ChannelDecision> {
        self.last_channel.as_ref()
    }

    pub fn network_info(&self) -> NetworkInfo {
        let runtime = if self.caps.network_runtime {
            self.radio.network_runtime().ok()
        } else {
            None
        };
        NetworkInfo {
            role: self.config.role,
            mode: self.mode,
            started: self.started,
            form_network: self.form_network,
            short_addr: self.radio.short_addr().ok(),
            ieee_addr: self.radio.ieee_addr().ok(),
            runtime,
            profile: self.profile.clone(),
            applied_channel_mask: self.applied_mask,
            channel_decision: self.last_channel.clone(),
        }
    }

    // ── Control loop ────────────────────────────────────────────────

    /// Apply every radio callback queued so far. Returns how many were
    /// handled.
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.radio_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// One control-loop iteration: callbacks, one discovery batch, and
    /// a throttled save when persistence is configured.
    pub async fn tick(&mut self) -> TickReport {
        let events = self.drain_events().await;
        let discovery = self.process_discovery(TICK_DISCOVERY_BATCH).await;
        let saved = if self.config.persistence_path.is_some() {
            match self.save(false) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "periodic snapshot save failed");
                    None
                }
            }
        } else {
            None
        };
        TickReport {
            events,
            discovery,
            saved,
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(Arc::new(event));
    }
}
