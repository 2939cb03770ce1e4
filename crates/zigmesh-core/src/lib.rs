//! Host-side Zigbee mesh management engine.
//!
//! Sits above a radio adapter that exposes primitive stack calls and
//! keeps the mesh state the stack does not:
//!
//! - **[`Engine`]**: the single owner of registry, queue and counters,
//!   driven by [`Engine::tick`] from one control loop.
//! - **Device state cache**: per-endpoint values with TTL, stale-read
//!   policy and an online lifecycle.
//! - **Discovery queue**: debounced and bounded, with capped backoff.
//! - **Channel selection**: Wi-Fi aware, falling back to preferred order.
//! - **Commissioning**: counters, identity modes and self-heal.
//! - **Policies**: attribute reporting and binding.
//! - **Persistence**: JSON registry snapshots via [`RegistrySnapshot`].

pub mod automation;
pub mod channel;
pub mod clock;
pub mod commissioning;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod policy;
pub mod radio;
pub mod retry;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SelfHealPolicy};
pub use engine::{ControlCommand, Engine, NetworkInfo, SaveOutcome, TickReport};
pub use error::EngineError;
pub use event::{CommissioningEvent, EngineEvent, EventStream};
pub use radio::{
    AttributeEvent, Capabilities, EventSink, NetworkRuntime, NetworkSignal, Radio, RadioError,
    RadioEvent, RadioResult, SignalEvent, WifiSample,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AttrValue, ChannelMask, DiscoveredDevice, ExtendedPanId, Feature, IeeeAddr, NetworkMode,
    NetworkProfile, PanId, Role, ShortAddr, StaleReadPolicy, StateSource,
};
pub use store::{DeviceQuery, RegistrySnapshot};
