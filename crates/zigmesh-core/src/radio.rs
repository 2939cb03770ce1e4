// ── External primitive layer ──
//
// The contract the engine consumes from the radio stack adapter. The
// adapter normalizes firmware differences once: optional primitives are
// advertised through `Capabilities`, every attribute report arrives as a
// single `AttributeEvent` shape, and failures are typed `RadioError`s.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{
    AttrValue, ChannelMask, EndpointDescriptor, ExtendedPanId, IeeeAddr, NodeDescriptor, PanId,
    PowerDescriptor, Role, ShortAddr,
};
use crate::policy::ReportingEntry;

/// Result alias for primitive calls.
pub type RadioResult<T> = Result<T, RadioError>;

/// Failure reported by the primitive layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The stack is already initialised, running or formed.
    #[error("invalid operating state")]
    InvalidState,

    #[error("primitive not supported by this firmware")]
    Unsupported,

    #[error("status {0}")]
    Status(i32),

    #[error("{0}")]
    Failed(String),
}

// ── Capabilities ────────────────────────────────────────────────────

/// Optional primitives the adapter provides. Probed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Dedicated network-steering primitive.
    pub steering: bool,
    /// Live network runtime snapshot.
    pub network_runtime: bool,
    pub power_descriptor: bool,
    /// "Last joined short address" hint.
    pub last_joined_hint: bool,
    pub wifi_scan: bool,
    /// PAN id, extended PAN id and channel mask setters.
    pub identity_config: bool,
    pub reporting: bool,
    pub binding: bool,
    /// Short-to-IEEE address lookup for remote devices.
    pub address_lookup: bool,
    pub permit_join: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            steering: true,
            network_runtime: true,
            power_descriptor: true,
            last_joined_hint: true,
            wifi_scan: true,
            identity_config: true,
            reporting: true,
            binding: true,
            address_lookup: true,
            permit_join: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            steering: false,
            network_runtime: false,
            power_descriptor: false,
            last_joined_hint: false,
            wifi_scan: false,
            identity_config: false,
            reporting: false,
            binding: false,
            address_lookup: false,
            permit_join: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

// ── Snapshots ───────────────────────────────────────────────────────

/// Live network identity read back from the stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRuntime {
    pub channel: Option<u8>,
    pub pan_id: Option<u16>,
    pub extended_pan_id: Option<ExtendedPanId>,
    pub short_addr: Option<ShortAddr>,
    pub formed: bool,
    pub joined: bool,
}

/// A completed descriptor response. `status` is the ZDO status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub status: u8,
    pub short_addr: ShortAddr,
    pub body: T,
}

/// One Wi-Fi access point observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSample {
    /// 2.4 GHz Wi-Fi channel, 1–14.
    pub channel: u8,
    pub rssi: i8,
}

/// One APS bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    pub src_ieee: IeeeAddr,
    pub src_endpoint: u8,
    pub cluster: u16,
    pub dst_ieee: IeeeAddr,
    pub dst_endpoint: u8,
    /// Device the ZDO request is addressed to.
    pub req_dst_short: ShortAddr,
}

// ── Events ──────────────────────────────────────────────────────────

/// Network signal ids delivered by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSignal {
    DefaultStart,
    SkipStartup,
    DeviceAnnounce,
    Leave,
    Error,
    FirstStart,
    Reboot,
    Steering,
    Formation,
    DeviceAssociated,
    LeaveIndication,
    DeviceAuthorized,
    DeviceUpdate,
    PanIdConflict,
    PermitJoinStatus,
    SteeringCancelled,
    FormationCancelled,
    Other(u8),
}

impl NetworkSignal {
    pub const fn from_id(id: u8) -> Self {
        match id {
            0x00 => Self::DefaultStart,
            0x01 => Self::SkipStartup,
            0x02 => Self::DeviceAnnounce,
            0x03 => Self::Leave,
            0x04 => Self::Error,
            0x05 => Self::FirstStart,
            0x06 => Self::Reboot,
            0x0A => Self::Steering,
            0x0B => Self::Formation,
            0x12 => Self::DeviceAssociated,
            0x13 => Self::LeaveIndication,
            0x2F => Self::DeviceAuthorized,
            0x30 => Self::DeviceUpdate,
            0x31 => Self::PanIdConflict,
            0x36 => Self::PermitJoinStatus,
            0x37 => Self::SteeringCancelled,
            0x38 => Self::FormationCancelled,
            other => Self::Other(other),
        }
    }

    pub const fn id(self) -> u8 {
        match self {
            Self::DefaultStart => 0x00,
            Self::SkipStartup => 0x01,
            Self::DeviceAnnounce => 0x02,
            Self::Leave => 0x03,
            Self::Error => 0x04,
            Self::FirstStart => 0x05,
            Self::Reboot => 0x06,
            Self::Steering => 0x0A,
            Self::Formation => 0x0B,
            Self::DeviceAssociated => 0x12,
            Self::LeaveIndication => 0x13,
            Self::DeviceAuthorized => 0x2F,
            Self::DeviceUpdate => 0x30,
            Self::PanIdConflict => 0x31,
            Self::PermitJoinStatus => 0x36,
            Self::SteeringCancelled => 0x37,
            Self::FormationCancelled => 0x38,
            Self::Other(id) => id,
        }
    }

    /// A remote device joined or re-announced itself.
    pub const fn is_join(self) -> bool {
        matches!(
            self,
            Self::DeviceAssociated | Self::DeviceAnnounce | Self::DeviceUpdate | Self::DeviceAuthorized
        )
    }

    /// Successful completion means the runtime identity may have changed.
    pub const fn is_profile_sync(self, role: Role) -> bool {
        match self {
            Self::Steering | Self::FirstStart | Self::Reboot => true,
            Self::Formation => !role.is_node(),
            _ => false,
        }
    }

    /// Non-zero status on these triggers a rejoin.
    pub const fn is_steering_failure(self, role: Role) -> bool {
        match self {
            Self::Steering | Self::SteeringCancelled => true,
            Self::FormationCancelled => !role.is_node(),
            _ => false,
        }
    }
}

/// Network signal callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalEvent {
    pub signal: NetworkSignal,
    pub status: i32,
}

/// Normalized attribute report.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEvent {
    /// Reporting device; `None` when the firmware omits attribution.
    pub source_short_addr: Option<ShortAddr>,
    pub endpoint: u8,
    pub cluster: u16,
    pub attr: u16,
    pub value: AttrValue,
    pub status: u8,
    pub attr_type: Option<u8>,
}

/// Anything the stack delivers asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Signal(SignalEvent),
    Attribute(AttributeEvent),
}

/// Handle the adapter uses to deliver callbacks onto the engine loop.
/// Registering a new sink replaces the previous one.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RadioEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RadioEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the engine has been dropped.
    pub fn send(&self, event: RadioEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn signal(&self, signal: NetworkSignal, status: i32) -> bool {
        self.send(RadioEvent::Signal(SignalEvent { signal, status }))
    }

    pub fn attribute(&self, event: AttributeEvent) -> bool {
        self.send(RadioEvent::Attribute(event))
    }
}

// ── Radio trait ─────────────────────────────────────────────────────

/// Primitive radio/MAC/NWK/APS operations.
///
/// Descriptor requests are split into a request call and a poll call;
/// the poll returns `None` until the response has arrived. Optional
/// primitives default to `Unsupported`.
pub trait Radio: Send {
    fn capabilities(&self) -> Capabilities;

    fn init(&mut self, role: Role) -> RadioResult<()>;

    /// Form (`true`) or join (`false`) a network.
    fn start(&mut self, form_network: bool) -> RadioResult<()>;

    fn start_steering(&mut self) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn short_addr(&self) -> RadioResult<ShortAddr>;

    fn ieee_addr(&self) -> RadioResult<IeeeAddr>;

    fn ieee_addr_of(&self, _short_addr: ShortAddr) -> Option<IeeeAddr> {
        None
    }

    fn network_runtime(&self) -> RadioResult<NetworkRuntime> {
        Err(RadioError::Unsupported)
    }

    fn set_pan_id(&mut self, _pan_id: PanId) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn set_extended_pan_id(&mut self, _ext: ExtendedPanId) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn set_channel_mask(&mut self, _mask: ChannelMask) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn permit_join(&mut self, _duration_s: u8) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn last_joined_short_addr(&self) -> Option<ShortAddr> {
        None
    }

    // ── Descriptor discovery ────────────────────────────────────────

    fn request_active_endpoints(&mut self, dst: ShortAddr) -> RadioResult<()>;
    fn poll_active_endpoints(&mut self) -> Option<Snapshot<Vec<u8>>>;

    fn request_node_descriptor(&mut self, dst: ShortAddr) -> RadioResult<()>;
    fn poll_node_descriptor(&mut self) -> Option<Snapshot<NodeDescriptor>>;

    fn request_simple_descriptor(&mut self, dst: ShortAddr, endpoint: u8) -> RadioResult<()>;
    fn poll_simple_descriptor(&mut self) -> Option<Snapshot<EndpointDescriptor>>;

    fn request_power_descriptor(&mut self, _dst: ShortAddr) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn poll_power_descriptor(&mut self) -> Option<Snapshot<PowerDescriptor>> {
        None
    }

    // ── ZCL ─────────────────────────────────────────────────────────

    fn read_attribute(
        &mut self,
        dst: ShortAddr,
        endpoint: u8,
        cluster: u16,
        attr: u16,
    ) -> RadioResult<AttrValue>;

    fn write_attribute(
        &mut self,
        _dst: ShortAddr,
        _endpoint: u8,
        _cluster: u16,
        _attr: u16,
        _attr_type: u8,
        _value: &AttrValue,
    ) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn send_command(
        &mut self,
        dst: ShortAddr,
        endpoint: u8,
        cluster: u16,
        command: u8,
        payload: &[u8],
    ) -> RadioResult<()>;

    fn configure_reporting(
        &mut self,
        _dst: ShortAddr,
        _endpoint: u8,
        _entry: &ReportingEntry,
    ) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    fn bind(&mut self, _request: &BindRequest) -> RadioResult<()> {
        Err(RadioError::Unsupported)
    }

    // ── Callbacks and scanning ──────────────────────────────────────

    fn register_event_sink(&mut self, sink: EventSink);

    fn scan_wifi(&mut self) -> RadioResult<Vec<WifiSample>> {
        Err(RadioError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_ids_round_trip() {
        for id in 0u8..=0x40 {
            assert_eq!(NetworkSignal::from_id(id).id(), id);
        }
        assert_eq!(NetworkSignal::from_id(0x31), NetworkSignal::PanIdConflict);
    }

    #[test]
    fn signal_groups_depend_on_role() {
        assert!(NetworkSignal::Formation.is_profile_sync(Role::Coordinator));
        assert!(!NetworkSignal::Formation.is_profile_sync(Role::Router));
        assert!(NetworkSignal::FormationCancelled.is_steering_failure(Role::Coordinator));
        assert!(!NetworkSignal::FormationCancelled.is_steering_failure(Role::EndDevice));
        assert!(NetworkSignal::DeviceAuthorized.is_join());
        assert!(!NetworkSignal::Leave.is_join());
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        assert!(sink.signal(NetworkSignal::Steering, 0));
        drop(rx);
        assert!(!sink.signal(NetworkSignal::Steering, 0));
    }
}
