// Scripted in-memory radio shared by the engine integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use zigmesh_core::model::{EndpointDescriptor, NodeDescriptor, PowerDescriptor};
use zigmesh_core::policy::ReportingEntry;
use zigmesh_core::radio::{BindRequest, Snapshot};
use zigmesh_core::{
    AttrValue, Capabilities, ChannelMask, Engine, EngineConfig, EventSink, ExtendedPanId, IeeeAddr,
    ManualClock, NetworkRuntime, NetworkSignal, PanId, Radio, RadioError, RadioResult, Role,
    ShortAddr, WifiSample,
};

// ── Remote device script ────────────────────────────────────────────

/// How a simulated remote device answers descriptor requests.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub ieee: Option<IeeeAddr>,
    pub node: NodeDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
    pub power: Option<PowerDescriptor>,
    /// Extra endpoint ids reported by the active-endpoint response.
    pub extra_active: Vec<u8>,
}

impl MockDevice {
    pub fn new(ieee: u8) -> Self {
        Self {
            ieee: Some(IeeeAddr([0x00, 0x12, 0x4B, 0x00, 0x00, 0x00, 0x00, ieee])),
            node: NodeDescriptor {
                manufacturer_code: 0x1037,
                ..NodeDescriptor::default()
            },
            endpoints: Vec::new(),
            power: Some(PowerDescriptor::default()),
            extra_active: Vec::new(),
        }
    }

    pub fn endpoint(mut self, endpoint: u8, device_id: u16, input: &[u16]) -> Self {
        self.endpoints.push(EndpointDescriptor {
            endpoint,
            profile_id: 0x0104,
            device_id,
            device_version: 1,
            input_clusters: input.to_vec(),
            output_clusters: Vec::new(),
        });
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MockState {
    pub caps: Capabilities,
    pub local_short: ShortAddr,
    pub local_ieee: IeeeAddr,
    pub devices: HashMap<ShortAddr, MockDevice>,
    pub runtime: NetworkRuntime,
    pub wifi: Vec<WifiSample>,
    pub last_joined: Option<ShortAddr>,

    pub init_calls: usize,
    pub start_calls: Vec<bool>,
    pub start_results: VecDeque<RadioResult<()>>,
    pub steering_calls: usize,
    pub steering_results: VecDeque<RadioResult<()>>,
    /// Signal delivered through the sink on every steering call.
    pub steering_signal: Option<(NetworkSignal, i32)>,

    pub pan_ids: Vec<PanId>,
    pub extended_pan_ids: Vec<ExtendedPanId>,
    pub channel_masks: Vec<ChannelMask>,
    pub permit_join: Vec<u8>,

    pub active_requests: usize,
    pub active_queue: VecDeque<Snapshot<Vec<u8>>>,
    pub node_queue: VecDeque<Snapshot<NodeDescriptor>>,
    pub simple_queue: VecDeque<Snapshot<EndpointDescriptor>>,
    pub power_queue: VecDeque<Snapshot<PowerDescriptor>>,

    pub attributes: HashMap<(ShortAddr, u8, u16, u16), AttrValue>,
    pub read_calls: usize,
    pub commands: Vec<(ShortAddr, u8, u16, u8, Vec<u8>)>,
    pub writes: Vec<(ShortAddr, u8, u16, u16, u8, AttrValue)>,
    pub reporting: Vec<(ShortAddr, u8, ReportingEntry)>,
    pub failing_reporting_attrs: HashSet<(u16, u16)>,
    pub binds: Vec<BindRequest>,
    pub failing_bind_clusters: HashSet<u16>,

    pub sink: Option<EventSink>,
    pub sink_registrations: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            caps: Capabilities::all(),
            local_short: ShortAddr::COORDINATOR,
            local_ieee: IeeeAddr([0xAA; 8]),
            devices: HashMap::new(),
            runtime: NetworkRuntime::default(),
            wifi: Vec::new(),
            last_joined: None,
            init_calls: 0,
            start_calls: Vec::new(),
            start_results: VecDeque::new(),
            steering_calls: 0,
            steering_results: VecDeque::new(),
            steering_signal: None,
            pan_ids: Vec::new(),
            extended_pan_ids: Vec::new(),
            channel_masks: Vec::new(),
            permit_join: Vec::new(),
            active_requests: 0,
            active_queue: VecDeque::new(),
            node_queue: VecDeque::new(),
            simple_queue: VecDeque::new(),
            power_queue: VecDeque::new(),
            attributes: HashMap::new(),
            read_calls: 0,
            commands: Vec::new(),
            writes: Vec::new(),
            reporting: Vec::new(),
            failing_reporting_attrs: HashSet::new(),
            binds: Vec::new(),
            failing_bind_clusters: HashSet::new(),
            sink: None,
            sink_registrations: 0,
        }
    }
}

/// Cloneable handle; tests keep one clone to script and inspect.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(caps: Capabilities) -> Self {
        let radio = Self::default();
        radio.state().caps = caps;
        radio
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_device(&self, short_addr: u16, device: MockDevice) {
        self.state().devices.insert(ShortAddr(short_addr), device);
    }

    /// Deliver a signal through the registered sink.
    pub fn emit_signal(&self, signal: NetworkSignal, status: i32) {
        let sink = self.state().sink.clone();
        assert!(sink.expect("sink registered").signal(signal, status));
    }

    pub fn emit(&self, event: zigmesh_core::RadioEvent) {
        let sink = self.state().sink.clone();
        assert!(sink.expect("sink registered").send(event));
    }
}

impl Radio for MockRadio {
    fn capabilities(&self) -> Capabilities {
        self.state().caps
    }

    fn init(&mut self, _role: Role) -> RadioResult<()> {
        self.state().init_calls += 1;
        Ok(())
    }

    fn start(&mut self, form_network: bool) -> RadioResult<()> {
        let mut state = self.state();
        state.start_calls.push(form_network);
        state.start_results.pop_front().unwrap_or(Ok(()))
    }

    fn start_steering(&mut self) -> RadioResult<()> {
        let mut state = self.state();
        if !state.caps.steering {
            return Err(RadioError::Unsupported);
        }
        state.steering_calls += 1;
        if let (Some((signal, status)), Some(sink)) = (state.steering_signal, state.sink.as_ref()) {
            sink.signal(signal, status);
        }
        state.steering_results.pop_front().unwrap_or(Ok(()))
    }

    fn short_addr(&self) -> RadioResult<ShortAddr> {
        Ok(self.state().local_short)
    }

    fn ieee_addr(&self) -> RadioResult<IeeeAddr> {
        Ok(self.state().local_ieee)
    }

    fn ieee_addr_of(&self, short_addr: ShortAddr) -> Option<IeeeAddr> {
        self.state().devices.get(&short_addr).and_then(|d| d.ieee)
    }

    fn network_runtime(&self) -> RadioResult<NetworkRuntime> {
        Ok(self.state().runtime.clone())
    }

    fn set_pan_id(&mut self, pan_id: PanId) -> RadioResult<()> {
        self.state().pan_ids.push(pan_id);
        Ok(())
    }

    fn set_extended_pan_id(&mut self, ext: ExtendedPanId) -> RadioResult<()> {
        self.state().extended_pan_ids.push(ext);
        Ok(())
    }

    fn set_channel_mask(&mut self, mask: ChannelMask) -> RadioResult<()> {
        self.state().channel_masks.push(mask);
        Ok(())
    }

    fn permit_join(&mut self, duration_s: u8) -> RadioResult<()> {
        self.state().permit_join.push(duration_s);
        Ok(())
    }

    fn last_joined_short_addr(&self) -> Option<ShortAddr> {
        self.state().last_joined
    }

    fn request_active_endpoints(&mut self, dst: ShortAddr) -> RadioResult<()> {
        let mut state = self.state();
        state.active_requests += 1;
        if let Some(device) = state.devices.get(&dst).cloned() {
            let mut body: Vec<u8> = device.endpoints.iter().map(|e| e.endpoint).collect();
            body.extend(device.extra_active);
            state.active_queue.push_back(Snapshot {
                status: 0,
                short_addr: dst,
                body,
            });
        }
        Ok(())
    }

    fn poll_active_endpoints(&mut self) -> Option<Snapshot<Vec<u8>>> {
        self.state().active_queue.pop_front()
    }

    fn request_node_descriptor(&mut self, dst: ShortAddr) -> RadioResult<()> {
        let mut state = self.state();
        if let Some(node) = state.devices.get(&dst).map(|d| d.node) {
            state.node_queue.push_back(Snapshot {
                status: 0,
                short_addr: dst,
                body: node,
            });
        }
        Ok(())
    }

    fn poll_node_descriptor(&mut self) -> Option<Snapshot<NodeDescriptor>> {
        self.state().node_queue.pop_front()
    }

    fn request_simple_descriptor(&mut self, dst: ShortAddr, endpoint: u8) -> RadioResult<()> {
        let mut state = self.state();
        let desc = state
            .devices
            .get(&dst)
            .and_then(|d| d.endpoints.iter().find(|e| e.endpoint == endpoint).cloned());
        if let Some(body) = desc {
            state.simple_queue.push_back(Snapshot {
                status: 0,
                short_addr: dst,
                body,
            });
        }
        Ok(())
    }

    fn poll_simple_descriptor(&mut self) -> Option<Snapshot<EndpointDescriptor>> {
        self.state().simple_queue.pop_front()
    }

    fn request_power_descriptor(&mut self, dst: ShortAddr) -> RadioResult<()> {
        let mut state = self.state();
        if let Some(body) = state.devices.get(&dst).and_then(|d| d.power) {
            state.power_queue.push_back(Snapshot {
                status: 0,
                short_addr: dst,
                body,
            });
        }
        Ok(())
    }

    fn poll_power_descriptor(&mut self) -> Option<Snapshot<PowerDescriptor>> {
        self.state().power_queue.pop_front()
    }

    fn read_attribute(&mut self, dst: ShortAddr, endpoint: u8, cluster: u16, attr: u16) -> RadioResult<AttrValue> {
        let mut state = self.state();
        state.read_calls += 1;
        state
            .attributes
            .get(&(dst, endpoint, cluster, attr))
            .cloned()
            .ok_or(RadioError::Status(0x86))
    }

    fn write_attribute(
        &mut self,
        dst: ShortAddr,
        endpoint: u8,
        cluster: u16,
        attr: u16,
        attr_type: u8,
        value: &AttrValue,
    ) -> RadioResult<()> {
        self.state()
            .writes
            .push((dst, endpoint, cluster, attr, attr_type, value.clone()));
        Ok(())
    }

    fn send_command(&mut self, dst: ShortAddr, endpoint: u8, cluster: u16, command: u8, payload: &[u8]) -> RadioResult<()> {
        self.state()
            .commands
            .push((dst, endpoint, cluster, command, payload.to_vec()));
        Ok(())
    }

    fn configure_reporting(&mut self, dst: ShortAddr, endpoint: u8, entry: &ReportingEntry) -> RadioResult<()> {
        let mut state = self.state();
        if state.failing_reporting_attrs.contains(&(entry.cluster, entry.attr)) {
            return Err(RadioError::Status(0x8C));
        }
        state.reporting.push((dst, endpoint, *entry));
        Ok(())
    }

    fn bind(&mut self, request: &BindRequest) -> RadioResult<()> {
        let mut state = self.state();
        if state.failing_bind_clusters.contains(&request.cluster) {
            return Err(RadioError::Status(0x84));
        }
        state.binds.push(*request);
        Ok(())
    }

    fn register_event_sink(&mut self, sink: EventSink) {
        let mut state = self.state();
        state.sink = Some(sink);
        state.sink_registrations += 1;
    }

    fn scan_wifi(&mut self) -> RadioResult<Vec<WifiSample>> {
        Ok(self.state().wifi.clone())
    }
}

// ── Engine helpers ──────────────────────────────────────────────────

pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Engine on a manual clock, with the scripting handle and the clock.
pub fn engine_with(radio: &MockRadio, config: EngineConfig) -> (Engine<MockRadio>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let engine = Engine::with_clock(radio.clone(), config, clock.clone()).unwrap();
    (engine, clock)
}

/// A single-endpoint dimmable light.
pub fn light(ieee: u8) -> MockDevice {
    MockDevice::new(ieee).endpoint(1, 0x0101, &[0x0000, 0x0006, 0x0008])
}
