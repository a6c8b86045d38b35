//! Gateway engine: link state machine plus session protocol.
//!
//! [`Gateway`] is sans-IO.  It owns a [`BleDriver`] to issue operations, a
//! [`Sink`] to publish to and a [`FrameCodec`] for the payload schema, and is
//! driven from outside by two entry points:
//!
//! - [`Gateway::handle_event`] for every [`LinkEvent`] the host reports;
//! - [`Gateway::tick`] from a periodic timer.
//!
//! The BLE host must not be re-entered from inside its own completion
//! context, so event handling never issues a drain read or a scan directly.
//! It queues an [`Intent`] that the next `tick` executes.
//!
//! ```text
//! IDLE -> SCANNING -> CONNECTING -> DISCOVERING -> WANT_CONFIG -> SYNCING -> READY
//!   ^                                   |                                     |
//!   +----------- DISCONNECTING <--------+-------- link drop / reset ---------+
//! ```

mod link;
mod session;

use crate::ble::{AttHandle, BleDriver, ConnId, HandleRange, LinkEvent, PeerAddress};
use crate::codec::FrameCodec;
use crate::config::{GatewayConfig, PeerSelector, CONNECT_TIMEOUT_MS, INTENT_QUEUE_DEPTH};
use crate::dedup::DedupCache;
use crate::nodes::NodeTable;
use crate::sink::{Publisher, Sink};
use heapless::Deque;

pub use link::DiscoveryStep;

/// Link/session state.  There is no terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayState {
    /// Waiting for the reconnect interval to elapse.
    Idle,
    Scanning,
    Connecting,
    /// Resolving service, characteristics and CCCD, then subscribing.
    Discovering,
    /// Subscribed; `want_config_id` sent, nothing heard back yet.
    WantConfig,
    /// Config stream in progress.
    Syncing,
    /// Handshake complete; steady-state traffic.
    Ready,
    /// Link teardown requested, waiting for the host to confirm.
    Disconnecting,
}

impl GatewayState {
    /// States in which the attribute handles are valid and frames flow.
    pub fn is_session(self) -> bool {
        matches!(
            self,
            GatewayState::WantConfig | GatewayState::Syncing | GatewayState::Ready
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayState::Idle => "IDLE",
            GatewayState::Scanning => "SCANNING",
            GatewayState::Connecting => "CONNECTING",
            GatewayState::Discovering => "DISCOVERING",
            GatewayState::WantConfig => "WANT_CONFIG",
            GatewayState::Syncing => "SYNCING",
            GatewayState::Ready => "READY",
            GatewayState::Disconnecting => "DISCONNECTING",
        }
    }
}

/// Attribute handles resolved during discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttributeHandles {
    pub service: Option<HandleRange>,
    pub to_radio: Option<AttHandle>,
    pub from_radio: Option<AttHandle>,
    pub from_num: Option<AttHandle>,
    pub from_num_cccd: Option<AttHandle>,
}

impl AttributeHandles {
    /// `true` once every handle the session needs is known.
    pub fn is_complete(&self) -> bool {
        self.service.is_some()
            && self.to_radio.is_some()
            && self.from_radio.is_some()
            && self.from_num.is_some()
            && self.from_num_cccd.is_some()
    }
}

/// Deferred driver call, executed by [`Gateway::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Intent {
    StartScan,
    DrainRead,
}

/// BLE-central Meshtastic gateway.
pub struct Gateway<D: BleDriver, S: Sink, C: FrameCodec> {
    driver: D,
    publisher: Publisher<S>,
    codec: C,
    config: GatewayConfig,

    state: GatewayState,
    conn: Option<ConnId>,
    peer: Option<PeerAddress>,
    handles: AttributeHandles,
    step: DiscoveryStep,

    handshake_complete: bool,
    local_node_id: Option<u32>,
    last_packet_id: u32,

    host_ready: bool,
    now_ms: u64,
    last_connect_attempt: Option<u64>,
    disconnect_started: u64,

    drain_in_flight: bool,
    drain_pending: bool,
    intents: Deque<Intent, INTENT_QUEUE_DEPTH>,

    dedup: DedupCache,
    nodes: NodeTable,
}

impl<D: BleDriver, S: Sink, C: FrameCodec> Gateway<D, S, C> {
    pub fn new(driver: D, sink: S, codec: C, config: GatewayConfig) -> Self {
        let publisher = Publisher::new(sink, &config.topic_prefix);
        Self {
            driver,
            publisher,
            codec,
            config,
            state: GatewayState::Idle,
            conn: None,
            peer: None,
            handles: AttributeHandles::default(),
            step: DiscoveryStep::Service,
            handshake_complete: false,
            local_node_id: None,
            last_packet_id: 0,
            host_ready: false,
            now_ms: 0,
            last_connect_attempt: None,
            disconnect_started: 0,
            drain_in_flight: false,
            drain_pending: false,
            intents: Deque::new(),
            dedup: DedupCache::new(),
            nodes: NodeTable::new(),
        }
    }

    /// Announce the gateway as offline until the handshake completes.
    pub fn start(&mut self) {
        match &self.config.peer {
            PeerSelector::Name(name) => info!("gateway target name: {}", name.as_str()),
            PeerSelector::Address(addr) => info!("gateway target address: {:?}", addr),
        }
        info!(
            "topic prefix: {}, reconnect every {}s",
            self.publisher.prefix(),
            self.config.reconnect_interval_secs
        );
        self.publisher.set_availability(false);
    }

    /// Feed one host event into the state machine.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::HostSynced => {
                info!("BLE host synced");
                self.host_ready = true;
                self.last_connect_attempt = None;
                if self.state == GatewayState::Idle {
                    self.push_intent(Intent::StartScan);
                }
            }
            LinkEvent::HostReset(reason) => {
                warn!("BLE host reset (reason={})", reason);
                self.host_ready = false;
                self.teardown();
            }
            LinkEvent::ScanReport(report) => self.on_scan_report(&report),
            LinkEvent::ScanComplete => self.on_scan_complete(),
            LinkEvent::Connected(result) => self.on_connected(result),
            LinkEvent::Disconnected { conn, reason } => {
                if self.is_stale(conn) {
                    debug!("disconnect for stale conn {}", conn);
                    return;
                }
                warn!("BLE disconnected (conn={}, reason={:#x})", conn, reason);
                self.teardown();
            }
            LinkEvent::ServiceDiscovered { conn, item } => {
                if !self.is_stale(conn) {
                    self.on_service(item);
                }
            }
            LinkEvent::CharacteristicDiscovered { conn, item } => {
                if !self.is_stale(conn) {
                    self.on_characteristic(item);
                }
            }
            LinkEvent::DescriptorDiscovered { conn, item } => {
                if !self.is_stale(conn) {
                    self.on_descriptor(item);
                }
            }
            LinkEvent::WriteAck { conn, handle, status } => {
                if !self.is_stale(conn) {
                    self.on_write_ack(handle, status);
                }
            }
            LinkEvent::ReadComplete { conn, handle, result } => {
                if !self.is_stale(conn) {
                    self.on_read_complete(handle, result);
                }
            }
            LinkEvent::Notify { conn, handle, .. } => {
                if !self.is_stale(conn) {
                    self.on_notify(handle);
                }
            }
            LinkEvent::MtuChanged { conn, mtu } => {
                info!("MTU negotiated: conn={} mtu={}", conn, mtu);
            }
        }
    }

    /// Periodic step: run deferred intents, then the idle reconnect timer.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;

        while let Some(intent) = self.intents.pop_front() {
            match intent {
                Intent::StartScan => self.start_scan(),
                Intent::DrainRead => self.issue_drain_read(),
            }
        }

        match self.state {
            GatewayState::Idle if self.host_ready && self.backoff_elapsed() => self.start_scan(),
            GatewayState::Disconnecting
                if now_ms.saturating_sub(self.disconnect_started) >= u64::from(CONNECT_TIMEOUT_MS) =>
            {
                warn!("no disconnect confirmation, forcing teardown");
                self.teardown();
            }
            _ => {}
        }
    }

    /// Return to IDLE and forget everything learned on the last link.
    ///
    /// Safe to call in any state, including IDLE.  Always publishes
    /// "offline".  The dedup ring survives so packets the radio re-sends
    /// after a reconnect are still suppressed.
    pub fn teardown(&mut self) {
        if self.state != GatewayState::Idle {
            info!("state {} -> IDLE", self.state.as_str());
        }
        self.state = GatewayState::Idle;
        self.conn = None;
        self.peer = None;
        self.handles = AttributeHandles::default();
        self.step = DiscoveryStep::Service;
        self.handshake_complete = false;
        self.local_node_id = None;
        self.drain_in_flight = false;
        self.drain_pending = false;
        self.intents.clear();
        self.nodes.clear();
        self.publisher.set_availability(false);
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }

    pub fn peer_address(&self) -> Option<PeerAddress> {
        self.peer
    }

    pub fn handles(&self) -> &AttributeHandles {
        &self.handles
    }

    pub fn handshake_id(&self) -> u32 {
        self.config.handshake_id
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub fn local_node_id(&self) -> Option<u32> {
        self.local_node_id
    }

    pub fn drain_in_flight(&self) -> bool {
        self.drain_in_flight
    }

    pub fn drain_pending(&self) -> bool {
        self.drain_pending
    }

    /// Intents waiting for the next tick.
    pub fn pending_intents(&self) -> impl Iterator<Item = &Intent> {
        self.intents.iter()
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn sink(&self) -> &S {
        self.publisher.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.publisher.sink_mut()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn push_intent(&mut self, intent: Intent) {
        if self.intents.iter().any(|i| *i == intent) {
            return;
        }
        if self.intents.push_back(intent).is_err() {
            warn!("intent queue full, dropping {:?}", intent);
        }
    }

    /// An event for a connection other than the current one.  With no
    /// current connection nothing is stale, so a late disconnect still
    /// resets the session.
    fn is_stale(&self, conn: ConnId) -> bool {
        matches!(self.conn, Some(current) if current != conn)
    }

    fn backoff_elapsed(&self) -> bool {
        match self.last_connect_attempt {
            None => true,
            Some(at) => self.now_ms.saturating_sub(at) >= self.config.reconnect_interval_ms(),
        }
    }

    fn set_state(&mut self, next: GatewayState) {
        if self.state != next {
            info!("state {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }
}
