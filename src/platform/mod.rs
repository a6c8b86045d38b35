//! nRF52840 bindings for the gateway.
//!
//! - [`softdevice`] - S140 central implementing [`crate::ble::BleDriver`]
//!   through a command channel, reporting back as [`crate::ble::LinkEvent`]s.
//! - [`usb_serial`] - CDC-ACM port acting as the telemetry [`crate::sink::Sink`]
//!   and accepting outbound text lines.
//! - [`display`] - SSD1306 status screen.
//!
//! Communication between tasks uses the Embassy channels declared here.

pub mod display;
pub mod softdevice;
pub mod usb_serial;

use crate::ble::{LinkEvent, PeerAddress};
use crate::config::{INTENT_QUEUE_DEPTH, MAX_DATA_PAYLOAD_LEN, SINK_LINE_LEN, SINK_QUEUE_DEPTH};
use crate::gateway::GatewayState;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::String;
use softdevice::DriverCommand;

/// Host events waiting for `Gateway::handle_event`.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Driver commands queued for the BLE task.
pub const COMMAND_QUEUE_DEPTH: usize = INTENT_QUEUE_DEPTH + 4;

/// One line of text typed on the USB port, to be broadcast on the mesh.
pub type OutboundText = String<MAX_DATA_PAYLOAD_LEN>;

/// One formatted sink line.
pub type SinkLine = String<SINK_LINE_LEN>;

pub type EventChannel = Channel<CriticalSectionRawMutex, LinkEvent, EVENT_QUEUE_DEPTH>;
pub type CommandChannel = Channel<CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>;
pub type LineChannel = Channel<CriticalSectionRawMutex, SinkLine, SINK_QUEUE_DEPTH>;
pub type OutboxChannel = Channel<CriticalSectionRawMutex, OutboundText, 2>;

/// What the status screen shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: GatewayState,
    pub local_node_id: Option<u32>,
    pub peer: Option<PeerAddress>,
    pub nodes: usize,
}

impl StatusSnapshot {
    pub const fn idle() -> Self {
        Self {
            state: GatewayState::Idle,
            local_node_id: None,
            peer: None,
            nodes: 0,
        }
    }
}

pub type StatusSignal = Signal<CriticalSectionRawMutex, StatusSnapshot>;
