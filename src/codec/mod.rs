//! Frame codec boundary.
//!
//! The gateway treats the payload schema as opaque: it hands raw fromRadio
//! frames to a [`FrameCodec`] and gets back a tagged [`FromRadio`], and it
//! asks the codec to serialise [`ToRadio`] messages for the toRadio
//! characteristic.  Routed packets carry a second, port-tagged payload that
//! is decoded on demand through [`FrameCodec::decode_app_payload`].
//!
//! [`MeshtasticCodec`] implements the boundary for the subset of the
//! Meshtastic protobuf schema the gateway consumes.

pub mod meshtastic;
pub mod wire;

pub use meshtastic::MeshtasticCodec;

use crate::config::MAX_DATA_PAYLOAD_LEN;
use crate::error::{DecodeError, Error};
use heapless::{String, Vec};

/// Application port a [`Data`] payload belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortNum {
    TextMessage,
    Position,
    NodeInfo,
    Telemetry,
    Other(u32),
}

impl From<u32> for PortNum {
    fn from(code: u32) -> Self {
        match code {
            1 => PortNum::TextMessage,
            3 => PortNum::Position,
            4 => PortNum::NodeInfo,
            67 => PortNum::Telemetry,
            other => PortNum::Other(other),
        }
    }
}

impl From<PortNum> for u32 {
    fn from(port: PortNum) -> Self {
        match port {
            PortNum::TextMessage => 1,
            PortNum::Position => 3,
            PortNum::NodeInfo => 4,
            PortNum::Telemetry => 67,
            PortNum::Other(code) => code,
        }
    }
}

/// Decoded application payload of a mesh packet.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    pub portnum: PortNum,
    pub payload: Vec<u8, MAX_DATA_PAYLOAD_LEN>,
}

/// A packet routed through the mesh.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MeshPacket {
    pub from: u32,
    pub to: u32,
    pub channel: u32,
    pub id: u32,
    pub rx_time: u32,
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub hop_limit: u32,
    pub want_ack: bool,
    /// `None` when the packet is still encrypted or carries no payload.
    pub decoded: Option<Data>,
}

/// Identity of the radio the gateway is attached to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MyNodeInfo {
    pub my_node_num: u32,
}

/// User record of a mesh node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct User {
    pub id: String<16>,
    pub long_name: String<40>,
    pub short_name: String<8>,
    pub hw_model: u32,
}

/// Position report.  Coordinates are degrees × 1e7.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Position {
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub altitude: i32,
    pub time: u32,
}

/// Node database entry streamed during config sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeInfo {
    pub num: u32,
    pub user: Option<User>,
    pub position: Option<Position>,
    pub last_heard: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnvironmentMetrics {
    pub temperature: Option<f32>,
    pub relative_humidity: Option<f32>,
    pub barometric_pressure: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Telemetry {
    pub time: u32,
    pub device: Option<DeviceMetrics>,
    pub environment: Option<EnvironmentMetrics>,
}

/// One frame read from the fromRadio characteristic.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FromRadio {
    Packet(MeshPacket),
    MyInfo(MyNodeInfo),
    NodeInfo(NodeInfo),
    ConfigCompleteId(u32),
    /// A variant the gateway does not act on (channel, config, log, ...),
    /// identified by its field number.
    Unhandled(u32),
}

/// One frame written to the toRadio characteristic.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToRadio {
    Packet(MeshPacket),
    WantConfigId(u32),
}

/// Port-specific payload decoded from [`Data`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AppPayload {
    Text(String<MAX_DATA_PAYLOAD_LEN>),
    Position(Position),
    User(User),
    Telemetry(Telemetry),
    /// Port the gateway does not interpret.
    Unsupported(PortNum),
}

/// Encode/decode boundary for fromRadio and toRadio frames.
pub trait FrameCodec {
    fn decode_from_radio(&mut self, frame: &[u8]) -> Result<FromRadio, DecodeError>;

    /// Serialise `msg` into `out`, returning the number of bytes written.
    fn encode_to_radio(&mut self, msg: &ToRadio, out: &mut [u8]) -> Result<usize, Error>;

    fn decode_app_payload(&mut self, data: &Data) -> Result<AppPayload, DecodeError>;
}
