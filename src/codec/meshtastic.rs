//! Meshtastic protobuf subset.
//!
//! Field numbers follow `meshtastic/mesh.proto` and
//! `meshtastic/telemetry.proto`.  Anything not listed here is skipped, so
//! newer firmware adding fields keeps decoding.

use super::wire::{Overflow, Reader, WireType, Writer};
use super::{
    AppPayload, Data, DeviceMetrics, EnvironmentMetrics, FrameCodec, FromRadio, MeshPacket,
    MyNodeInfo, NodeInfo, PortNum, Position, Telemetry, ToRadio, User,
};
use crate::config::MAX_FRAME_LEN;
use crate::error::{DecodeError, Error};
use heapless::String;

// FromRadio
const FROM_RADIO_PACKET: u32 = 2;
const FROM_RADIO_MY_INFO: u32 = 3;
const FROM_RADIO_NODE_INFO: u32 = 4;
const FROM_RADIO_CONFIG_COMPLETE_ID: u32 = 7;

// ToRadio
const TO_RADIO_PACKET: u32 = 1;
const TO_RADIO_WANT_CONFIG_ID: u32 = 3;

/// Scratch size for nested messages other than the outer packet.
const NESTED: usize = 256;

/// Codec for the Meshtastic phone API over BLE.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeshtasticCodec;

impl MeshtasticCodec {
    pub const fn new() -> Self {
        Self
    }

    /// Serialise a fromRadio frame, as the radio would.  Used by simulators
    /// and tests standing in for a real node.
    pub fn encode_from_radio(&self, msg: &FromRadio, out: &mut [u8]) -> Result<usize, Error> {
        let mut w = Writer::new(out);
        let res = match msg {
            FromRadio::Packet(pkt) => {
                w.message::<MAX_FRAME_LEN>(FROM_RADIO_PACKET, |w| put_mesh_packet(w, pkt))
            }
            FromRadio::MyInfo(info) => w.message::<NESTED>(FROM_RADIO_MY_INFO, |w| {
                w.uint32(1, info.my_node_num)
            }),
            FromRadio::NodeInfo(info) => {
                w.message::<NESTED>(FROM_RADIO_NODE_INFO, |w| put_node_info(w, info))
            }
            FromRadio::ConfigCompleteId(id) => {
                w.uint32(FROM_RADIO_CONFIG_COMPLETE_ID, *id)
            }
            FromRadio::Unhandled(field) => w.message::<NESTED>(*field, |_| Ok(())),
        };
        res.map_err(|Overflow| Error::BufferOverflow)?;
        Ok(w.len())
    }

    /// Serialise a port payload for [`Data::payload`].  Text is raw UTF-8,
    /// every other port is a protobuf message.
    pub fn encode_app_payload(&self, payload: &AppPayload, out: &mut [u8]) -> Result<usize, Error> {
        if let AppPayload::Text(text) = payload {
            let bytes = text.as_bytes();
            let dst = out.get_mut(..bytes.len()).ok_or(Error::BufferOverflow)?;
            dst.copy_from_slice(bytes);
            return Ok(bytes.len());
        }
        let mut w = Writer::new(out);
        let res = match payload {
            AppPayload::Position(pos) => put_position(&mut w, pos),
            AppPayload::User(user) => put_user(&mut w, user),
            AppPayload::Telemetry(t) => put_telemetry(&mut w, t),
            AppPayload::Text(_) | AppPayload::Unsupported(_) => Ok(()),
        };
        res.map_err(|Overflow| Error::BufferOverflow)?;
        Ok(w.len())
    }
}

impl FrameCodec for MeshtasticCodec {
    fn decode_from_radio(&mut self, frame: &[u8]) -> Result<FromRadio, DecodeError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(DecodeError::Oversized);
        }
        let mut r = Reader::new(frame);
        let mut result = None;
        while !r.is_empty() {
            let (field, wt) = r.read_key()?;
            match (field, wt) {
                (FROM_RADIO_PACKET, WireType::Len) => {
                    result = Some(FromRadio::Packet(mesh_packet(r.read_bytes()?)?));
                }
                (FROM_RADIO_MY_INFO, WireType::Len) => {
                    result = Some(FromRadio::MyInfo(my_node_info(r.read_bytes()?)?));
                }
                (FROM_RADIO_NODE_INFO, WireType::Len) => {
                    result = Some(FromRadio::NodeInfo(node_info(r.read_bytes()?)?));
                }
                (FROM_RADIO_CONFIG_COMPLETE_ID, WireType::Varint) => {
                    result = Some(FromRadio::ConfigCompleteId(r.read_u32()?));
                }
                // `id` (field 1) is a frame sequence number, not a variant.
                (1, _) => r.skip(wt)?,
                (other, _) => {
                    r.skip(wt)?;
                    result = Some(FromRadio::Unhandled(other));
                }
            }
        }
        result.ok_or(DecodeError::Empty)
    }

    fn encode_to_radio(&mut self, msg: &ToRadio, out: &mut [u8]) -> Result<usize, Error> {
        let mut w = Writer::new(out);
        let res = match msg {
            ToRadio::Packet(pkt) => {
                w.message::<MAX_FRAME_LEN>(TO_RADIO_PACKET, |w| put_mesh_packet(w, pkt))
            }
            ToRadio::WantConfigId(id) => w.uint32(TO_RADIO_WANT_CONFIG_ID, *id),
        };
        res.map_err(|Overflow| Error::Encode)?;
        Ok(w.len())
    }

    fn decode_app_payload(&mut self, data: &Data) -> Result<AppPayload, DecodeError> {
        let bytes = data.payload.as_slice();
        match data.portnum {
            PortNum::TextMessage => {
                let text = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
                let mut s = String::new();
                s.push_str(text).map_err(|_| DecodeError::FieldTooLong)?;
                Ok(AppPayload::Text(s))
            }
            PortNum::Position => Ok(AppPayload::Position(position(bytes)?)),
            PortNum::NodeInfo => Ok(AppPayload::User(user(bytes)?)),
            PortNum::Telemetry => Ok(AppPayload::Telemetry(telemetry(bytes)?)),
            other => Ok(AppPayload::Unsupported(other)),
        }
    }
}

// Decoding

fn mesh_packet(buf: &[u8]) -> Result<MeshPacket, DecodeError> {
    let mut r = Reader::new(buf);
    let mut pkt = MeshPacket::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Fixed32) => pkt.from = r.read_fixed32()?,
            (2, WireType::Fixed32) => pkt.to = r.read_fixed32()?,
            (3, WireType::Varint) => pkt.channel = r.read_u32()?,
            (4, WireType::Len) => pkt.decoded = Some(data(r.read_bytes()?)?),
            (6, WireType::Fixed32) => pkt.id = r.read_fixed32()?,
            (7, WireType::Fixed32) => pkt.rx_time = r.read_fixed32()?,
            (8, WireType::Fixed32) => pkt.rx_snr = r.read_float()?,
            (9, WireType::Varint) => pkt.hop_limit = r.read_u32()?,
            (10, WireType::Varint) => pkt.want_ack = r.read_bool()?,
            (12, WireType::Varint) => pkt.rx_rssi = r.read_i32()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(pkt)
}

fn data(buf: &[u8]) -> Result<Data, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = Data {
        portnum: PortNum::Other(0),
        payload: heapless::Vec::new(),
    };
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Varint) => out.portnum = PortNum::from(r.read_u32()?),
            (2, WireType::Len) => out.payload = r.read_bytes_into()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn my_node_info(buf: &[u8]) -> Result<MyNodeInfo, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = MyNodeInfo::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Varint) => out.my_node_num = r.read_u32()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn node_info(buf: &[u8]) -> Result<NodeInfo, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = NodeInfo::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Varint) => out.num = r.read_u32()?,
            (2, WireType::Len) => out.user = Some(user(r.read_bytes()?)?),
            (3, WireType::Len) => out.position = Some(position(r.read_bytes()?)?),
            (5, WireType::Fixed32) => out.last_heard = r.read_fixed32()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn user(buf: &[u8]) -> Result<User, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = User::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Len) => out.id = r.read_string()?,
            (2, WireType::Len) => out.long_name = r.read_string()?,
            (3, WireType::Len) => out.short_name = r.read_string()?,
            (5, WireType::Varint) => out.hw_model = r.read_u32()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn position(buf: &[u8]) -> Result<Position, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = Position::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Fixed32) => out.latitude_i = r.read_sfixed32()?,
            (2, WireType::Fixed32) => out.longitude_i = r.read_sfixed32()?,
            (3, WireType::Varint) => out.altitude = r.read_i32()?,
            (4, WireType::Fixed32) => out.time = r.read_fixed32()?,
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn telemetry(buf: &[u8]) -> Result<Telemetry, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = Telemetry::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Fixed32) => out.time = r.read_fixed32()?,
            (2, WireType::Len) => out.device = Some(device_metrics(r.read_bytes()?)?),
            (3, WireType::Len) => out.environment = Some(environment_metrics(r.read_bytes()?)?),
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn device_metrics(buf: &[u8]) -> Result<DeviceMetrics, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = DeviceMetrics::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Varint) => out.battery_level = Some(r.read_u32()?),
            (2, WireType::Fixed32) => out.voltage = Some(r.read_float()?),
            (3, WireType::Fixed32) => out.channel_utilization = Some(r.read_float()?),
            (4, WireType::Fixed32) => out.air_util_tx = Some(r.read_float()?),
            (5, WireType::Varint) => out.uptime_seconds = Some(r.read_u32()?),
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

fn environment_metrics(buf: &[u8]) -> Result<EnvironmentMetrics, DecodeError> {
    let mut r = Reader::new(buf);
    let mut out = EnvironmentMetrics::default();
    while !r.is_empty() {
        match r.read_key()? {
            (1, WireType::Fixed32) => out.temperature = Some(r.read_float()?),
            (2, WireType::Fixed32) => out.relative_humidity = Some(r.read_float()?),
            (3, WireType::Fixed32) => out.barometric_pressure = Some(r.read_float()?),
            (_, wt) => r.skip(wt)?,
        }
    }
    Ok(out)
}

// Encoding

fn put_mesh_packet(w: &mut Writer<'_>, pkt: &MeshPacket) -> Result<(), Overflow> {
    w.fixed32(1, pkt.from)?;
    w.fixed32(2, pkt.to)?;
    w.uint32(3, pkt.channel)?;
    if let Some(data) = &pkt.decoded {
        w.message::<NESTED>(4, |w| {
            w.uint32(1, u32::from(data.portnum))?;
            w.bytes(2, &data.payload)
        })?;
    }
    w.fixed32(6, pkt.id)?;
    w.fixed32(7, pkt.rx_time)?;
    if pkt.rx_snr != 0.0 {
        w.float(8, pkt.rx_snr)?;
    }
    w.uint32(9, pkt.hop_limit)?;
    w.bool(10, pkt.want_ack)?;
    w.int32(12, pkt.rx_rssi)
}

fn put_node_info(w: &mut Writer<'_>, info: &NodeInfo) -> Result<(), Overflow> {
    w.uint32(1, info.num)?;
    if let Some(user) = &info.user {
        w.message::<NESTED>(2, |w| put_user(w, user))?;
    }
    if let Some(pos) = &info.position {
        w.message::<NESTED>(3, |w| put_position(w, pos))?;
    }
    w.fixed32(5, info.last_heard)
}

fn put_user(w: &mut Writer<'_>, user: &User) -> Result<(), Overflow> {
    w.string(1, &user.id)?;
    w.string(2, &user.long_name)?;
    w.string(3, &user.short_name)?;
    w.uint32(5, user.hw_model)
}

fn put_position(w: &mut Writer<'_>, pos: &Position) -> Result<(), Overflow> {
    w.sfixed32(1, pos.latitude_i)?;
    w.sfixed32(2, pos.longitude_i)?;
    w.int32(3, pos.altitude)?;
    w.fixed32(4, pos.time)
}

fn put_telemetry(w: &mut Writer<'_>, t: &Telemetry) -> Result<(), Overflow> {
    w.fixed32(1, t.time)?;
    if let Some(dev) = &t.device {
        w.message::<NESTED>(2, |w| {
            if let Some(v) = dev.battery_level {
                w.put_key(1, WireType::Varint)?;
                w.put_varint(u64::from(v))?;
            }
            if let Some(v) = dev.voltage {
                w.float(2, v)?;
            }
            if let Some(v) = dev.channel_utilization {
                w.float(3, v)?;
            }
            if let Some(v) = dev.air_util_tx {
                w.float(4, v)?;
            }
            if let Some(v) = dev.uptime_seconds {
                w.put_key(5, WireType::Varint)?;
                w.put_varint(u64::from(v))?;
            }
            Ok(())
        })?;
    }
    if let Some(env) = &t.environment {
        w.message::<NESTED>(3, |w| {
            if let Some(v) = env.temperature {
                w.float(1, v)?;
            }
            if let Some(v) = env.relative_humidity {
                w.float(2, v)?;
            }
            if let Some(v) = env.barometric_pressure {
                w.float(3, v)?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    fn text_data(text: &str) -> Data {
        Data {
            portnum: PortNum::TextMessage,
            payload: Vec::from_slice(text.as_bytes()).unwrap(),
        }
    }

    #[test]
    fn want_config_encodes_as_single_varint_field() {
        let mut codec = MeshtasticCodec::new();
        let mut buf = [0u8; 32];
        let n = codec
            .encode_to_radio(&ToRadio::WantConfigId(0xDEAD_BEEF), &mut buf)
            .unwrap();
        // key 0x18, then 0xDEADBEEF as a 5-byte varint
        assert_eq!(&buf[..n], &[0x18, 0xEF, 0xFD, 0xB6, 0xF5, 0x0D]);
    }

    #[test]
    fn config_complete_decodes() {
        let mut codec = MeshtasticCodec::new();
        let frame = [0x38, 0xEF, 0xFD, 0xB6, 0xF5, 0x0D];
        assert_eq!(
            codec.decode_from_radio(&frame),
            Ok(FromRadio::ConfigCompleteId(0xDEAD_BEEF))
        );
    }

    #[test]
    fn my_info_decodes_with_frame_id_prefix() {
        let mut codec = MeshtasticCodec::new();
        // id = 5, my_info { my_node_num = 0x1234 }
        let frame = [0x08, 0x05, 0x1A, 0x03, 0x08, 0xB4, 0x24];
        assert_eq!(
            codec.decode_from_radio(&frame),
            Ok(FromRadio::MyInfo(MyNodeInfo { my_node_num: 0x1234 }))
        );
    }

    #[test]
    fn unknown_variant_is_reported_by_field_number() {
        let mut codec = MeshtasticCodec::new();
        // field 10 (channel), empty message
        let frame = [0x52, 0x00];
        assert_eq!(codec.decode_from_radio(&frame), Ok(FromRadio::Unhandled(10)));
    }

    #[test]
    fn empty_and_oversized_frames_are_rejected() {
        let mut codec = MeshtasticCodec::new();
        assert_eq!(codec.decode_from_radio(&[]), Err(DecodeError::Empty));
        let big = [0u8; MAX_FRAME_LEN + 1];
        assert_eq!(codec.decode_from_radio(&big), Err(DecodeError::Oversized));
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let mut codec = MeshtasticCodec::new();
        // packet field claims 10 bytes, only 2 follow
        let frame = [0x12, 0x0A, 0x0D, 0x01];
        assert_eq!(codec.decode_from_radio(&frame), Err(DecodeError::Truncated));
    }

    #[test]
    fn mesh_packet_survives_peer_encoding() {
        let codec = MeshtasticCodec::new();
        let pkt = MeshPacket {
            from: 0xA1B2_C3D4,
            to: 0xFFFF_FFFF,
            channel: 1,
            id: 0x0102_0304,
            rx_time: 1_700_000_000,
            rx_snr: 6.25,
            rx_rssi: -91,
            hop_limit: 3,
            want_ack: true,
            decoded: Some(text_data("hello mesh")),
        };
        let mut buf = [0u8; MAX_FRAME_LEN];
        let n = codec
            .encode_from_radio(&FromRadio::Packet(pkt.clone()), &mut buf)
            .unwrap();
        let mut codec = codec;
        assert_eq!(codec.decode_from_radio(&buf[..n]), Ok(FromRadio::Packet(pkt)));
    }

    #[test]
    fn node_info_with_user_and_position() {
        let codec = MeshtasticCodec::new();
        let mut user = User::default();
        user.id.push_str("!a1b2c3d4").unwrap();
        user.long_name.push_str("Base Camp").unwrap();
        user.short_name.push_str("BC").unwrap();
        user.hw_model = 9;
        let info = NodeInfo {
            num: 0xA1B2_C3D4,
            user: Some(user),
            position: Some(Position {
                latitude_i: 473_977_420,
                longitude_i: -1_224_194_150,
                altitude: -12,
                time: 0,
            }),
            last_heard: 1_700_000_100,
        };
        let mut buf = [0u8; 128];
        let n = codec
            .encode_from_radio(&FromRadio::NodeInfo(info.clone()), &mut buf)
            .unwrap();
        let mut codec = codec;
        assert_eq!(codec.decode_from_radio(&buf[..n]), Ok(FromRadio::NodeInfo(info)));
    }

    #[test]
    fn text_payload_decodes() {
        let mut codec = MeshtasticCodec::new();
        let payload = codec.decode_app_payload(&text_data("hi")).unwrap();
        match payload {
            AppPayload::Text(s) => assert_eq!(s.as_str(), "hi"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn text_payload_with_bad_utf8_is_rejected() {
        let mut codec = MeshtasticCodec::new();
        let data = Data {
            portnum: PortNum::TextMessage,
            payload: Vec::from_slice(&[0xC3]).unwrap(),
        };
        assert_eq!(codec.decode_app_payload(&data), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn telemetry_payload_decodes_optional_fields() {
        let codec = MeshtasticCodec::new();
        let t = Telemetry {
            time: 0,
            device: Some(DeviceMetrics {
                battery_level: Some(0),
                voltage: Some(4.1),
                ..Default::default()
            }),
            environment: Some(EnvironmentMetrics {
                temperature: Some(21.5),
                relative_humidity: Some(40.0),
                barometric_pressure: None,
            }),
        };
        let mut buf = [0u8; 64];
        let n = codec
            .encode_app_payload(&AppPayload::Telemetry(t), &mut buf)
            .unwrap();
        let data = Data {
            portnum: PortNum::Telemetry,
            payload: Vec::from_slice(&buf[..n]).unwrap(),
        };
        let mut codec = codec;
        assert_eq!(codec.decode_app_payload(&data), Ok(AppPayload::Telemetry(t)));
    }

    #[test]
    fn unsupported_port_is_passed_through() {
        let mut codec = MeshtasticCodec::new();
        let data = Data {
            portnum: PortNum::Other(32),
            payload: Vec::new(),
        };
        assert_eq!(
            codec.decode_app_payload(&data),
            Ok(AppPayload::Unsupported(PortNum::Other(32)))
        );
    }

    #[test]
    fn encode_reports_small_buffer() {
        let mut codec = MeshtasticCodec::new();
        let mut buf = [0u8; 2];
        assert_eq!(
            codec.encode_to_radio(&ToRadio::WantConfigId(0xDEAD_BEEF), &mut buf),
            Err(Error::Encode)
        );
    }
}
