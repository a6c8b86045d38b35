//! Session half of the gateway: WantConfig handshake, fromRadio drain,
//! dispatch of decoded frames, outbound text.

use super::{Gateway, GatewayState, Intent};
use crate::ble::{AttHandle, BleDriver, FrameBuf};
use crate::codec::{AppPayload, Data, FrameCodec, FromRadio, MeshPacket, PortNum, ToRadio};
use crate::config::{BROADCAST_ADDR, DEFAULT_HOP_LIMIT, MAX_DATA_PAYLOAD_LEN, MAX_FRAME_LEN};
use crate::error::{BleError, Error};
use crate::sink::Sink;
use heapless::Vec;

impl<D: BleDriver, S: Sink, C: FrameCodec> Gateway<D, S, C> {
    /// Ask the radio for its config stream, tagged with our handshake id.
    pub(super) fn send_want_config(&mut self) {
        let id = self.config.handshake_id;
        info!("sending WantConfig (id={:#x})", id);
        if let Err(e) = self.write_to_radio(&ToRadio::WantConfigId(id)) {
            error!("WantConfig write failed: {:?}", e);
            self.fail_link(BleError::WriteFailed.into());
        }
    }

    /// fromNum ticked: at least one frame is waiting.
    pub(super) fn on_notify(&mut self, handle: AttHandle) {
        if Some(handle) != self.handles.from_num || !self.state.is_session() {
            return;
        }
        if self.drain_in_flight {
            trace!("fromNum notify during read, marking pending");
            self.drain_pending = true;
        } else {
            debug!("fromNum notify, scheduling drain");
            self.push_intent(Intent::DrainRead);
        }
    }

    /// Executed from `tick`, never from an event handler.
    pub(super) fn issue_drain_read(&mut self) {
        if self.drain_in_flight || !self.state.is_session() {
            return;
        }
        let (Some(conn), Some(from_radio)) = (self.conn, self.handles.from_radio) else {
            return;
        };
        match self.driver.read(conn, from_radio) {
            Ok(()) => self.drain_in_flight = true,
            Err(e) => {
                error!("fromRadio read failed to start: {:?}", e);
                self.fail_link(e.into());
            }
        }
    }

    pub(super) fn on_read_complete(&mut self, handle: AttHandle, result: Result<FrameBuf, i32>) {
        if Some(handle) != self.handles.from_radio || !self.drain_in_flight {
            return;
        }
        self.drain_in_flight = false;

        let frame = match result {
            Ok(frame) => frame,
            Err(status) => {
                error!("fromRadio read error (status={})", status);
                self.fail_link(BleError::ReadFailed.into());
                return;
            }
        };

        if frame.is_empty() {
            if self.drain_pending {
                self.drain_pending = false;
                self.push_intent(Intent::DrainRead);
            } else {
                trace!("fromRadio drained");
            }
            return;
        }

        self.handle_frame(&frame);

        // Dispatch may have ended the session (e.g. a sink-triggered
        // teardown); only keep draining on a live link.
        if self.state.is_session() {
            self.drain_pending = false;
            self.push_intent(Intent::DrainRead);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let msg = match self.codec.decode_from_radio(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping undecodable fromRadio frame ({} bytes): {:?}", frame.len(), e);
                return;
            }
        };

        match msg {
            FromRadio::ConfigCompleteId(id) => self.on_config_complete(id),
            other => {
                if self.state == GatewayState::WantConfig {
                    self.set_state(GatewayState::Syncing);
                }
                match other {
                    FromRadio::Packet(pkt) => self.on_mesh_packet(&pkt),
                    FromRadio::MyInfo(info) => {
                        info!("local node number: {:#x}", info.my_node_num);
                        self.local_node_id = Some(info.my_node_num);
                    }
                    FromRadio::NodeInfo(info) => {
                        debug!("node info: num={:#x}", info.num);
                        self.nodes.update_from_info(&info);
                        if let Some(user) = &info.user {
                            self.publisher.publish_user(info.num, user);
                        }
                    }
                    FromRadio::Unhandled(tag) => debug!("unhandled fromRadio variant {}", tag),
                    FromRadio::ConfigCompleteId(_) => {}
                }
            }
        }
    }

    fn on_config_complete(&mut self, id: u32) {
        if id != self.config.handshake_id {
            warn!(
                "config_complete_id mismatch (got {:#x}, expected {:#x})",
                id, self.config.handshake_id
            );
            return;
        }
        if self.handshake_complete {
            debug!("repeated config_complete_id, ignoring");
            return;
        }
        info!("config sync complete, gateway ready");
        self.handshake_complete = true;
        self.set_state(GatewayState::Ready);
        self.publisher.set_availability(true);
    }

    fn on_mesh_packet(&mut self, pkt: &MeshPacket) {
        if self.dedup.is_duplicate(pkt.id) {
            debug!("dropping duplicate packet id={:#x}", pkt.id);
            return;
        }
        debug!("mesh packet from={:#x} id={:#x}", pkt.from, pkt.id);

        let Some(data) = &pkt.decoded else {
            debug!("packet {:#x} has no decoded payload", pkt.id);
            return;
        };
        let payload = match self.codec.decode_app_payload(data) {
            Ok(p) => p,
            Err(e) => {
                warn!("dropping payload from {:#x}: {:?}", pkt.from, e);
                return;
            }
        };

        match payload {
            AppPayload::Text(text) => self.publisher.publish_text(pkt.from, &text),
            AppPayload::Position(pos) => {
                self.nodes.update_position(pkt.from, &pos, pkt.rx_time);
                self.publisher.publish_position(pkt.from, &pos);
            }
            AppPayload::User(user) => {
                self.nodes.update_user(pkt.from, &user, pkt.rx_time);
                self.publisher.publish_user(pkt.from, &user);
            }
            AppPayload::Telemetry(t) => self.publisher.publish_telemetry(pkt.from, &t),
            AppPayload::Unsupported(port) => {
                debug!("ignoring port {} from {:#x}", u32::from(port), pkt.from)
            }
        }
    }

    /// Broadcast a text message on the primary channel.
    ///
    /// Only valid in READY; otherwise the message is dropped.  Text longer
    /// than one payload is cut at a char boundary.  There is no retry: a
    /// failed write is logged and reported, nothing more.
    pub fn send_text(&mut self, text: &str, now_ms: u64) -> Result<(), Error> {
        if self.state != GatewayState::Ready {
            debug!("send_text in {}, dropping", self.state.as_str());
            return Err(Error::NotReady);
        }

        let mut payload: Vec<u8, MAX_DATA_PAYLOAD_LEN> = Vec::new();
        let cut = floor_char_boundary(text, MAX_DATA_PAYLOAD_LEN);
        // `cut` never exceeds the capacity.
        let _ = payload.extend_from_slice(&text.as_bytes()[..cut]);
        if cut < text.len() {
            warn!("text truncated from {} to {} bytes", text.len(), cut);
        }

        let pkt = MeshPacket {
            from: self.local_node_id.unwrap_or(0),
            to: BROADCAST_ADDR,
            id: self.next_packet_id(now_ms),
            hop_limit: DEFAULT_HOP_LIMIT,
            decoded: Some(Data {
                portnum: PortNum::TextMessage,
                payload,
            }),
            ..Default::default()
        };
        debug!("sending text packet id={:#x}", pkt.id);
        self.write_to_radio(&ToRadio::Packet(pkt)).map_err(|e| {
            error!("text write failed: {:?}", e);
            e
        })
    }

    /// Time-derived, strictly increasing, never zero.
    fn next_packet_id(&mut self, now_ms: u64) -> u32 {
        let mut id = self.last_packet_id.wrapping_add(1).max(now_ms as u32);
        if id == 0 {
            id = 1;
        }
        self.last_packet_id = id;
        id
    }

    fn write_to_radio(&mut self, msg: &ToRadio) -> Result<(), Error> {
        let (Some(conn), Some(to_radio)) = (self.conn, self.handles.to_radio) else {
            return Err(Error::Disconnected);
        };
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = self.codec.encode_to_radio(msg, &mut buf)?;
        self.driver.write(conn, to_radio, &buf[..len], true)?;
        Ok(())
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut i = max;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
