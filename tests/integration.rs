//! End-to-end gateway runs against a simulated Meshtastic radio.

use std::collections::VecDeque;

use heapless::{String, Vec};
use meshgate::ble::uuids::{self, Uuid};
use meshgate::ble::{
    AttHandle, BleDriver, CharacteristicInfo, ConnId, DescriptorInfo, DiscoveryItem, FrameBuf,
    HandleRange, LinkEvent, PeerAddress, ScanParams, ScanReport,
};
use meshgate::codec::{
    AppPayload, Data, DeviceMetrics, FromRadio, MeshPacket, MeshtasticCodec, MyNodeInfo, NodeInfo,
    PortNum, Telemetry, User,
};
use meshgate::config::GatewayConfig;
use meshgate::error::BleError;
use meshgate::sink::Sink;
use meshgate::{Gateway, GatewayState};

const CONN: ConnId = 1;
const TO_RADIO: AttHandle = 12;
const FROM_RADIO: AttHandle = 15;
const FROM_NUM: AttHandle = 18;
const CCCD: AttHandle = 19;
const LOG_RECORD: AttHandle = 22;
const LOCAL_NODE: u32 = 0x1234_5678;

/// A radio that answers every driver call with the completion a real host
/// would report, and serves queued fromRadio frames on read.
#[derive(Default)]
struct SimRadio {
    events: VecDeque<LinkEvent>,
    from_radio: VecDeque<FrameBuf>,
    /// Queued once the first toRadio write (WantConfig) lands.
    config_stream: std::vec::Vec<FrameBuf>,
    to_radio_writes: std::vec::Vec<std::vec::Vec<u8>>,
    reads: usize,
    terminated: bool,
}

impl SimRadio {
    fn deliver(&mut self, frame: FrameBuf) {
        self.from_radio.push_back(frame);
        self.notify();
    }

    fn notify(&mut self) {
        self.events.push_back(LinkEvent::Notify {
            conn: CONN,
            handle: FROM_NUM,
            data: Vec::from_slice(&[1, 0, 0, 0]).unwrap(),
        });
    }
}

impl BleDriver for SimRadio {
    fn start_scan(&mut self, _params: &ScanParams) -> Result<(), BleError> {
        self.events.push_back(report("Tracker", [1, 2, 3, 4, 5, 6]));
        self.events
            .push_back(report("Meshtastic_Node-42_ab", [0xab, 0x42, 0, 0x11, 0x22, 0xc3]));
        Ok(())
    }

    fn cancel_scan(&mut self) {
        self.events.push_back(LinkEvent::ScanComplete);
    }

    fn connect(&mut self, _address: &PeerAddress, _timeout_ms: u32) -> Result<(), BleError> {
        self.events.push_back(LinkEvent::Connected(Ok(CONN)));
        Ok(())
    }

    fn discover_service(&mut self, conn: ConnId, uuid: Uuid) -> Result<(), BleError> {
        assert_eq!(uuid, uuids::MESH_SERVICE);
        for item in [
            DiscoveryItem::Item(HandleRange { start: 10, end: 40 }),
            DiscoveryItem::Done,
        ] {
            self.events
                .push_back(LinkEvent::ServiceDiscovered { conn, item });
        }
        Ok(())
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnId,
        _range: HandleRange,
    ) -> Result<(), BleError> {
        let chars = [
            (uuids::TO_RADIO, TO_RADIO),
            (uuids::FROM_RADIO, FROM_RADIO),
            (uuids::FROM_NUM, FROM_NUM),
            (uuids::LOG_RECORD, LOG_RECORD),
        ];
        for (uuid, value_handle) in chars {
            self.events.push_back(LinkEvent::CharacteristicDiscovered {
                conn,
                item: DiscoveryItem::Item(CharacteristicInfo {
                    uuid,
                    decl_handle: value_handle - 1,
                    value_handle,
                    properties: 0,
                }),
            });
        }
        self.events.push_back(LinkEvent::CharacteristicDiscovered {
            conn,
            item: DiscoveryItem::Done,
        });
        Ok(())
    }

    fn discover_descriptors(&mut self, conn: ConnId, range: HandleRange) -> Result<(), BleError> {
        assert_eq!(range, HandleRange { start: 19, end: 40 });
        for (uuid, handle) in [(uuids::CCCD, CCCD), (uuids::CCCD, 23)] {
            self.events.push_back(LinkEvent::DescriptorDiscovered {
                conn,
                item: DiscoveryItem::Item(DescriptorInfo { uuid, handle }),
            });
        }
        self.events.push_back(LinkEvent::DescriptorDiscovered {
            conn,
            item: DiscoveryItem::Done,
        });
        Ok(())
    }

    fn write(
        &mut self,
        conn: ConnId,
        handle: AttHandle,
        data: &[u8],
        ack: bool,
    ) -> Result<(), BleError> {
        assert!(ack);
        if handle == TO_RADIO {
            self.to_radio_writes.push(data.to_vec());
            if self.to_radio_writes.len() == 1 {
                let stream = std::mem::take(&mut self.config_stream);
                self.from_radio.extend(stream);
                self.notify();
            }
        }
        self.events.push_back(LinkEvent::WriteAck {
            conn,
            handle,
            status: Ok(()),
        });
        Ok(())
    }

    fn read(&mut self, conn: ConnId, handle: AttHandle) -> Result<(), BleError> {
        assert_eq!(handle, FROM_RADIO);
        self.reads += 1;
        let frame = self.from_radio.pop_front().unwrap_or_default();
        self.events.push_back(LinkEvent::ReadComplete {
            conn,
            handle,
            result: Ok(frame),
        });
        Ok(())
    }

    fn terminate(&mut self, conn: ConnId) {
        self.terminated = true;
        self.events
            .push_back(LinkEvent::Disconnected { conn, reason: 0x16 });
    }
}

#[derive(Default)]
struct Recorder {
    lines: std::vec::Vec<(std::string::String, std::string::String, bool)>,
}

impl Recorder {
    fn payloads(&self, topic: &str) -> std::vec::Vec<&str> {
        self.lines
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p.as_str())
            .collect()
    }
}

impl Sink for Recorder {
    fn is_connected(&self) -> bool {
        true
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) {
        self.lines.push((topic.into(), payload.into(), retain));
    }
}

type SimGateway = Gateway<SimRadio, Recorder, MeshtasticCodec>;

fn report(name: &str, bytes: [u8; 6]) -> LinkEvent {
    let mut data = Vec::new();
    data.push(name.len() as u8 + 1).unwrap();
    data.push(0x09).unwrap();
    data.extend_from_slice(name.as_bytes()).unwrap();
    LinkEvent::ScanReport(ScanReport {
        address: PeerAddress { kind: 1, bytes },
        rssi: -55,
        data,
    })
}

fn frame(msg: &FromRadio) -> FrameBuf {
    let mut buf = [0u8; 512];
    let len = MeshtasticCodec::new().encode_from_radio(msg, &mut buf).unwrap();
    FrameBuf::from_slice(&buf[..len]).unwrap()
}

fn app_packet(from: u32, id: u32, payload: &AppPayload, port: PortNum) -> FrameBuf {
    let mut buf = [0u8; 233];
    let len = MeshtasticCodec::new()
        .encode_app_payload(payload, &mut buf)
        .unwrap();
    frame(&FromRadio::Packet(MeshPacket {
        from,
        to: 0xFFFF_FFFF,
        id,
        decoded: Some(Data {
            portnum: port,
            payload: Vec::from_slice(&buf[..len]).unwrap(),
        }),
        ..Default::default()
    }))
}

fn text_packet(from: u32, id: u32, text: &str) -> FrameBuf {
    let mut s = String::new();
    s.push_str(text).unwrap();
    app_packet(from, id, &AppPayload::Text(s), PortNum::TextMessage)
}

fn config_stream(handshake_id: u32) -> std::vec::Vec<FrameBuf> {
    let mut user = User::default();
    user.long_name.push_str("Alpha").unwrap();
    user.hw_model = 9;
    vec![
        frame(&FromRadio::MyInfo(MyNodeInfo {
            my_node_num: LOCAL_NODE,
        })),
        frame(&FromRadio::NodeInfo(NodeInfo {
            num: 0xa1,
            user: Some(user),
            ..Default::default()
        })),
        frame(&FromRadio::ConfigCompleteId(handshake_id)),
    ]
}

/// Alternate ticks and event delivery until nothing is left to do.
fn settle(gw: &mut SimGateway, now_ms: u64) {
    for _ in 0..1_000 {
        gw.tick(now_ms);
        match gw.driver_mut().events.pop_front() {
            Some(event) => gw.handle_event(event),
            None if gw.pending_intents().next().is_none() => return,
            None => {}
        }
    }
    panic!("gateway never settled");
}

fn ready_gateway() -> SimGateway {
    let config = GatewayConfig::by_name("Node-42").unwrap();
    let mut radio = SimRadio::default();
    radio.config_stream = config_stream(config.handshake_id);
    let mut gw = Gateway::new(radio, Recorder::default(), MeshtasticCodec::new(), config);
    gw.start();
    gw.handle_event(LinkEvent::HostSynced);
    settle(&mut gw, 0);
    gw
}

#[test]
fn handshake_reaches_ready() {
    let gw = ready_gateway();

    assert_eq!(gw.state(), GatewayState::Ready);
    assert!(gw.handshake_complete());
    assert_eq!(gw.local_node_id(), Some(LOCAL_NODE));
    assert_eq!(gw.handles().from_num_cccd, Some(CCCD));
    assert_eq!(
        gw.sink().payloads("meshtastic/gateway/status"),
        ["offline", "online"]
    );
    assert_eq!(
        gw.sink().payloads("meshtastic/000000A1/nodeinfo/long_name"),
        ["Alpha"]
    );
    assert_eq!(gw.nodes().len(), 1);

    // want_config_id = 0xDEADBEEF
    assert_eq!(
        gw.driver().to_radio_writes,
        [vec![0x18, 0xEF, 0xFD, 0xB6, 0xF5, 0x0D]]
    );
    // Three config frames plus the empty read that ends the drain.
    assert_eq!(gw.driver().reads, 4);
    assert!(!gw.drain_in_flight());
}

#[test]
fn steady_state_traffic_is_published_once() {
    let mut gw = ready_gateway();

    let hello = text_packet(0xa1, 0x77, "hello mesh");
    gw.driver_mut().deliver(hello.clone());
    gw.driver_mut().deliver(hello);
    let telemetry = Telemetry {
        device: Some(DeviceMetrics {
            battery_level: Some(87),
            voltage: Some(3.92),
            ..Default::default()
        }),
        ..Default::default()
    };
    let tel = app_packet(0xa1, 0x78, &AppPayload::Telemetry(telemetry), PortNum::Telemetry);
    gw.driver_mut().deliver(tel);
    settle(&mut gw, 1_000);

    let sink = gw.sink();
    assert_eq!(sink.payloads("meshtastic/000000A1/text"), ["hello mesh"]);
    assert_eq!(
        sink.payloads("meshtastic/000000A1/telemetry/battery_level"),
        ["87"]
    );
    assert_eq!(sink.payloads("meshtastic/000000A1/telemetry/voltage"), ["3.92"]);
    assert_eq!(gw.state(), GatewayState::Ready);
}

#[test]
fn outbound_text_goes_to_to_radio() {
    let mut gw = ready_gateway();

    gw.send_text("ping", 5_000).unwrap();
    settle(&mut gw, 5_000);

    let writes = &gw.driver().to_radio_writes;
    assert_eq!(writes.len(), 2);
    // ToRadio.packet (field 1, length-delimited) wrapping our text.
    assert_eq!(writes[1][0], 0x0A);
    assert!(writes[1].windows(4).any(|w| w == b"ping"));
}

#[test]
fn link_loss_goes_offline_and_rescans_after_interval() {
    let mut gw = ready_gateway();

    gw.handle_event(LinkEvent::Disconnected {
        conn: CONN,
        reason: 0x08,
    });
    assert_eq!(gw.state(), GatewayState::Idle);
    assert_eq!(gw.local_node_id(), None);
    assert!(gw.nodes().is_empty());
    assert_eq!(
        gw.sink().payloads("meshtastic/gateway/status"),
        ["offline", "online", "offline"]
    );

    gw.tick(29_999);
    assert_eq!(gw.state(), GatewayState::Idle);

    gw.driver_mut().config_stream = config_stream(0xDEAD_BEEF);
    gw.driver_mut().to_radio_writes.clear();
    settle(&mut gw, 30_000);
    assert_eq!(gw.state(), GatewayState::Ready);
    assert_eq!(
        gw.sink().payloads("meshtastic/gateway/status"),
        ["offline", "online", "offline", "online"]
    );
}

#[test]
fn mismatched_handshake_never_goes_ready() {
    let config = GatewayConfig::by_name("Node-42")
        .unwrap()
        .with_handshake_id(0x1111)
        .unwrap();
    let mut radio = SimRadio::default();
    radio.config_stream = config_stream(0x2222);
    let mut gw = Gateway::new(radio, Recorder::default(), MeshtasticCodec::new(), config);
    gw.start();
    gw.handle_event(LinkEvent::HostSynced);
    settle(&mut gw, 0);

    assert_eq!(gw.state(), GatewayState::Syncing);
    assert!(!gw.handshake_complete());
    assert_eq!(gw.sink().payloads("meshtastic/gateway/status"), ["offline"]);
    assert!(!gw.driver().terminated);
}
