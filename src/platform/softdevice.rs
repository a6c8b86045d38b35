//! S140 SoftDevice central.
//!
//! [`ChannelDriver`] is the gateway-facing half: every [`BleDriver`] call is
//! queued as a [`DriverCommand`] for [`ble_task`], which owns the SoftDevice
//! and posts each outcome back as a [`LinkEvent`].
//!
//! The S140 GATT client resolves the whole Meshtastic service in a single
//! discovery procedure.  The resolved handles are cached per connection and
//! replayed as the service / characteristic / descriptor cursors the gateway
//! walks through.

use super::{COMMAND_QUEUE_DEPTH, EVENT_QUEUE_DEPTH};
use crate::ble::uuids;
use crate::ble::{
    AdvData, AttHandle, BleDriver, CharacteristicInfo, ConnId, DescriptorInfo, DiscoveryItem,
    FrameBuf, HandleRange, LinkEvent, PeerAddress, ScanParams, ScanReport, Uuid,
};
use crate::ble::driver::read_fills_mtu;
use crate::config::{ATT_MTU, BLE_SCAN_DURATION_SECS, MAX_FRAME_LEN};
use crate::error::BleError;
use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{with_timeout, Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{DiscoverError, ReadError, WriteError};
use nrf_softdevice::ble::{central, gatt_client, Address, AddressType, Connection};
use nrf_softdevice::{raw, Softdevice};

type Commands = Receiver<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>;
type Events = Sender<'static, CriticalSectionRawMutex, LinkEvent, EVENT_QUEUE_DEPTH>;

/// Status reported when the SoftDevice gives no GATT status of its own.
const STATUS_FAILED: i32 = -1;
/// Connect attempt hit the application timeout.
const STATUS_TIMEOUT: i32 = -2;

/// HCI disconnect reasons.
const REASON_REMOTE_USER: i32 = 0x13;
const REASON_LOCAL_HOST: i32 = 0x16;

/// Characteristic property bits.
const PROP_READ: u8 = 0x02;
const PROP_WRITE: u8 = 0x08;
const PROP_NOTIFY: u8 = 0x10;

/// Generated GATT client for the Meshtastic service.
#[nrf_softdevice::gatt_client(uuid = "6ba1b218-15a8-461f-9fa8-5dcae273eafd")]
pub struct MeshServiceClient {
    #[characteristic(uuid = "f75c76d2-129e-4dad-a1dd-7866124401e7", write)]
    pub to_radio: Vec<u8, MAX_FRAME_LEN>,

    #[characteristic(uuid = "2c55e69e-4993-11ed-b878-0242ac120002", read)]
    pub from_radio: Vec<u8, MAX_FRAME_LEN>,

    /// Bumped by the radio whenever a fromRadio frame is queued.
    #[characteristic(uuid = "ed9da18c-a800-4f66-a670-aa7547e34453", read, notify)]
    pub from_num: u32,
}

/// One queued [`BleDriver`] operation.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverCommand {
    StartScan(ScanParams),
    CancelScan,
    Connect { address: PeerAddress, timeout_ms: u32 },
    DiscoverService { conn: ConnId, uuid: Uuid },
    DiscoverCharacteristics { conn: ConnId, range: HandleRange },
    DiscoverDescriptors { conn: ConnId, range: HandleRange },
    Write { conn: ConnId, handle: AttHandle, data: FrameBuf, ack: bool },
    Read { conn: ConnId, handle: AttHandle },
    Terminate { conn: ConnId },
}

/// [`BleDriver`] that forwards every operation to [`ble_task`].
///
/// Never blocks: a full command queue is reported as a refusal.
pub struct ChannelDriver {
    commands: Sender<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>,
}

impl ChannelDriver {
    pub fn new(
        commands: Sender<'static, CriticalSectionRawMutex, DriverCommand, COMMAND_QUEUE_DEPTH>,
    ) -> Self {
        Self { commands }
    }

    fn post(&self, cmd: DriverCommand, refusal: BleError) -> Result<(), BleError> {
        self.commands.try_send(cmd).map_err(|_| {
            warn!("BLE command queue full");
            refusal
        })
    }
}

impl BleDriver for ChannelDriver {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), BleError> {
        self.post(DriverCommand::StartScan(*params), BleError::ScanFailed)
    }

    fn cancel_scan(&mut self) {
        let _ = self.post(DriverCommand::CancelScan, BleError::ScanFailed);
    }

    fn connect(&mut self, address: &PeerAddress, timeout_ms: u32) -> Result<(), BleError> {
        self.post(
            DriverCommand::Connect {
                address: *address,
                timeout_ms,
            },
            BleError::ConnectFailed,
        )
    }

    fn discover_service(&mut self, conn: ConnId, uuid: Uuid) -> Result<(), BleError> {
        self.post(
            DriverCommand::DiscoverService { conn, uuid },
            BleError::DiscoveryFailed,
        )
    }

    fn discover_characteristics(
        &mut self,
        conn: ConnId,
        range: HandleRange,
    ) -> Result<(), BleError> {
        self.post(
            DriverCommand::DiscoverCharacteristics { conn, range },
            BleError::DiscoveryFailed,
        )
    }

    fn discover_descriptors(&mut self, conn: ConnId, range: HandleRange) -> Result<(), BleError> {
        self.post(
            DriverCommand::DiscoverDescriptors { conn, range },
            BleError::DiscoveryFailed,
        )
    }

    fn write(
        &mut self,
        conn: ConnId,
        handle: AttHandle,
        data: &[u8],
        ack: bool,
    ) -> Result<(), BleError> {
        let data = FrameBuf::from_slice(data).map_err(|_| BleError::WriteFailed)?;
        self.post(
            DriverCommand::Write {
                conn,
                handle,
                data,
                ack,
            },
            BleError::WriteFailed,
        )
    }

    fn read(&mut self, conn: ConnId, handle: AttHandle) -> Result<(), BleError> {
        self.post(DriverCommand::Read { conn, handle }, BleError::ReadFailed)
    }

    fn terminate(&mut self, conn: ConnId) {
        let _ = self.post(DriverCommand::Terminate { conn }, BleError::Raw(STATUS_FAILED));
    }
}

/// Enable the SoftDevice for a single central link.
///
/// Must be called exactly once, before any other SoftDevice API.
pub fn enable() -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: ATT_MTU }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 0,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    };
    Softdevice::enable(&config)
}

/// Owns the SoftDevice and executes queued [`DriverCommand`]s.
///
/// Runs forever.  At most one connection exists at a time; while it is up,
/// fromNum notifications are pumped concurrently with command handling.
pub async fn ble_task(sd: &'static Softdevice, commands: Commands, events: Events) -> ! {
    info!("BLE task started");
    events.send(LinkEvent::HostSynced).await;

    let mut pending: Option<DriverCommand> = None;
    loop {
        let cmd = match pending.take() {
            Some(cmd) => cmd,
            None => commands.receive().await,
        };

        match cmd {
            DriverCommand::StartScan(params) => {
                pending = scan(sd, &params, &commands, &events).await;
            }
            DriverCommand::Connect {
                address,
                timeout_ms,
            } => match connect(sd, &address, timeout_ms).await {
                Ok((conn, id)) => {
                    events.send(LinkEvent::Connected(Ok(id))).await;
                    let reason = run_connection(&conn, id, &commands, &events).await;
                    info!("BLE link {} closed (reason={:#x})", id, reason);
                    events
                        .send(LinkEvent::Disconnected { conn: id, reason })
                        .await;
                }
                Err(status) => events.send(LinkEvent::Connected(Err(status))).await,
            },
            DriverCommand::CancelScan => {}
            other => debug!("no link, dropping {:?}", other),
        }
    }
}

/// Scan until a cancel, the scan window expires or another command arrives.
///
/// Returns a command that interrupted the scan so the caller runs it next.
async fn scan(
    sd: &Softdevice,
    params: &ScanParams,
    commands: &Commands,
    events: &Events,
) -> Option<DriverCommand> {
    info!("BLE scan starting ({} s window)", BLE_SCAN_DURATION_SECS);

    let config = central::ScanConfig {
        active: !params.passive,
        interval: ms_to_units(params.interval_ms),
        window: ms_to_units(params.window_ms),
        ..Default::default()
    };

    let reports = central::scan(sd, &config, |report| {
        let data =
            unsafe { core::slice::from_raw_parts(report.data.p_data, report.data.len as usize) };
        let address = Address::from_raw(report.peer_addr);

        let mut adv = AdvData::new();
        let _ = adv.extend_from_slice(&data[..data.len().min(adv.capacity())]);

        let event = LinkEvent::ScanReport(ScanReport {
            address: PeerAddress {
                kind: address.address_type() as u8,
                bytes: address.bytes(),
            },
            rssi: report.rssi,
            data: adv,
        });
        if events.try_send(event).is_err() {
            trace!("event queue full, dropping scan report");
        }
        None::<()>
    });

    let next = match select3(
        reports,
        commands.receive(),
        Timer::after(Duration::from_secs(BLE_SCAN_DURATION_SECS)),
    )
    .await
    {
        Either3::First(Ok(())) => None,
        Either3::First(Err(_)) => {
            warn!("BLE scan ended with error");
            None
        }
        Either3::Second(DriverCommand::CancelScan) => None,
        Either3::Second(other) => Some(other),
        Either3::Third(()) => None,
    };

    events.send(LinkEvent::ScanComplete).await;
    next
}

/// Scan interval / window in 0.625 ms units.
fn ms_to_units(ms: u16) -> u32 {
    u32::from(ms) * 8 / 5
}

fn address_type(kind: u8) -> AddressType {
    match kind {
        0 => AddressType::Public,
        1 => AddressType::RandomStatic,
        2 => AddressType::RandomPrivateResolvable,
        _ => AddressType::RandomPrivateNonResolvable,
    }
}

async fn connect(
    sd: &Softdevice,
    address: &PeerAddress,
    timeout_ms: u32,
) -> Result<(Connection, ConnId), i32> {
    let target = Address::new(address_type(address.kind), address.bytes);
    let whitelist = [&target];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        ..Default::default()
    };

    let timeout = Duration::from_millis(u64::from(timeout_ms));
    let conn = match with_timeout(timeout, central::connect(sd, &config)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(_)) => {
            warn!("BLE connect failed");
            return Err(STATUS_FAILED);
        }
        Err(_) => {
            warn!("BLE connect timed out after {} ms", timeout_ms);
            return Err(STATUS_TIMEOUT);
        }
    };

    let id = conn.handle().ok_or(STATUS_FAILED)?;
    Ok((conn, id))
}

/// Serve one connection.  Returns the disconnect reason.
async fn run_connection(
    conn: &Connection,
    id: ConnId,
    commands: &Commands,
    events: &Events,
) -> i32 {
    let client = match resolve_service(conn, id, commands, events).await {
        Ok(client) => client,
        Err(reason) => return reason,
    };
    let client = &client;

    let notifications = gatt_client::run(conn, client, |event| match event {
        MeshServiceClientEvent::FromNumNotification(num) => {
            let mut data = Vec::new();
            let _ = data.extend_from_slice(&num.to_le_bytes());
            let event = LinkEvent::Notify {
                conn: id,
                handle: client.from_num_value_handle,
                data,
            };
            if events.try_send(event).is_err() {
                warn!("event queue full, dropping fromNum notify");
            }
        }
    });

    match select(notifications, serve(conn, id, client, commands, events)).await {
        Either::First(_) => REASON_REMOTE_USER,
        Either::Second(reason) => reason,
    }
}

/// Wait for the service discovery request and run the GATT discovery.
async fn resolve_service(
    conn: &Connection,
    id: ConnId,
    commands: &Commands,
    events: &Events,
) -> Result<MeshServiceClient, i32> {
    loop {
        match commands.receive().await {
            DriverCommand::DiscoverService { conn: c, uuid } if c == id => {
                if uuid != uuids::MESH_SERVICE {
                    warn!("only the mesh service can be discovered");
                    events.send(service_event(id, DiscoveryItem::Done)).await;
                    continue;
                }
                match gatt_client::discover::<MeshServiceClient>(conn).await {
                    Ok(client) => {
                        let range = service_range(&client);
                        events
                            .send(service_event(id, DiscoveryItem::Item(range)))
                            .await;
                        events.send(service_event(id, DiscoveryItem::Done)).await;
                        return Ok(client);
                    }
                    Err(DiscoverError::Disconnected) => return Err(REASON_REMOTE_USER),
                    Err(DiscoverError::ServiceNotFound) => {
                        events.send(service_event(id, DiscoveryItem::Done)).await;
                    }
                    Err(_) => {
                        warn!("mesh service discovery failed");
                        events
                            .send(service_event(id, DiscoveryItem::Error(STATUS_FAILED)))
                            .await;
                    }
                }
            }
            DriverCommand::Terminate { conn: c } if c == id => {
                let _ = conn.disconnect();
                return Err(REASON_LOCAL_HOST);
            }
            other => debug!("discovery pending, dropping {:?}", other),
        }
    }
}

/// Execute commands against a resolved link until it is terminated or lost.
async fn serve(
    conn: &Connection,
    id: ConnId,
    client: &MeshServiceClient,
    commands: &Commands,
    events: &Events,
) -> i32 {
    loop {
        let cmd = commands.receive().await;
        match cmd {
            DriverCommand::DiscoverService { conn: c, .. } if c == id => {
                let range = service_range(client);
                events
                    .send(service_event(id, DiscoveryItem::Item(range)))
                    .await;
                events.send(service_event(id, DiscoveryItem::Done)).await;
            }
            DriverCommand::DiscoverCharacteristics { conn: c, range } if c == id => {
                for chr in characteristics(client) {
                    if contains(range, chr.value_handle) {
                        events
                            .send(LinkEvent::CharacteristicDiscovered {
                                conn: id,
                                item: DiscoveryItem::Item(chr),
                            })
                            .await;
                    }
                }
                events
                    .send(LinkEvent::CharacteristicDiscovered {
                        conn: id,
                        item: DiscoveryItem::Done,
                    })
                    .await;
            }
            DriverCommand::DiscoverDescriptors { conn: c, range } if c == id => {
                if contains(range, client.from_num_cccd_handle) {
                    let cccd = DescriptorInfo {
                        uuid: uuids::CCCD,
                        handle: client.from_num_cccd_handle,
                    };
                    events
                        .send(LinkEvent::DescriptorDiscovered {
                            conn: id,
                            item: DiscoveryItem::Item(cccd),
                        })
                        .await;
                }
                events
                    .send(LinkEvent::DescriptorDiscovered {
                        conn: id,
                        item: DiscoveryItem::Done,
                    })
                    .await;
            }
            DriverCommand::Write {
                conn: c,
                handle,
                data,
                ack,
            } if c == id => {
                let result = if ack {
                    gatt_client::write(conn, handle, &data).await
                } else {
                    gatt_client::write_without_response(conn, handle, &data).await
                };
                let status = match result {
                    Ok(()) => Ok(()),
                    Err(WriteError::Disconnected) => return REASON_REMOTE_USER,
                    Err(_) => Err(STATUS_FAILED),
                };
                if ack {
                    events
                        .send(LinkEvent::WriteAck {
                            conn: id,
                            handle,
                            status,
                        })
                        .await;
                } else if status.is_err() {
                    warn!("write without response to {} failed", handle);
                }
            }
            DriverCommand::Read { conn: c, handle } if c == id => {
                let mut buf = [0u8; MAX_FRAME_LEN];
                let result = match gatt_client::read(conn, handle, &mut buf).await {
                    Ok(len) => {
                        if read_fills_mtu(len, ATT_MTU) {
                            warn!(
                                "fromRadio read filled the ATT payload ({} bytes), frame may be truncated",
                                len
                            );
                        }
                        FrameBuf::from_slice(&buf[..len]).map_err(|_| STATUS_FAILED)
                    }
                    Err(ReadError::Disconnected) => return REASON_REMOTE_USER,
                    Err(_) => Err(STATUS_FAILED),
                };
                events
                    .send(LinkEvent::ReadComplete {
                        conn: id,
                        handle,
                        result,
                    })
                    .await;
            }
            DriverCommand::Terminate { conn: c } if c == id => {
                let _ = conn.disconnect();
                return REASON_LOCAL_HOST;
            }
            other => debug!("dropping {:?}", other),
        }
    }
}

fn service_event(conn: ConnId, item: DiscoveryItem<HandleRange>) -> LinkEvent {
    LinkEvent::ServiceDiscovered { conn, item }
}

fn contains(range: HandleRange, handle: AttHandle) -> bool {
    (range.start..=range.end).contains(&handle)
}

/// Service range covering every resolved handle.  The service declaration
/// sits right before the first characteristic declaration.
fn service_range(client: &MeshServiceClient) -> HandleRange {
    let handles = [
        client.to_radio_value_handle,
        client.from_radio_value_handle,
        client.from_num_value_handle,
        client.from_num_cccd_handle,
    ];
    let first = handles.iter().copied().min().unwrap_or(0);
    let last = handles.iter().copied().max().unwrap_or(0);
    HandleRange {
        start: first.saturating_sub(2),
        end: last,
    }
}

fn characteristics(client: &MeshServiceClient) -> [CharacteristicInfo; 3] {
    let info = |uuid: Uuid, value_handle: AttHandle, properties: u8| CharacteristicInfo {
        uuid,
        decl_handle: value_handle.saturating_sub(1),
        value_handle,
        properties,
    };
    [
        info(uuids::TO_RADIO, client.to_radio_value_handle, PROP_WRITE),
        info(uuids::FROM_RADIO, client.from_radio_value_handle, PROP_READ),
        info(
            uuids::FROM_NUM,
            client.from_num_value_handle,
            PROP_READ | PROP_NOTIFY,
        ),
    ]
}
