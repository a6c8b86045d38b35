//! Link half of the gateway: scan, connect, GATT discovery, subscribe.

use super::{Gateway, GatewayState};
use crate::ble::adv_parser::{address_matches, extract_device_name, name_matches};
use crate::ble::uuids::{self, CCCD_ENABLE_NOTIFY};
use crate::ble::{
    AttHandle, BleDriver, CharacteristicInfo, ConnId, DescriptorInfo, DiscoveryItem, HandleRange,
    ScanParams, ScanReport,
};
use crate::codec::FrameCodec;
use crate::config::{
    PeerSelector, BLE_SCAN_INTERVAL_MS, BLE_SCAN_WINDOW_MS, CONNECT_TIMEOUT_MS,
};
use crate::error::{BleError, Error};
use crate::sink::Sink;

/// Sub-phase of [`GatewayState::Discovering`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryStep {
    Service,
    Characteristics,
    Descriptors,
    /// CCCD write issued, waiting for the write response.
    Subscribe,
}

const SCAN_PARAMS: ScanParams = ScanParams {
    passive: true,
    filter_duplicates: true,
    interval_ms: BLE_SCAN_INTERVAL_MS,
    window_ms: BLE_SCAN_WINDOW_MS,
};

impl<D: BleDriver, S: Sink, C: FrameCodec> Gateway<D, S, C> {
    pub(super) fn start_scan(&mut self) {
        if self.state != GatewayState::Idle {
            debug!("scan requested in {}, ignoring", self.state.as_str());
            return;
        }
        self.last_connect_attempt = Some(self.now_ms);
        match &self.config.peer {
            PeerSelector::Name(name) => info!("scanning for '{}'", name.as_str()),
            PeerSelector::Address(_) => info!("scanning for configured address"),
        }
        self.set_state(GatewayState::Scanning);
        if let Err(e) = self.driver.start_scan(&SCAN_PARAMS) {
            error!("start_scan failed: {:?}", e);
            self.set_state(GatewayState::Idle);
        }
    }

    pub(super) fn on_scan_report(&mut self, report: &ScanReport) {
        // Reports still trickle in after a match until the cancel lands.
        if self.state != GatewayState::Scanning {
            return;
        }
        if !self.peer_matches(report) {
            return;
        }
        self.connect(report);
    }

    fn peer_matches(&self, report: &ScanReport) -> bool {
        match &self.config.peer {
            PeerSelector::Address(addr) => {
                let hit = address_matches(addr, &report.address.bytes);
                if hit {
                    info!("matched node by address (rssi {})", report.rssi);
                }
                hit
            }
            PeerSelector::Name(name) => match extract_device_name(&report.data) {
                Some(adv) if name_matches(name.as_bytes(), &adv) => {
                    info!(
                        "matched node by name: {} in {} advertised bytes (rssi {})",
                        name.as_str(),
                        adv.len(),
                        report.rssi
                    );
                    true
                }
                _ => false,
            },
        }
    }

    fn connect(&mut self, report: &ScanReport) {
        self.peer = Some(report.address);
        self.set_state(GatewayState::Connecting);
        // The host cannot scan and initiate at the same time.
        self.driver.cancel_scan();
        if let Err(e) = self.driver.connect(&report.address, CONNECT_TIMEOUT_MS) {
            error!("connect failed to start: {:?}", e);
            self.peer = None;
            self.set_state(GatewayState::Idle);
        }
    }

    pub(super) fn on_scan_complete(&mut self) {
        if self.state == GatewayState::Scanning {
            warn!("scan complete, node not found");
            self.set_state(GatewayState::Idle);
        }
    }

    pub(super) fn on_connected(&mut self, result: Result<ConnId, i32>) {
        match (self.state, result) {
            (GatewayState::Connecting, Ok(conn)) => {
                info!("BLE connected (conn={})", conn);
                self.conn = Some(conn);
                self.begin_discovery(conn);
            }
            (GatewayState::Connecting, Err(status)) => {
                warn!("BLE connect failed (status={})", status);
                self.peer = None;
                self.set_state(GatewayState::Idle);
            }
            (state, Ok(conn)) => {
                warn!("unexpected connection {} in {}, dropping", conn, state.as_str());
                self.driver.terminate(conn);
            }
            (_, Err(_)) => {}
        }
    }

    fn begin_discovery(&mut self, conn: ConnId) {
        self.set_state(GatewayState::Discovering);
        self.step = DiscoveryStep::Service;
        info!("discovering mesh service");
        if let Err(e) = self.driver.discover_service(conn, uuids::MESH_SERVICE) {
            self.fail_link(e.into());
        }
    }

    pub(super) fn on_service(&mut self, item: DiscoveryItem<HandleRange>) {
        if !self.in_step(DiscoveryStep::Service) {
            return;
        }
        match item {
            DiscoveryItem::Item(range) => {
                if self.handles.service.is_none() {
                    info!("mesh service at handles {}..{}", range.start, range.end);
                    self.handles.service = Some(range);
                }
            }
            DiscoveryItem::Done => match (self.conn, self.handles.service) {
                (Some(conn), Some(range)) => {
                    self.step = DiscoveryStep::Characteristics;
                    if let Err(e) = self.driver.discover_characteristics(conn, range) {
                        self.fail_link(e.into());
                    }
                }
                _ => {
                    error!("mesh service not found");
                    self.fail_link(Error::ServiceNotFound);
                }
            },
            DiscoveryItem::Error(status) => {
                error!("service discovery error (status={})", status);
                self.fail_link(BleError::DiscoveryFailed.into());
            }
        }
    }

    pub(super) fn on_characteristic(&mut self, item: DiscoveryItem<CharacteristicInfo>) {
        if !self.in_step(DiscoveryStep::Characteristics) {
            return;
        }
        match item {
            DiscoveryItem::Item(chr) => self.record_characteristic(&chr),
            DiscoveryItem::Done => {
                let (Some(_), Some(_), Some(from_num)) = (
                    self.handles.to_radio,
                    self.handles.from_radio,
                    self.handles.from_num,
                ) else {
                    error!("required characteristics missing");
                    self.fail_link(Error::CharacteristicNotFound);
                    return;
                };
                self.discover_cccd(from_num);
            }
            DiscoveryItem::Error(status) => {
                error!("characteristic discovery error (status={})", status);
                self.fail_link(BleError::DiscoveryFailed.into());
            }
        }
    }

    fn record_characteristic(&mut self, chr: &CharacteristicInfo) {
        let slot = if chr.uuid == uuids::TO_RADIO {
            &mut self.handles.to_radio
        } else if chr.uuid == uuids::FROM_RADIO {
            &mut self.handles.from_radio
        } else if chr.uuid == uuids::FROM_NUM {
            &mut self.handles.from_num
        } else {
            debug!("ignoring characteristic at {}", chr.value_handle);
            return;
        };
        *slot = Some(chr.value_handle);
        info!("characteristic {:?} at handle {}", chr.uuid, chr.value_handle);
    }

    /// Descriptors of fromNum lie after its value handle, up to the end of
    /// the service.
    fn discover_cccd(&mut self, from_num: AttHandle) {
        let (Some(conn), Some(service)) = (self.conn, self.handles.service) else {
            self.fail_link(Error::Disconnected);
            return;
        };
        let start = from_num.saturating_add(1);
        if start > service.end {
            error!("fromNum has no descriptors");
            self.fail_link(Error::CccdNotFound);
            return;
        }
        self.step = DiscoveryStep::Descriptors;
        let range = HandleRange {
            start,
            end: service.end,
        };
        if let Err(e) = self.driver.discover_descriptors(conn, range) {
            self.fail_link(e.into());
        }
    }

    pub(super) fn on_descriptor(&mut self, item: DiscoveryItem<DescriptorInfo>) {
        if !self.in_step(DiscoveryStep::Descriptors) {
            return;
        }
        match item {
            DiscoveryItem::Item(dsc) => {
                if dsc.uuid == uuids::CCCD && self.handles.from_num_cccd.is_none() {
                    info!("fromNum CCCD at handle {}", dsc.handle);
                    self.handles.from_num_cccd = Some(dsc.handle);
                }
            }
            DiscoveryItem::Done => match (self.conn, self.handles.from_num_cccd) {
                (Some(conn), Some(cccd)) => self.subscribe(conn, cccd),
                _ => {
                    error!("fromNum CCCD not found");
                    self.fail_link(Error::CccdNotFound);
                }
            },
            DiscoveryItem::Error(status) => {
                error!("descriptor discovery error (status={})", status);
                self.fail_link(BleError::DiscoveryFailed.into());
            }
        }
    }

    fn subscribe(&mut self, conn: ConnId, cccd: AttHandle) {
        info!("enabling fromNum notifications");
        self.step = DiscoveryStep::Subscribe;
        if let Err(e) = self.driver.write(conn, cccd, &CCCD_ENABLE_NOTIFY, true) {
            self.fail_link(e.into());
        }
    }

    pub(super) fn on_write_ack(&mut self, handle: AttHandle, status: Result<(), i32>) {
        if self.in_step(DiscoveryStep::Subscribe) && Some(handle) == self.handles.from_num_cccd {
            match status {
                Ok(()) => {
                    info!("fromNum notifications enabled");
                    self.set_state(GatewayState::WantConfig);
                    self.send_want_config();
                }
                Err(code) => {
                    error!("CCCD write failed (status={})", code);
                    self.fail_link(BleError::SubscribeFailed.into());
                }
            }
            return;
        }
        if Some(handle) == self.handles.to_radio {
            match status {
                Ok(()) => trace!("toRadio write acknowledged"),
                // Only WantConfig is written before READY.
                Err(code) if self.state == GatewayState::WantConfig => {
                    error!("WantConfig write failed (status={})", code);
                    self.fail_link(BleError::WriteFailed.into());
                }
                Err(code) => warn!("toRadio write failed (status={})", code),
            }
        }
    }

    fn in_step(&self, step: DiscoveryStep) -> bool {
        self.state == GatewayState::Discovering && self.step == step
    }

    /// Fatal link error: drop the connection and wait for the host to
    /// confirm.  Without a connection there is nothing to wait for.
    pub(super) fn fail_link(&mut self, reason: Error) {
        warn!("link failed: {:?}", reason);
        self.handles = Default::default();
        self.drain_in_flight = false;
        self.drain_pending = false;
        self.intents.clear();
        match self.conn {
            Some(conn) if self.state != GatewayState::Disconnecting => {
                self.driver.terminate(conn);
                self.disconnect_started = self.now_ms;
                self.set_state(GatewayState::Disconnecting);
            }
            Some(_) => {}
            None => self.teardown(),
        }
    }
}
