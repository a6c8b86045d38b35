//! Boundary to the BLE host stack.
//!
//! The gateway never calls into the radio synchronously and waits.  Every
//! operation is issued through [`BleDriver`] and returns immediately; the
//! outcome arrives later as a [`LinkEvent`] that the owner of the gateway
//! feeds into `Gateway::handle_event`.  A driver method only returns `Err`
//! when the host refused to start the operation at all.
//!
//! Multi-result operations (service, characteristic and descriptor
//! discovery) follow a cursor contract: zero or more
//! [`DiscoveryItem::Item`] events followed by exactly one `Done` or `Error`.

use crate::config::MAX_FRAME_LEN;
use crate::error::BleError;
use crate::ble::uuids::Uuid;
use heapless::Vec;

/// Connection handle assigned by the host.
pub type ConnId = u16;

/// ATT attribute handle.
pub type AttHandle = u16;

/// Raw advertisement payload (legacy advertising, 31 bytes max).
pub type AdvData = Vec<u8, 31>;

/// One fromRadio frame as returned by a read.
pub type FrameBuf = Vec<u8, MAX_FRAME_LEN>;

/// `true` when a single ATT read of `len` bytes filled the whole payload
/// an `mtu` allows, so the attribute value may continue past it.
pub fn read_fills_mtu(len: usize, mtu: u16) -> bool {
    len >= usize::from(mtu.saturating_sub(1))
}

/// Link-layer address of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    /// 0 = public, 1 = random static, 2/3 = private.
    pub kind: u8,
    /// Address bytes, least-significant first.
    pub bytes: [u8; 6],
}

/// An attribute handle range (inclusive on both ends).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: AttHandle,
    pub end: AttHandle,
}

/// A characteristic reported during discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub decl_handle: AttHandle,
    pub value_handle: AttHandle,
    pub properties: u8,
}

/// A descriptor reported during discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub handle: AttHandle,
}

/// One step of a discovery enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryItem<T> {
    /// A matching item; more may follow.
    Item(T),
    /// Enumeration finished normally.
    Done,
    /// Enumeration aborted with a host status code.
    Error(i32),
}

/// An advertising report received while scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    pub address: PeerAddress,
    pub rssi: i8,
    pub data: AdvData,
}

/// Scan parameters handed to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub passive: bool,
    pub filter_duplicates: bool,
    pub interval_ms: u16,
    pub window_ms: u16,
}

/// Completions and unsolicited events delivered by the host.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// The host stack finished initialising and accepts GAP/GATT calls.
    HostSynced,
    /// The controller reset; every connection is gone.
    HostReset(i32),
    ScanReport(ScanReport),
    /// The scan window expired or the scan was cancelled.
    ScanComplete,
    Connected(Result<ConnId, i32>),
    Disconnected { conn: ConnId, reason: i32 },
    ServiceDiscovered { conn: ConnId, item: DiscoveryItem<HandleRange> },
    CharacteristicDiscovered { conn: ConnId, item: DiscoveryItem<CharacteristicInfo> },
    DescriptorDiscovered { conn: ConnId, item: DiscoveryItem<DescriptorInfo> },
    /// Response to an acknowledged write.
    WriteAck { conn: ConnId, handle: AttHandle, status: Result<(), i32> },
    ReadComplete { conn: ConnId, handle: AttHandle, result: Result<FrameBuf, i32> },
    /// Handle value notification.
    Notify { conn: ConnId, handle: AttHandle, data: Vec<u8, 20> },
    MtuChanged { conn: ConnId, mtu: u16 },
}

/// The operations the gateway needs from a BLE central.
///
/// Implementations must not call back into the gateway from inside these
/// methods; results are delivered as [`LinkEvent`]s afterwards.
pub trait BleDriver {
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), BleError>;

    /// Stop an in-progress scan.  A `ScanComplete` may still follow.
    fn cancel_scan(&mut self);

    fn connect(&mut self, address: &PeerAddress, timeout_ms: u32) -> Result<(), BleError>;

    fn discover_service(&mut self, conn: ConnId, uuid: Uuid) -> Result<(), BleError>;

    fn discover_characteristics(
        &mut self,
        conn: ConnId,
        range: HandleRange,
    ) -> Result<(), BleError>;

    fn discover_descriptors(&mut self, conn: ConnId, range: HandleRange)
        -> Result<(), BleError>;

    /// Write `data` to `handle`.  With `ack` set a `WriteAck` follows.
    fn write(
        &mut self,
        conn: ConnId,
        handle: AttHandle,
        data: &[u8],
        ack: bool,
    ) -> Result<(), BleError>;

    fn read(&mut self, conn: ConnId, handle: AttHandle) -> Result<(), BleError>;

    /// Drop the link.  A `Disconnected` event follows.
    fn terminate(&mut self, conn: ConnId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_att_payload_is_flagged() {
        assert!(read_fills_mtu(246, 247));
        assert!(!read_fills_mtu(245, 247));
        assert!(!read_fills_mtu(0, 247));
        // Default MTU: 22 payload bytes.
        assert!(read_fills_mtu(22, 23));
    }
}
