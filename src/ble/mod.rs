//! Bluetooth Low Energy subsystem.
//!
//! The gateway drives a BLE host in **Central** role against a single
//! Meshtastic radio:
//!
//! 1. **Scanner** - matches advertisements by address or display name
//!    ([`adv_parser`]).
//! 2. **GATT client** - resolves the Meshtastic service, its three
//!    characteristics and the fromNum CCCD ([`uuids`]).
//! 3. **Driver boundary** - the host-agnostic [`driver::BleDriver`] trait
//!    and the [`driver::LinkEvent`]s it reports back.
//!
//! The state machine that sequences these steps lives in
//! [`crate::gateway`].

pub mod adv_parser;
pub mod driver;
pub mod uuids;

pub use driver::{
    AdvData, AttHandle, BleDriver, CharacteristicInfo, ConnId, DescriptorInfo, DiscoveryItem,
    FrameBuf, HandleRange, LinkEvent, PeerAddress, ScanParams, ScanReport,
};
pub use uuids::Uuid;
