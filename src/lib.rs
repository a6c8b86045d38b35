//! meshgate - BLE-central gateway for Meshtastic radios.
//!
//! The gateway binds to one Meshtastic node over BLE, performs the
//! WantConfig handshake, drains the fromRadio stream and republishes what it
//! hears as telemetry topics.
//!
//! Everything except [`platform`] is plain `no_std` logic that builds and
//! tests on the host:
//!
//! - [`gateway`] - link state machine and session protocol
//! - [`dedup`] - recent packet-id ring
//! - [`codec`] - frame codec boundary and the Meshtastic protobuf subset
//! - [`nodes`] - table of mesh nodes heard on the current link
//! - [`sink`] - publish-only sink and topic layout
//! - [`serial`] - line framing for the serial console
//! - [`ble`] - driver boundary, well-known UUIDs, advertisement parsing
//!
//! Usage: `cargo test` on the host; `cargo build --release --features
//! embedded` for the nRF52840 firmware.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod ble;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod nodes;
pub mod serial;
pub mod sink;

#[cfg(feature = "embedded")]
pub mod platform;

pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayState};
