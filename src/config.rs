//! Application-wide constants and startup configuration.
//!
//! Protocol constants, timing parameters and buffer sizes live here so they
//! can be tuned in one place.  The handful of values that differ per
//! deployment (which radio to bind to, topic namespace, retry interval) are
//! collected in [`GatewayConfig`], built once at startup and never mutated.

use crate::error::ConfigError;
use heapless::String;

// BLE

/// Application-level connect timeout (ms).
pub const CONNECT_TIMEOUT_MS: u32 = 5_000;

/// Scan interval (ms) - passive scan.
pub const BLE_SCAN_INTERVAL_MS: u16 = 200;

/// Scan window (ms) within each interval.
pub const BLE_SCAN_WINDOW_MS: u16 = 150;

/// How long one scan pass runs before giving up (seconds).
pub const BLE_SCAN_DURATION_SECS: u64 = 10;

/// ATT MTU requested from the SoftDevice.  A single read returns at most
/// `ATT_MTU - 1` bytes.
pub const ATT_MTU: u16 = 247;

// Meshtastic protocol

/// Largest fromRadio / toRadio frame accepted or produced.
pub const MAX_FRAME_LEN: usize = 512;

/// Largest `Data.payload` the firmware accepts.
pub const MAX_DATA_PAYLOAD_LEN: usize = 233;

/// Handshake id written in `ToRadio.want_config_id`.  Any nonzero value works.
pub const DEFAULT_HANDSHAKE_ID: u32 = 0xDEAD_BEEF;

/// Destination address meaning "every node on the mesh".
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Hop limit stamped on packets the gateway originates.
pub const DEFAULT_HOP_LIMIT: u32 = 3;

// Session

/// Number of recent packet ids remembered for duplicate suppression.
pub const DEDUP_CAPACITY: usize = 64;

/// Number of mesh nodes tracked in the node table.
pub const NODE_TABLE_CAPACITY: usize = 32;

/// Deferred work items that can be pending at once.
pub const INTENT_QUEUE_DEPTH: usize = 4;

/// Default delay between connection attempts while idle (seconds).
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u32 = 30;

/// Default topic namespace.
pub const DEFAULT_TOPIC_PREFIX: &str = "meshtastic";

/// Period of the cooperative gateway tick (ms).
pub const TICK_PERIOD_MS: u64 = 50;

// USB (telemetry sink)

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "meshgate";
pub const USB_PRODUCT: &str = "Meshtastic BLE Gateway";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// Lines buffered between the gateway and the USB writer.
pub const SINK_QUEUE_DEPTH: usize = 16;

/// Longest line (topic + payload) the USB sink forwards.
pub const SINK_LINE_LEN: usize = 320;

// Display

/// Refresh period of the status screen (ms).
pub const DISPLAY_REFRESH_MS: u64 = 500;

// Startup configuration

/// Advertised name of the radio to bind to, fixed at build time through
/// `MESHGATE_PEER_NAME`.
pub const PEER_NAME: &str = match option_env!("MESHGATE_PEER_NAME") {
    Some(name) => name,
    None => "Meshtastic",
};

/// Optional `AA:BB:CC:DD:EE:FF` address (`MESHGATE_PEER_ADDRESS`).  When set
/// it replaces name matching.
pub const PEER_ADDRESS: Option<&str> = option_env!("MESHGATE_PEER_ADDRESS");

/// How the gateway recognises its radio in scan results.
///
/// Exactly one selector is active.  Address matching is exact; name
/// matching tolerates truncated or padded advertised names.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerSelector {
    /// Advertised display name.
    Name(String<32>),
    /// Link-layer address in over-the-air (little-endian) byte order.
    Address([u8; 6]),
}

/// Per-deployment settings, static for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GatewayConfig {
    pub peer: PeerSelector,
    pub topic_prefix: String<32>,
    pub reconnect_interval_secs: u32,
    pub handshake_id: u32,
}

impl GatewayConfig {
    /// Bind to the first radio whose advertised name matches `name`.
    pub fn by_name(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::MissingPeer);
        }
        let mut n = String::new();
        n.push_str(name).map_err(|_| ConfigError::NameTooLong)?;
        Ok(Self::with_peer(PeerSelector::Name(n)))
    }

    /// Bind to the radio with the given `AA:BB:CC:DD:EE:FF` address.
    pub fn by_address(mac: &str) -> Result<Self, ConfigError> {
        Ok(Self::with_peer(PeerSelector::Address(parse_mac(mac)?)))
    }

    /// Configuration baked in at build time: [`PEER_ADDRESS`] if set,
    /// otherwise [`PEER_NAME`].
    pub fn from_build_env() -> Result<Self, ConfigError> {
        match PEER_ADDRESS {
            Some(mac) => Self::by_address(mac),
            None => Self::by_name(PEER_NAME),
        }
    }

    fn with_peer(peer: PeerSelector) -> Self {
        let mut topic_prefix = String::new();
        let _ = topic_prefix.push_str(DEFAULT_TOPIC_PREFIX);
        Self {
            peer,
            topic_prefix,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            handshake_id: DEFAULT_HANDSHAKE_ID,
        }
    }

    pub fn with_topic_prefix(mut self, prefix: &str) -> Result<Self, ConfigError> {
        let mut p = String::new();
        p.push_str(prefix.trim_end_matches('/'))
            .map_err(|_| ConfigError::PrefixTooLong)?;
        self.topic_prefix = p;
        Ok(self)
    }

    pub fn with_reconnect_interval(mut self, secs: u32) -> Result<Self, ConfigError> {
        if secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        self.reconnect_interval_secs = secs;
        Ok(self)
    }

    pub fn with_handshake_id(mut self, id: u32) -> Result<Self, ConfigError> {
        if id == 0 {
            return Err(ConfigError::ZeroHandshakeId);
        }
        self.handshake_id = id;
        Ok(self)
    }

    /// Reconnect interval in milliseconds.
    pub fn reconnect_interval_ms(&self) -> u64 {
        u64::from(self.reconnect_interval_secs) * 1000
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` into the little-endian byte order used in
/// scan reports (`FF` first).
pub fn parse_mac(mac: &str) -> Result<[u8; 6], ConfigError> {
    let mut out = [0u8; 6];
    let mut parts = mac.split(':');
    for i in (0..6).rev() {
        let part = parts.next().ok_or(ConfigError::InvalidAddress)?;
        if part.len() != 2 {
            return Err(ConfigError::InvalidAddress);
        }
        out[i] = u8::from_str_radix(part, 16).map_err(|_| ConfigError::InvalidAddress)?;
    }
    if parts.next().is_some() {
        return Err(ConfigError::InvalidAddress);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mac_reverses_byte_order() {
        let mac = parse_mac("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(mac, [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn parse_mac_rejects_malformed_input() {
        assert_eq!(parse_mac(""), Err(ConfigError::InvalidAddress));
        assert_eq!(parse_mac("AA:BB:CC:DD:EE"), Err(ConfigError::InvalidAddress));
        assert_eq!(parse_mac("AA:BB:CC:DD:EE:FF:00"), Err(ConfigError::InvalidAddress));
        assert_eq!(parse_mac("AA:BB:CC:DD:EE:GG"), Err(ConfigError::InvalidAddress));
        assert_eq!(parse_mac("A:BB:CC:DD:EE:FF0"), Err(ConfigError::InvalidAddress));
    }

    #[test]
    fn by_name_uses_defaults() {
        let cfg = GatewayConfig::by_name("Node-42").unwrap();
        assert!(matches!(&cfg.peer, PeerSelector::Name(n) if n.as_str() == "Node-42"));
        assert_eq!(cfg.topic_prefix.as_str(), "meshtastic");
        assert_eq!(cfg.reconnect_interval_secs, 30);
        assert_eq!(cfg.reconnect_interval_ms(), 30_000);
        assert_eq!(cfg.handshake_id, 0xDEAD_BEEF);
    }

    #[test]
    fn by_name_rejects_empty_and_long_names() {
        assert_eq!(GatewayConfig::by_name(""), Err(ConfigError::MissingPeer));
        let long = "X".repeat(33);
        assert_eq!(GatewayConfig::by_name(&long), Err(ConfigError::NameTooLong));
    }

    #[test]
    fn build_env_config_is_valid() {
        let cfg = GatewayConfig::from_build_env().unwrap();
        match (&cfg.peer, PEER_ADDRESS) {
            (PeerSelector::Address(_), Some(_)) => {}
            (PeerSelector::Name(n), None) => assert_eq!(n.as_str(), PEER_NAME),
            (peer, _) => panic!("unexpected selector {:?}", peer),
        }
    }

    #[test]
    fn builders_validate() {
        let cfg = GatewayConfig::by_address("01:02:03:04:05:06").unwrap();
        assert_eq!(cfg.peer, PeerSelector::Address([6, 5, 4, 3, 2, 1]));

        let cfg = cfg.with_topic_prefix("home/mesh/").unwrap();
        assert_eq!(cfg.topic_prefix.as_str(), "home/mesh");

        assert_eq!(
            cfg.clone().with_reconnect_interval(0),
            Err(ConfigError::ZeroInterval)
        );
        assert_eq!(
            cfg.clone().with_handshake_id(0),
            Err(ConfigError::ZeroHandshakeId)
        );
        assert_eq!(cfg.with_handshake_id(7).unwrap().handshake_id, 7);
    }
}
