//! Unified error type for meshgate.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// The BLE host returned an error or refused an operation.
    Ble(BleError),

    /// The peer does not expose the Meshtastic service.
    ServiceNotFound,

    /// One of toRadio / fromRadio / fromNum was not found in the service.
    CharacteristicNotFound,

    /// The fromNum client-configuration descriptor (0x2902) was not found.
    CccdNotFound,

    /// Connection to the peer was lost unexpectedly.
    Disconnected,

    // Session
    /// The operation requires a fully synchronised session.
    NotReady,

    // Codec
    /// A frame could not be decoded.
    Decode(DecodeError),

    /// A frame could not be encoded into the outbound buffer.
    Encode,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,

    /// Operation timed out.
    Timeout,

    /// Startup configuration was rejected.
    InvalidConfig(ConfigError),
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Raw status code from the BLE host.
    Raw(i32),
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery failed.
    DiscoveryFailed,
    /// CCCD write (notify enable) failed.
    SubscribeFailed,
    /// Attribute read failed.
    ReadFailed,
    /// Attribute write failed.
    WriteFailed,
}

/// Reasons a protobuf frame is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Input ended in the middle of a field.
    Truncated,
    /// A varint ran past 10 bytes.
    InvalidVarint,
    /// Wire type 3/4 (groups) or 6/7.
    InvalidWireType(u8),
    /// A length-delimited field does not fit its fixed-capacity target.
    FieldTooLong,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// The frame is larger than the maximum packet length.
    Oversized,
    /// No payload variant was present in the frame.
    Empty,
}

/// Startup configuration problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Neither a node name nor a node address was provided.
    MissingPeer,
    /// Node name longer than 32 bytes.
    NameTooLong,
    /// Topic prefix longer than 32 bytes.
    PrefixTooLong,
    /// Address is not `AA:BB:CC:DD:EE:FF`.
    InvalidAddress,
    /// Reconnect interval must be at least one second.
    ZeroInterval,
    /// The handshake id must be nonzero.
    ZeroHandshakeId,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::InvalidConfig(e)
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
