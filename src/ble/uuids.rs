//! Meshtastic GATT service / characteristic identifiers.
//!
//! All three characteristics live under a single service:
//!
//! - **toRadio** (write) - the gateway writes `ToRadio` frames here.
//! - **fromRadio** (read) - one `FromRadio` frame per read; an empty read
//!   means the queue is drained.
//! - **fromNum** (read, notify) - a counter bumped whenever a new fromRadio
//!   frame is queued.  Subscribing to its CCCD is how the gateway learns
//!   there is something to drain.
//!
//! Identifiers are kept as integers in their canonical (big-endian string)
//! order; [`Uuid::to_le_bytes`] yields the over-the-air layout.

/// A GATT attribute type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
    Uuid128(u128),
}

impl Uuid {
    /// Little-endian bytes as carried in ATT PDUs (2 or 16 significant bytes).
    pub fn to_le_bytes(&self) -> ([u8; 16], usize) {
        let mut out = [0u8; 16];
        match *self {
            Uuid::Uuid16(v) => {
                out[..2].copy_from_slice(&v.to_le_bytes());
                (out, 2)
            }
            Uuid::Uuid128(v) => {
                out.copy_from_slice(&v.to_le_bytes());
                (out, 16)
            }
        }
    }

    /// Parse a little-endian 2- or 16-byte attribute type.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Uuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                Some(Uuid::Uuid128(u128::from_le_bytes(raw)))
            }
            _ => None,
        }
    }
}

/// `6ba1b218-15a8-461f-9fa8-5dcae273eafd`
pub const MESH_SERVICE: Uuid = Uuid::Uuid128(0x6ba1b218_15a8_461f_9fa8_5dcae273eafd);

/// `f75c76d2-129e-4dad-a1dd-7866124401e7`
pub const TO_RADIO: Uuid = Uuid::Uuid128(0xf75c76d2_129e_4dad_a1dd_7866124401e7);

/// `2c55e69e-4993-11ed-b878-0242ac120002`
///
/// Firmware 1.x used `8ba2bcc2-ee02-4a55-a531-c525c5e454d5`; it is not
/// supported.
pub const FROM_RADIO: Uuid = Uuid::Uuid128(0x2c55e69e_4993_11ed_b878_0242ac120002);

/// `ed9da18c-a800-4f66-a670-aa7547e34453`
pub const FROM_NUM: Uuid = Uuid::Uuid128(0xed9da18c_a800_4f66_a670_aa7547e34453);

/// `5a3d6e49-06e6-4423-9944-e9de8cdf9547` - optional debug log stream, not
/// subscribed.
pub const LOG_RECORD: Uuid = Uuid::Uuid128(0x5a3d6e49_06e6_4423_9944_e9de8cdf9547);

/// Client Characteristic Configuration Descriptor.
pub const CCCD: Uuid = Uuid::Uuid16(0x2902);

/// CCCD value enabling notifications (little-endian `0x0001`).
pub const CCCD_ENABLE_NOTIFY: [u8; 2] = 0x0001u16.to_le_bytes();

/// CCCD value disabling notifications and indications.
pub const CCCD_DISABLE: [u8; 2] = 0x0000u16.to_le_bytes();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_uuid_wire_layout() {
        let (bytes, len) = MESH_SERVICE.to_le_bytes();
        assert_eq!(len, 16);
        assert_eq!(
            bytes,
            [
                0xfd, 0xea, 0x73, 0xe2, 0xca, 0x5d, 0xa8, 0x9f, 0x1f, 0x46, 0xa8, 0x15, 0x18,
                0xb2, 0xa1, 0x6b
            ]
        );
    }

    #[test]
    fn from_radio_uuid_wire_layout() {
        let (bytes, _) = FROM_RADIO.to_le_bytes();
        assert_eq!(
            bytes,
            [
                0x02, 0x00, 0x12, 0xac, 0x42, 0x02, 0x78, 0xb8, 0xed, 0x11, 0x93, 0x49, 0x9e,
                0xe6, 0x55, 0x2c
            ]
        );
    }

    #[test]
    fn cccd_roundtrip_and_values() {
        let (bytes, len) = CCCD.to_le_bytes();
        assert_eq!(&bytes[..len], &[0x02, 0x29]);
        assert_eq!(Uuid::from_le_bytes(&bytes[..len]), Some(CCCD));
        assert_eq!(CCCD_ENABLE_NOTIFY, [0x01, 0x00]);
        assert_eq!(CCCD_DISABLE, [0x00, 0x00]);
    }

    #[test]
    fn from_le_bytes_rejects_odd_lengths() {
        assert_eq!(Uuid::from_le_bytes(&[1, 2, 3]), None);
        assert_eq!(Uuid::from_le_bytes(&[]), None);
    }
}
