//! Advertisement payload helpers used while scanning for the radio.

use heapless::Vec;

const AD_TYPE_SHORTENED_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_NAME: u8 = 0x09;

/// Walks `(ad_type, value)` pairs.  Stops at a zero length byte or at a
/// structure that claims more bytes than remain.
struct AdStructures<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, tail) = self.rest.split_first()?;
        let len = usize::from(len);
        if len == 0 || len > tail.len() {
            self.rest = &[];
            return None;
        }
        let (structure, rest) = tail.split_at(len);
        self.rest = rest;
        Some((structure[0], &structure[1..]))
    }
}

/// Raw local name as advertised, at most 32 bytes.
pub type AdvName = Vec<u8, 32>;

/// Local name (complete or shortened) carried in an advertisement.
///
/// Returns `None` when the advertisement carries no (non-empty) name.
/// The bytes are kept as sent, with no UTF-8 validation; names longer
/// than the buffer are cut, possibly inside a multi-byte character.
pub fn extract_device_name(data: &[u8]) -> Option<AdvName> {
    let (_, value) = AdStructures { rest: data }
        .find(|&(ad_type, _)| ad_type == AD_TYPE_SHORTENED_NAME || ad_type == AD_TYPE_COMPLETE_NAME)?;
    let value = &value[..value.len().min(32)];
    if value.is_empty() {
        return None;
    }
    Vec::from_slice(value).ok()
}

/// Bidirectional, case-sensitive substring match on raw bytes.
///
/// Firmware pads or truncates the advertised name (`Meshtastic_ab12` vs
/// `Node-42`), so either side may contain the other.
pub fn name_matches(configured: &[u8], advertised: &[u8]) -> bool {
    if configured.is_empty() || advertised.is_empty() {
        return false;
    }
    contains_bytes(advertised, configured) || contains_bytes(configured, advertised)
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Exact link-layer address match (both in over-the-air byte order).
pub fn address_matches(configured: &[u8; 6], advertised: &[u8; 6]) -> bool {
    configured == advertised
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_name_after_flags() {
        let ad_data = [
            0x02, 0x01, 0x06, // Flags
            0x08, 0x09, b'N', b'o', b'd', b'e', b'-', b'4', b'2',
        ];
        assert_eq!(extract_device_name(&ad_data).unwrap().as_slice(), b"Node-42");
    }

    #[test]
    fn shortened_name() {
        let ad_data = [0x05, 0x08, b'M', b'e', b's', b'h'];
        assert_eq!(extract_device_name(&ad_data).unwrap().as_slice(), b"Mesh");
    }

    #[test]
    fn advertisement_without_name() {
        let ad_data = [0x02, 0x01, 0x06];
        assert!(extract_device_name(&ad_data).is_none());
        assert!(extract_device_name(&[]).is_none());
    }

    #[test]
    fn malformed_lengths_stop_parsing() {
        assert!(extract_device_name(&[0x00, 0x09, b'X']).is_none());
        // Declared length runs past the end of the buffer.
        assert!(extract_device_name(&[0x09, 0x09, b'N', b'o']).is_none());
    }

    #[test]
    fn long_name_is_cut_to_buffer() {
        let mut ad_data = [b'X'; 38];
        ad_data[0] = 37;
        ad_data[1] = AD_TYPE_COMPLETE_NAME;
        let name = extract_device_name(&ad_data).unwrap();
        assert_eq!(name.len(), 32);
    }

    #[test]
    fn empty_name_is_none() {
        assert!(extract_device_name(&[0x01, AD_TYPE_COMPLETE_NAME]).is_none());
    }

    #[test]
    fn name_match_is_bidirectional() {
        assert!(name_matches(b"Node-42", b"Meshtastic_Node-42_ab"));
        assert!(name_matches(b"Meshtastic_Node-42_ab", b"Node-42"));
        assert!(name_matches(b"Node-42", b"Node-42"));
    }

    #[test]
    fn name_match_is_case_sensitive() {
        assert!(!name_matches(b"node-42", b"Meshtastic_Node-42_ab"));
        assert!(!name_matches(b"Node-43", b"Meshtastic_Node-42_ab"));
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!name_matches(b"", b"Node-42"));
        assert!(!name_matches(b"Node-42", b""));
    }

    #[test]
    fn address_match_is_exact() {
        let a = [1, 2, 3, 4, 5, 6];
        assert!(address_matches(&a, &[1, 2, 3, 4, 5, 6]));
        assert!(!address_matches(&a, &[6, 5, 4, 3, 2, 1]));
    }

    #[test]
    fn utf8_name_matches_bytewise() {
        let configured = "N\u{f6}de".as_bytes();
        assert!(name_matches(configured, "Meshtastic_N\u{f6}de_ab".as_bytes()));
        assert!(!name_matches(configured, b"Meshtastic_Node_ab"));

        let mut ad_data = [0u8; 2];
        ad_data[0] = 1 + "\u{1f4e1}ab".len() as u8;
        ad_data[1] = AD_TYPE_COMPLETE_NAME;
        let mut adv = std::vec::Vec::from(ad_data);
        adv.extend_from_slice("\u{1f4e1}ab".as_bytes());
        let name = extract_device_name(&adv).unwrap();
        assert_eq!(name.as_slice(), "\u{1f4e1}ab".as_bytes());
        assert!(name_matches("\u{1f4e1}".as_bytes(), &name));
    }

    #[test]
    fn name_cut_inside_multibyte_char_still_matches_prefix() {
        // 31 ASCII bytes, then a 2-byte char split by the 32-byte buffer.
        let mut adv = std::vec::Vec::from([34u8, AD_TYPE_COMPLETE_NAME]);
        adv.extend_from_slice(&[b'a'; 31]);
        adv.extend_from_slice("\u{f6}".as_bytes());
        let name = extract_device_name(&adv).unwrap();
        assert_eq!(name.len(), 32);
        assert!(name_matches(&[b'a'; 31], &name));
    }
}
