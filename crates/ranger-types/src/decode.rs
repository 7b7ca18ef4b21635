//! Payload decoders for the Ranger notification characteristics.
//!
//! Both decoders validate strictly by length and return `None` for anything
//! malformed. A wrong-length payload is not an error condition: upstream
//! code drops it silently without touching connection state.

/// Decode a range measurement payload.
///
/// Valid payloads are exactly 2 bytes, little-endian, in millimeters.
///
/// # Examples
///
/// ```
/// use ranger_types::decode_range;
///
/// assert_eq!(decode_range(&[0x10, 0x00]), Some(16));
/// assert_eq!(decode_range(&[0x34, 0x12]), Some(0x1234));
/// assert_eq!(decode_range(&[0x10]), None);
/// assert_eq!(decode_range(&[]), None);
/// ```
#[must_use]
pub fn decode_range(payload: &[u8]) -> Option<u16> {
    match payload {
        [low, high] => Some(u16::from_le_bytes([*low, *high])),
        _ => None,
    }
}

/// Decode a battery level payload.
///
/// Valid payloads are exactly 1 byte. The device is expected to report a
/// state-of-charge in 0..=100, but the decoder does not enforce that.
///
/// # Examples
///
/// ```
/// use ranger_types::decode_battery;
///
/// assert_eq!(decode_battery(&[0x5A]), Some(90));
/// assert_eq!(decode_battery(&[0x5A, 0x00]), None);
/// ```
#[must_use]
pub fn decode_battery(payload: &[u8]) -> Option<u8> {
    match payload {
        [level] => Some(*level),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_range_little_endian() {
        assert_eq!(decode_range(&[0x00, 0x00]), Some(0));
        assert_eq!(decode_range(&[0x10, 0x00]), Some(16));
        assert_eq!(decode_range(&[0x00, 0x01]), Some(256));
        assert_eq!(decode_range(&[0xFF, 0xFF]), Some(65535));
    }

    #[test]
    fn test_decode_range_rejects_other_lengths() {
        assert_eq!(decode_range(&[]), None);
        assert_eq!(decode_range(&[0x10]), None);
        assert_eq!(decode_range(&[0x10, 0x00, 0x00]), None);
    }

    #[test]
    fn test_decode_battery() {
        assert_eq!(decode_battery(&[0]), Some(0));
        assert_eq!(decode_battery(&[100]), Some(100));
        // Out-of-domain values pass through; the decoder only checks length
        assert_eq!(decode_battery(&[255]), Some(255));
    }

    #[test]
    fn test_decode_battery_rejects_other_lengths() {
        assert_eq!(decode_battery(&[]), None);
        assert_eq!(decode_battery(&[90, 0]), None);
    }

    proptest! {
        #[test]
        fn prop_range_roundtrip(value: u16) {
            let payload = value.to_le_bytes();
            prop_assert_eq!(decode_range(&payload), Some(value));
        }

        #[test]
        fn prop_range_wrong_length_is_none(payload in proptest::collection::vec(any::<u8>(), 0..8)) {
            prop_assume!(payload.len() != 2);
            prop_assert_eq!(decode_range(&payload), None);
        }

        #[test]
        fn prop_battery_roundtrip(value: u8) {
            prop_assert_eq!(decode_battery(&[value]), Some(value));
        }
    }
}
