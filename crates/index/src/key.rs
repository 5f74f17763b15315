use std::cmp::Ordering;

use crate::{IndexError, IndexResult};

/// Interpretation of the fixed-width key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Little-endian `i32`, 4 bytes.
    Integer,
    /// Little-endian `f32`, 4 bytes.
    Float,
    /// Opaque bytes compared lexicographically, any fixed width.
    Bytes,
}

impl KeyType {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            KeyType::Integer => 1,
            KeyType::Float => 2,
            KeyType::Bytes => 3,
        }
    }

    pub(crate) fn from_byte(value: u8) -> IndexResult<Self> {
        match value {
            1 => Ok(KeyType::Integer),
            2 => Ok(KeyType::Float),
            3 => Ok(KeyType::Bytes),
            _ => Err(IndexError::Corrupt(format!("unknown key type {}", value))),
        }
    }

    /// Checks that `len` is a legal attribute length for this key type.
    pub fn validate_len(self, len: usize) -> IndexResult<()> {
        let ok = match self {
            KeyType::Integer | KeyType::Float => len == 4,
            KeyType::Bytes => len >= 1 && len <= i16::MAX as usize,
        };
        if ok {
            Ok(())
        } else {
            Err(IndexError::InvalidKeyLength {
                key_type: self,
                len,
            })
        }
    }
}

/// Compares two fixed-width keys under the given interpretation. Both slices
/// must already have the index's attribute length.
pub fn compare_keys(key_type: KeyType, a: &[u8], b: &[u8]) -> Ordering {
    match key_type {
        KeyType::Integer => decode_i32(a).cmp(&decode_i32(b)),
        KeyType::Float => decode_f32(a).total_cmp(&decode_f32(b)),
        KeyType::Bytes => a.cmp(b),
    }
}

fn decode_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_compare_signed() {
        let minus_one = (-1i32).to_le_bytes();
        let two = 2i32.to_le_bytes();
        assert_eq!(
            compare_keys(KeyType::Integer, &minus_one, &two),
            Ordering::Less
        );
        // Lexicographic byte order would get this wrong.
        assert_eq!(compare_keys(KeyType::Bytes, &minus_one, &two), Ordering::Greater);
    }

    #[test]
    fn float_keys_compare_numerically() {
        let half = 0.5f32.to_le_bytes();
        let ten = 10.0f32.to_le_bytes();
        assert_eq!(compare_keys(KeyType::Float, &half, &ten), Ordering::Less);
        assert_eq!(compare_keys(KeyType::Float, &ten, &ten), Ordering::Equal);
    }

    #[test]
    fn byte_keys_compare_lexicographically() {
        assert_eq!(
            compare_keys(KeyType::Bytes, b"abcd", b"abce"),
            Ordering::Less
        );
    }

    #[test]
    fn attribute_length_validation() {
        assert!(KeyType::Integer.validate_len(4).is_ok());
        assert!(KeyType::Integer.validate_len(8).is_err());
        assert!(KeyType::Float.validate_len(4).is_ok());
        assert!(KeyType::Bytes.validate_len(20).is_ok());
        assert!(KeyType::Bytes.validate_len(0).is_err());
    }
}
