//! CampusCoin core types
//!
//! Shared primitives used across the ledger, chain gateway and
//! settlement crates: on-chain account addresses, transaction
//! signatures, and token-unit scaling.

mod types;
mod units;

pub use types::*;
pub use units::*;

/// Encode bytes as lowercase hex
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a lowercase/uppercase hex string into bytes
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Decode a hex string into a 32-byte account address
pub fn address_from_hex(s: &str) -> Option<AccountAddress> {
    let bytes = hex_decode(s)?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let addr = [0xABu8; 32];
        let encoded = hex_encode(&addr);
        assert_eq!(encoded.len(), 64);
        assert_eq!(address_from_hex(&encoded), Some(addr));
    }

    #[test]
    fn test_hex_decode_rejects_odd_length() {
        assert_eq!(hex_decode("abc"), None);
    }

    #[test]
    fn test_hex_decode_rejects_non_hex() {
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn test_address_from_hex_rejects_short() {
        assert_eq!(address_from_hex("ab"), None);
    }
}
