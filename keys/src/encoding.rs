// Copyright (c) 2024 Botho Foundation

//! The two I2P text alphabets.
//!
//! Destinations travel in a base64 variant that swaps `+/` for `-~`, and
//! destination hashes are shown in lowercase base32 (`a-z2-7`) without
//! padding.

use base64::{
    alphabet::Alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};

/// Symbols of the I2P base64 alphabet, in value order.
pub const BASE64_SYMBOLS: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~";

/// Symbols of the I2P base32 alphabet, in value order.
pub const BASE32_SYMBOLS: &str = "abcdefghijklmnopqrstuvwxyz234567";

const I2P_ALPHABET: Alphabet = match Alphabet::new(BASE64_SYMBOLS) {
    Ok(alphabet) => alphabet,
    Err(_) => panic!("invalid I2P base64 alphabet"),
};

/// Base64 engine for destinations and key blobs.
///
/// Trailing bits are tolerated on decode, matching what routers emit.
pub const I2P_BASE64: GeneralPurpose = GeneralPurpose::new(
    &I2P_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical)
        .with_decode_allow_trailing_bits(true),
);

/// Encode bytes as unpadded lowercase base32.
pub fn encode_base32(bytes: &[u8]) -> String {
    let alphabet = BASE32_SYMBOLS.as_bytes();
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0;

    for byte in bytes {
        buffer = (buffer << 8) | *byte as u16;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(alphabet[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(alphabet[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decode unpadded lowercase base32.
///
/// Returns `None` on a symbol outside the alphabet, or when the leftover
/// bits of the final symbol are not zero.
pub fn decode_base32(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u16 = 0;
    let mut bits = 0;

    for c in s.bytes() {
        let value = BASE32_SYMBOLS.bytes().position(|x| x == c)? as u16;
        buffer = ((buffer << 5) | value) & 0x0fff;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    if bits > 0 && buffer & ((1 << bits) - 1) != 0 {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn test_base64_uses_i2p_symbols() {
        // 0xfb 0xff maps onto the two substituted symbols
        let encoded = I2P_BASE64.encode([0xfb, 0xff, 0xbf]);
        assert_eq!(encoded, "-~-~");
        assert_eq!(I2P_BASE64.decode("-~-~").unwrap(), vec![0xfb, 0xff, 0xbf]);
    }

    #[test]
    fn test_base64_rejects_standard_symbols() {
        assert!(I2P_BASE64.decode("+/+/").is_err());
    }

    #[test]
    fn test_base64_pads() {
        assert_eq!(I2P_BASE64.encode([0u8]), "AA==");
    }

    #[test]
    fn test_base32_lowercase() {
        assert_eq!(encode_base32(&[0xff; 5]), "77777777");
        assert_eq!(encode_base32(&[0u8; 5]), "aaaaaaaa");
        // RFC 4648 vector, lowercased and unpadded
        assert_eq!(encode_base32(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn test_base32_decode() {
        assert_eq!(decode_base32("mzxw6ytboi").unwrap(), b"foobar");
        assert_eq!(decode_base32(&encode_base32(&[0xa5; 32])).unwrap(), vec![0xa5; 32]);
        assert!(decode_base32("MZXW6").is_none());
        assert!(decode_base32("a1").is_none());
        // final symbol carries a set padding bit
        assert!(decode_base32("mzxw6ytboj").is_none());
    }
}
