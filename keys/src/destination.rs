// Copyright (c) 2024 Botho Foundation

//! Destinations and their hashes.
//!
//! A destination is the public half of a tunnel endpoint: an opaque blob of
//! public keys plus a certificate, carried around as I2P base64. Its SHA-256
//! digest is the [`DestinationHash`], which is what the short
//! `<52 chars>.b32.i2p` form encodes.
//!
//! ```text
//! +------------------+----------------------+--------------------------+
//! | encryption key   | signing key (padded) | certificate              |
//! | 256 bytes        | 128 bytes            | type(1) len(2) payload   |
//! +------------------+----------------------+--------------------------+
//! ```
//!
//! Parsing from caller input is strict (length bounds, alphabet, suffix
//! rules). Destinations reported by the bridge itself go through
//! [`Destination::from_bridge`], which only checks the alphabet.

use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::encoding::{decode_base32, encode_base32, I2P_BASE64};
use crate::error::AddressError;
use crate::signature::SignatureType;

/// Generic suffix for names inside the overlay.
pub const I2P_SUFFIX: &str = ".i2p";

/// Suffix of the hash-only short form.
pub const B32_SUFFIX: &str = ".b32.i2p";

/// Minimum accepted length of a destination string.
pub const MIN_DESTINATION_CHARS: usize = 516;

/// Maximum accepted length of a destination string.
pub const MAX_DESTINATION_CHARS: usize = 4096;

/// Minimum accepted length of a raw destination.
pub const MIN_DESTINATION_BYTES: usize = 384;

/// Maximum accepted length of a raw destination.
pub const MAX_DESTINATION_BYTES: usize = 4096;

/// Number of base32 characters kept in the short form.
pub const SHORT_FORM_CHARS: usize = 52;

/// Offset of the certificate in a destination.
const CERTIFICATE_OFFSET: usize = 384;

/// Certificate type for key certificates.
const CERT_TYPE_KEY: u8 = 5;

/// Certificate type for the empty certificate.
const CERT_TYPE_NULL: u8 = 0;

/// Decode a destination string into raw bytes.
///
/// Surrounding whitespace is trimmed and a trailing `.i2p` is stripped. The
/// `.b32.i2p` short form is rejected since only a lookup can invert it.
pub fn decode_destination(s: &str) -> Result<Vec<u8>, AddressError> {
    let s = s.trim();
    if s.ends_with(B32_SUFFIX) {
        return Err(AddressError::ShortFormNotInvertible);
    }
    let s = s.strip_suffix(I2P_SUFFIX).unwrap_or(s).trim();

    if !(MIN_DESTINATION_CHARS..=MAX_DESTINATION_CHARS).contains(&s.len()) {
        return Err(AddressError::Length {
            len: s.len(),
            min: MIN_DESTINATION_CHARS,
            max: MAX_DESTINATION_CHARS,
        });
    }

    I2P_BASE64
        .decode(s)
        .map_err(|e| AddressError::Encoding(e.to_string()))
}

/// Encode raw destination bytes as I2P base64.
pub fn encode_destination(bytes: &[u8]) -> Result<String, AddressError> {
    if !(MIN_DESTINATION_BYTES..=MAX_DESTINATION_BYTES).contains(&bytes.len()) {
        return Err(AddressError::Length {
            len: bytes.len(),
            min: MIN_DESTINATION_BYTES,
            max: MAX_DESTINATION_BYTES,
        });
    }
    Ok(I2P_BASE64.encode(bytes))
}

/// The public key blob identifying a tunnel endpoint.
///
/// Immutable once constructed; both the base64 text and the decoded bytes
/// are kept so neither has to be recomputed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    encoded: String,
    bytes: Vec<u8>,
}

impl Destination {
    /// Build a destination from raw bytes (384..=4096 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let encoded = encode_destination(bytes)?;
        Ok(Self {
            encoded,
            bytes: bytes.to_vec(),
        })
    }

    /// Accept a destination reported by the bridge.
    ///
    /// Only the alphabet is checked; the bridge is the authority on what it
    /// hands back in replies.
    pub fn from_bridge(s: &str) -> Result<Self, AddressError> {
        let encoded = s.trim().to_string();
        let bytes = I2P_BASE64
            .decode(&encoded)
            .map_err(|e| AddressError::Encoding(e.to_string()))?;
        Ok(Self { encoded, bytes })
    }

    /// The I2P base64 form, as sent in `DESTINATION=` fields.
    pub fn to_base64(&self) -> &str {
        &self.encoded
    }

    /// The decoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 over the decoded bytes.
    pub fn hash(&self) -> DestinationHash {
        DestinationHash::of(&self.bytes)
    }

    /// The `.b32.i2p` short form.
    pub fn to_base32(&self) -> String {
        self.hash().short_form()
    }

    /// Certificate type and payload, if the blob is long enough to carry one.
    pub fn certificate(&self) -> Option<(u8, &[u8])> {
        let header = self.bytes.get(CERTIFICATE_OFFSET..CERTIFICATE_OFFSET + 3)?;
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let start = CERTIFICATE_OFFSET + 3;
        let payload = self.bytes.get(start..start + len)?;
        Some((header[0], payload))
    }

    /// Length in bytes of the destination structure itself, as declared by
    /// its certificate.
    pub fn declared_len(&self) -> Option<usize> {
        self.certificate()
            .map(|(_, payload)| CERTIFICATE_OFFSET + 3 + payload.len())
    }

    /// Signature type declared by the certificate.
    pub fn signature_type(&self) -> Option<SignatureType> {
        match self.certificate()? {
            (CERT_TYPE_NULL, _) => Some(SignatureType::DsaSha1),
            (CERT_TYPE_KEY, payload) if payload.len() >= 4 => {
                SignatureType::from_code(u16::from_be_bytes([payload[0], payload[1]]))
            }
            _ => None,
        }
    }

    /// The signing public key, right-aligned in the 128 byte slot.
    ///
    /// Keys longer than the slot spill into the certificate and are not
    /// returned here.
    pub fn signing_public_key(&self) -> Option<&[u8]> {
        let len = self.signature_type()?.public_key_len();
        if len > 128 {
            return None;
        }
        self.bytes.get(CERTIFICATE_OFFSET - len..CERTIFICATE_OFFSET)
    }
}

impl FromStr for Destination {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_destination(s)?;
        // Re-encode rather than keep the input so suffix and padding
        // variants of one destination compare equal.
        let encoded = I2P_BASE64.encode(&bytes);
        Ok(Self { encoded, bytes })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Destination").field(&self.to_base32()).finish()
    }
}

/// SHA-256 digest of a destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationHash([u8; 32]);

impl DestinationHash {
    /// Hash raw destination bytes.
    pub fn of(destination: &[u8]) -> Self {
        Self(Sha256::digest(destination).into())
    }

    /// Wrap an existing 32 byte digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressError::HashLength(bytes.len()))?;
        Ok(Self(digest))
    }

    /// Parse a `<52 chars>.b32.i2p` short form.
    pub fn from_short_form(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        let prefix = s
            .strip_suffix(B32_SUFFIX)
            .filter(|p| p.len() == SHORT_FORM_CHARS)
            .ok_or_else(|| AddressError::InvalidShortForm(s.to_string()))?;

        let decoded =
            decode_base32(prefix).ok_or_else(|| AddressError::InvalidShortForm(s.to_string()))?;
        Self::from_bytes(&decoded)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 52 base32 characters followed by `.b32.i2p`.
    pub fn short_form(&self) -> String {
        let mut encoded = encode_base32(&self.0);
        encoded.truncate(SHORT_FORM_CHARS);
        encoded.push_str(B32_SUFFIX);
        encoded
    }

    /// SHA-256 of the digest, as 44 characters of I2P base64.
    ///
    /// Distinct from the short form; used as a content identifier in logs.
    pub fn content_hash(&self) -> String {
        I2P_BASE64.encode(Sha256::digest(self.0))
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_form())
    }
}

impl fmt::Debug for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DestinationHash({})", self.short_form())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_roundtrip_across_byte_bounds() {
        for len in [384, 385, 386, 387, 391, 1024, 4095, 4096] {
            let bytes = sample_bytes(len);
            let encoded = encode_destination(&bytes).unwrap();
            let destination = Destination::from_bytes(&bytes).unwrap();
            assert_eq!(destination.to_base64(), encoded);
            assert_eq!(destination.as_bytes(), &bytes[..]);
            assert_eq!(I2P_BASE64.decode(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_decode_of_encode_is_identity() {
        // 387..3072 bytes encode to 516..4096 characters, the string range.
        for len in [387, 390, 1000, 3072] {
            let bytes = sample_bytes(len);
            let encoded = encode_destination(&bytes).unwrap();
            assert_eq!(decode_destination(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range_bytes() {
        assert!(matches!(
            encode_destination(&sample_bytes(383)),
            Err(AddressError::Length { len: 383, .. })
        ));
        assert!(encode_destination(&sample_bytes(4097)).is_err());
        assert!(Destination::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_string_length_bounds() {
        let too_short = "A".repeat(515);
        assert!(matches!(
            decode_destination(&too_short),
            Err(AddressError::Length { len: 515, .. })
        ));

        let minimum = "A".repeat(516);
        assert_eq!(decode_destination(&minimum).unwrap().len(), 387);

        let maximum = "A".repeat(4096);
        assert!(decode_destination(&maximum).is_ok());

        let too_long = "A".repeat(4097);
        assert!(matches!(
            decode_destination(&too_long),
            Err(AddressError::Length { len: 4097, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_alphabet() {
        let mut s = "A".repeat(516);
        s.replace_range(10..11, "+");
        assert!(matches!(
            decode_destination(&s),
            Err(AddressError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_form() {
        let s = format!("{}{}", "a".repeat(52), B32_SUFFIX);
        assert_eq!(
            decode_destination(&s),
            Err(AddressError::ShortFormNotInvertible)
        );
    }

    #[test]
    fn test_hash_ignores_padding_and_suffix() {
        let bytes = sample_bytes(391);
        let plain: Destination = encode_destination(&bytes).unwrap().parse().unwrap();
        let padded: Destination = format!("  {}\n", plain.to_base64()).parse().unwrap();
        let suffixed: Destination = format!("{}.i2p", plain.to_base64()).parse().unwrap();

        assert_eq!(plain.hash(), padded.hash());
        assert_eq!(plain.hash(), suffixed.hash());
        assert_eq!(plain, suffixed);
        assert_eq!(plain.hash(), plain.hash());
        assert_eq!(plain.hash(), DestinationHash::of(&bytes));
    }

    #[test]
    fn test_short_form_shape() {
        for fill in [0x00u8, 0xff, 0x5a] {
            let hash = DestinationHash::from_bytes(&[fill; 32]).unwrap();
            let short = hash.short_form();
            assert_eq!(short.len(), SHORT_FORM_CHARS + B32_SUFFIX.len());
            assert!(short.ends_with(B32_SUFFIX));
            assert!(short[..SHORT_FORM_CHARS]
                .chars()
                .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
        }
        let zero = DestinationHash::from_bytes(&[0u8; 32]).unwrap();
        assert_eq!(zero.short_form(), format!("{}.b32.i2p", "a".repeat(52)));
    }

    #[test]
    fn test_short_form_parses_back_to_hash() {
        let hash = DestinationHash::of(b"some destination");
        let parsed = DestinationHash::from_short_form(&hash.short_form()).unwrap();
        assert_eq!(parsed, hash);

        assert!(DestinationHash::from_short_form("abc.b32.i2p").is_err());
        assert!(DestinationHash::from_short_form(&"a".repeat(60)).is_err());
    }

    #[test]
    fn test_hash_from_bytes_requires_32() {
        assert_eq!(
            DestinationHash::from_bytes(&[1u8; 31]),
            Err(AddressError::HashLength(31))
        );
    }

    #[test]
    fn test_content_hash_is_44_chars() {
        let hash = DestinationHash::of(&sample_bytes(400));
        let content = hash.content_hash();
        assert_eq!(content.len(), 44);
        assert_eq!(content, hash.content_hash());
        assert_ne!(content, hash.short_form());
        assert_eq!(content, I2P_BASE64.encode(Sha256::digest(hash.as_bytes())));
    }

    #[test]
    fn test_from_bridge_skips_length_check() {
        let short = "B".repeat(64);
        let destination = Destination::from_bridge(&format!("{}\n", short)).unwrap();
        assert_eq!(destination.to_base64(), short);
        assert_eq!(destination.as_bytes().len(), 48);
        assert!(destination.certificate().is_none());
        assert!(Destination::from_bridge("not base64!").is_err());
    }

    #[test]
    fn test_key_certificate_fields() {
        let mut bytes = vec![0u8; 384];
        bytes[352..384].copy_from_slice(&[9u8; 32]);
        bytes.extend_from_slice(&[CERT_TYPE_KEY, 0, 4, 0, 7, 0, 0]);
        let destination = Destination::from_bytes(&bytes).unwrap();

        assert_eq!(destination.certificate(), Some((CERT_TYPE_KEY, &[0u8, 7, 0, 0][..])));
        assert_eq!(destination.declared_len(), Some(391));
        assert_eq!(
            destination.signature_type(),
            Some(SignatureType::EdDsaSha512Ed25519)
        );
        assert_eq!(destination.signing_public_key(), Some(&[9u8; 32][..]));
    }

    #[test]
    fn test_null_certificate_is_dsa() {
        let mut bytes = vec![1u8; 384];
        bytes.extend_from_slice(&[CERT_TYPE_NULL, 0, 0]);
        let destination = Destination::from_bytes(&bytes).unwrap();
        assert_eq!(destination.signature_type(), Some(SignatureType::DsaSha1));
        assert_eq!(destination.declared_len(), Some(387));
    }

    #[test]
    fn test_display_is_short_form() {
        let destination = Destination::from_bytes(&sample_bytes(391)).unwrap();
        assert_eq!(destination.to_string(), destination.to_base32());
        assert!(format!("{:?}", destination).contains(".b32.i2p"));
    }
}
