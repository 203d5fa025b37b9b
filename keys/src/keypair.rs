// Copyright (c) 2024 Botho Foundation

//! Destination key pairs.
//!
//! The bridge hands out key pairs as one base64 blob laid out as
//! `destination || encryption private key || signing private key`. The blob
//! is parsed once, on construction, into explicit fields; the original text
//! is kept verbatim because it is what `SESSION CREATE` expects back.

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;
use zeroize::Zeroizing;

use crate::destination::{Destination, MIN_DESTINATION_BYTES};
use crate::encoding::I2P_BASE64;
use crate::error::{AddressError, KeyError, KeyResult};
use crate::signature::SignatureType;

/// Size of the certificate header (type + length) following the key area.
const CERTIFICATE_HEADER_LEN: usize = 3;

/// A destination together with its private keys.
#[derive(Clone)]
pub struct KeyPair {
    destination: Destination,
    combined: String,
    signature_type: SignatureType,
    encryption_key: Zeroizing<Vec<u8>>,
    signing_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Bind a destination to its combined blob.
    ///
    /// The blob must begin with the destination's bytes, and the destination
    /// must declare a known signature type so the trailing signing key can be
    /// located.
    pub fn from_parts(destination: Destination, combined: &str) -> KeyResult<Self> {
        let combined = combined.trim();
        let blob = Zeroizing::new(decode_blob(combined)?);
        if !blob.starts_with(destination.as_bytes()) {
            return Err(KeyError::PrefixMismatch);
        }
        Self::split(destination, combined, &blob)
    }

    /// Parse a combined blob on its own, taking the destination length from
    /// the certificate it embeds.
    pub fn from_combined(combined: &str) -> KeyResult<Self> {
        let combined = combined.trim();
        let blob = Zeroizing::new(decode_blob(combined)?);

        let header_end = MIN_DESTINATION_BYTES + CERTIFICATE_HEADER_LEN;
        if blob.len() < header_end {
            return Err(KeyError::Truncated {
                needed: header_end,
                got: blob.len(),
            });
        }
        let cert_len = u16::from_be_bytes([blob[385], blob[386]]) as usize;
        let destination_len = header_end + cert_len;
        if blob.len() < destination_len {
            return Err(KeyError::Truncated {
                needed: destination_len,
                got: blob.len(),
            });
        }

        let destination = Destination::from_bytes(&blob[..destination_len])?;
        Self::split(destination, combined, &blob)
    }

    fn split(destination: Destination, combined: &str, blob: &[u8]) -> KeyResult<Self> {
        let signature_type = destination
            .signature_type()
            .ok_or(KeyError::UnknownSignatureType)?;

        let private = &blob[destination.as_bytes().len()..];
        let signing_len = signature_type.private_key_len();
        if private.len() <= signing_len {
            return Err(KeyError::Truncated {
                needed: signing_len,
                got: private.len(),
            });
        }
        let (encryption, signing) = private.split_at(private.len() - signing_len);

        Ok(Self {
            destination,
            combined: combined.to_string(),
            signature_type,
            encryption_key: Zeroizing::new(encryption.to_vec()),
            signing_key: Zeroizing::new(signing.to_vec()),
        })
    }

    /// The public half.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The combined blob, verbatim, for `DESTINATION=` in session creation.
    pub fn combined(&self) -> &str {
        &self.combined
    }

    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }

    /// Private encryption key bytes.
    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// Private signing key bytes.
    pub fn signing_key(&self) -> &[u8] {
        &self.signing_key
    }

    /// An Ed25519 signer for this destination.
    ///
    /// Fails for any other signature type, and when the private key does not
    /// match the public key embedded in the destination.
    pub fn signer(&self) -> KeyResult<SigningKey> {
        if !self.signature_type.can_sign() {
            return Err(KeyError::UnsupportedSignatureType(self.signature_type));
        }
        let seed: [u8; 32] = self
            .signing_key
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::UnsupportedSignatureType(self.signature_type))?;
        let signer = SigningKey::from_bytes(&seed);

        let public = self
            .destination
            .signing_public_key()
            .ok_or(KeyError::UnknownSignatureType)?;
        if signer.verifying_key().as_bytes() != public {
            return Err(KeyError::SigningKeyMismatch);
        }
        Ok(signer)
    }

    /// Sign a message with the destination's signing key.
    pub fn sign(&self, message: &[u8]) -> KeyResult<[u8; 64]> {
        Ok(self.signer()?.sign(message).to_bytes())
    }

    /// Signature over a hostname, I2P base64 encoded, as used when
    /// registering a name with an address book.
    pub fn hostname_entry(&self, hostname: &str) -> KeyResult<String> {
        let signature = self.sign(hostname.as_bytes())?;
        Ok(I2P_BASE64.encode(signature))
    }
}

fn decode_blob(combined: &str) -> KeyResult<Vec<u8>> {
    I2P_BASE64
        .decode(combined)
        .map_err(|e| AddressError::Encoding(e.to_string()).into())
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.destination == other.destination && self.combined == other.combined
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("destination", &self.destination)
            .field("signature_type", &self.signature_type)
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Deterministic key pairs for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Build an Ed25519 key pair whose bytes derive entirely from `seed`.
    ///
    /// The destination is 391 bytes: a filler encryption key, the verifying
    /// key right-aligned in the signing slot, and a key certificate naming
    /// Ed25519.
    pub fn keypair_from_seed(seed: [u8; 32]) -> KeyPair {
        let signer = SigningKey::from_bytes(&seed);

        let mut destination = vec![seed[0]; 256];
        destination.extend_from_slice(&[0u8; 96]);
        destination.extend_from_slice(signer.verifying_key().as_bytes());
        destination.extend_from_slice(&[5, 0, 4, 0, 7, 0, 0]);

        let mut blob = destination.clone();
        blob.extend_from_slice(&[seed[1]; 256]);
        blob.extend_from_slice(&seed);

        let destination = Destination::from_bytes(&destination).expect("fixture destination");
        KeyPair::from_parts(destination, &I2P_BASE64.encode(&blob)).expect("fixture key pair")
    }
}
