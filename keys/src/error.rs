// Copyright (c) 2024 Botho Foundation

//! Error types for destination encodings and key material.

use crate::signature::SignatureType;
use displaydoc::Display;
use thiserror::Error;

/// A destination or destination hash could not be constructed.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Destination length {len} is outside the accepted range {min}..={max}
    Length {
        /// Observed length (characters for strings, bytes for raw input)
        len: usize,
        /// Inclusive lower bound
        min: usize,
        /// Inclusive upper bound
        max: usize,
    },

    /// Destination is not valid I2P base64: {0}
    Encoding(String),

    /// A .b32.i2p short form cannot be converted back to a full destination
    ShortFormNotInvertible,

    /// Destination hash must be exactly 32 bytes, got {0}
    HashLength(usize),

    /// Invalid short-form address: {0}
    InvalidShortForm(String),
}

/// Key material could not be parsed, stored or used.
#[derive(Debug, Display, Error)]
pub enum KeyError {
    /// Invalid destination: {0}
    Address(#[from] AddressError),

    /// Key blob does not begin with its destination
    PrefixMismatch,

    /// Key blob truncated: need more than {needed} bytes after the destination, got {got}
    Truncated {
        /// Minimum number of trailing bytes required
        needed: usize,
        /// Number of trailing bytes present
        got: usize,
    },

    /// Destination certificate carries no known signature type
    UnknownSignatureType,

    /// Signature type {0} cannot be used for signing
    UnsupportedSignatureType(SignatureType),

    /// Signing key does not match the destination's public key
    SigningKeyMismatch,

    /// Malformed key file: {0}
    KeyFile(String),

    /// I/O error: {0}
    Io(#[from] std::io::Error),
}

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;
