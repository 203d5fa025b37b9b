// Copyright (c) 2024 Botho Foundation

//! Destinations, destination hashes and key material for SAM tunnels.
//!
//! Everything here is pure apart from the key file helpers in [`keyfile`].

#![forbid(unsafe_code)]

pub mod destination;
pub mod encoding;
mod error;
pub mod keyfile;
mod keypair;
mod signature;

pub use destination::{
    decode_destination, encode_destination, Destination, DestinationHash, B32_SUFFIX, I2P_SUFFIX,
};
pub use error::{AddressError, KeyError, KeyResult};
pub use keyfile::{load_keys, store_keys, write_short_form_file};
pub use keypair::KeyPair;
pub use signature::{SignatureType, SignatureTypeParseError};

#[cfg(any(test, feature = "test-utils"))]
pub use keypair::test_utils;
