// Copyright (c) 2024 Botho Foundation

//! Signature schemes a destination may declare in its key certificate.

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Signature type codes as assigned by the I2P common structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureType {
    /// DSA-SHA1, the legacy default (code 0).
    #[serde(rename = "DSA_SHA1")]
    DsaSha1,
    /// ECDSA over P-256 (code 1).
    #[serde(rename = "ECDSA_SHA256_P256")]
    EcdsaSha256P256,
    /// ECDSA over P-384 (code 2).
    #[serde(rename = "ECDSA_SHA384_P384")]
    EcdsaSha384P384,
    /// ECDSA over P-521 (code 3).
    #[serde(rename = "ECDSA_SHA512_P521")]
    EcdsaSha512P521,
    /// RSA-2048 (code 4).
    #[serde(rename = "RSA_SHA256_2048")]
    RsaSha256_2048,
    /// RSA-3072 (code 5).
    #[serde(rename = "RSA_SHA384_3072")]
    RsaSha384_3072,
    /// RSA-4096 (code 6).
    #[serde(rename = "RSA_SHA512_4096")]
    RsaSha512_4096,
    /// Ed25519 (code 7), the recommended type.
    #[serde(rename = "EdDSA_SHA512_Ed25519")]
    EdDsaSha512Ed25519,
    /// Prehashed Ed25519 (code 8).
    #[serde(rename = "EdDSA_SHA512_Ed25519ph")]
    EdDsaSha512Ed25519ph,
    /// RedDSA over Ed25519 (code 11).
    #[serde(rename = "RedDSA_SHA512_Ed25519")]
    RedDsaSha512Ed25519,
}

impl SignatureType {
    /// All known signature types.
    pub fn all() -> &'static [SignatureType] {
        &[
            SignatureType::DsaSha1,
            SignatureType::EcdsaSha256P256,
            SignatureType::EcdsaSha384P384,
            SignatureType::EcdsaSha512P521,
            SignatureType::RsaSha256_2048,
            SignatureType::RsaSha384_3072,
            SignatureType::RsaSha512_4096,
            SignatureType::EdDsaSha512Ed25519,
            SignatureType::EdDsaSha512Ed25519ph,
            SignatureType::RedDsaSha512Ed25519,
        ]
    }

    /// Look up a signature type by its numeric code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.code() == code)
    }

    /// Numeric code carried in key certificates and `SIGNATURE_TYPE=`.
    pub fn code(&self) -> u16 {
        match self {
            SignatureType::DsaSha1 => 0,
            SignatureType::EcdsaSha256P256 => 1,
            SignatureType::EcdsaSha384P384 => 2,
            SignatureType::EcdsaSha512P521 => 3,
            SignatureType::RsaSha256_2048 => 4,
            SignatureType::RsaSha384_3072 => 5,
            SignatureType::RsaSha512_4096 => 6,
            SignatureType::EdDsaSha512Ed25519 => 7,
            SignatureType::EdDsaSha512Ed25519ph => 8,
            SignatureType::RedDsaSha512Ed25519 => 11,
        }
    }

    /// Canonical name as understood by the bridge.
    pub fn name(&self) -> &'static str {
        match self {
            SignatureType::DsaSha1 => "DSA_SHA1",
            SignatureType::EcdsaSha256P256 => "ECDSA_SHA256_P256",
            SignatureType::EcdsaSha384P384 => "ECDSA_SHA384_P384",
            SignatureType::EcdsaSha512P521 => "ECDSA_SHA512_P521",
            SignatureType::RsaSha256_2048 => "RSA_SHA256_2048",
            SignatureType::RsaSha384_3072 => "RSA_SHA384_3072",
            SignatureType::RsaSha512_4096 => "RSA_SHA512_4096",
            SignatureType::EdDsaSha512Ed25519 => "EdDSA_SHA512_Ed25519",
            SignatureType::EdDsaSha512Ed25519ph => "EdDSA_SHA512_Ed25519ph",
            SignatureType::RedDsaSha512Ed25519 => "RedDSA_SHA512_Ed25519",
        }
    }

    /// Length of the signing public key in bytes.
    pub fn public_key_len(&self) -> usize {
        match self {
            SignatureType::DsaSha1 => 128,
            SignatureType::EcdsaSha256P256 => 64,
            SignatureType::EcdsaSha384P384 => 96,
            SignatureType::EcdsaSha512P521 => 132,
            SignatureType::RsaSha256_2048 => 256,
            SignatureType::RsaSha384_3072 => 384,
            SignatureType::RsaSha512_4096 => 512,
            SignatureType::EdDsaSha512Ed25519
            | SignatureType::EdDsaSha512Ed25519ph
            | SignatureType::RedDsaSha512Ed25519 => 32,
        }
    }

    /// Length of the signing private key in bytes.
    pub fn private_key_len(&self) -> usize {
        match self {
            SignatureType::DsaSha1 => 20,
            SignatureType::EcdsaSha256P256 => 32,
            SignatureType::EcdsaSha384P384 => 48,
            SignatureType::EcdsaSha512P521 => 66,
            SignatureType::RsaSha256_2048 => 512,
            SignatureType::RsaSha384_3072 => 768,
            SignatureType::RsaSha512_4096 => 1024,
            SignatureType::EdDsaSha512Ed25519
            | SignatureType::EdDsaSha512Ed25519ph
            | SignatureType::RedDsaSha512Ed25519 => 32,
        }
    }

    /// Whether this crate can produce signatures of this type.
    pub fn can_sign(&self) -> bool {
        matches!(self, SignatureType::EdDsaSha512Ed25519)
    }
}

impl Default for SignatureType {
    fn default() -> Self {
        SignatureType::EdDsaSha512Ed25519
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SignatureType {
    type Err = SignatureTypeParseError;

    /// Accepts either the canonical name (case-insensitive) or the code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u16>() {
            return Self::from_code(code).ok_or_else(|| SignatureTypeParseError(s.to_string()));
        }
        Self::all()
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SignatureTypeParseError(s.to_string()))
    }
}

/// invalid signature type '{0}'
#[derive(Debug, Clone, Display, Error, PartialEq, Eq)]
pub struct SignatureTypeParseError(String);
