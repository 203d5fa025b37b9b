// Copyright (c) 2024 Botho Foundation

//! Error types for the SAM client.
//!
//! Protocol-level rejections are reported as [`ProtocolError`], a closed set
//! of the result tokens the bridge sends back. Everything a caller can see is
//! folded into [`SamError`].

use sam_keys::{AddressError, KeyError};
use std::io;
use thiserror::Error;

/// A command was rejected by the bridge, or its reply was not understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Another session on the bridge already uses this id.
    #[error("duplicate tunnel name")]
    DuplicateId,

    /// Another session on the bridge already uses this destination.
    #[error("duplicate destination")]
    DuplicateDestination,

    /// The bridge rejected the supplied keys or destination.
    #[error("invalid key")]
    InvalidKey,

    /// The session id is unknown to the bridge.
    #[error("invalid session id")]
    InvalidId,

    /// The router reported an internal error.
    #[error("I2P error: {0}")]
    I2pError(String),

    /// The remote destination could not be reached.
    #[error("cannot reach peer")]
    CantReachPeer,

    /// The bridge gave up waiting on the router.
    #[error("timeout")]
    Timeout,

    /// A name lookup found nothing.
    #[error("name not found: {0}")]
    KeyNotFound(String),

    /// Reply did not match any known status.
    #[error("unparsed reply: {0:?}")]
    UnparsedReply(String),
}

/// Errors returned by SAM client operations.
#[derive(Debug, Error)]
pub enum SamError {
    /// A destination string or blob was malformed.
    #[error("malformed address: {0}")]
    MalformedAddress(#[from] AddressError),

    /// Key material could not be parsed or persisted.
    #[error("key error: {0}")]
    Keys(#[from] KeyError),

    /// The bridge rejected a command.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying socket or file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid argument or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command could not be flushed to the bridge.
    #[error("write failed after {attempts} attempts")]
    WriteFailed { attempts: u32 },

    /// A dial did not finish before its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The bridge closed the control connection.
    #[error("connection closed by bridge")]
    ConnectionClosed,
}

impl SamError {
    /// The protocol rejection behind this error, if any.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            SamError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for SAM operations.
pub type SamResult<T> = Result<T, SamError>;
