// Copyright (c) 2024 Botho Foundation

//! Client for the SAM bridge of an I2P router.
//!
//! This library opens sessions on the bridge and dials and accepts streams
//! through them. A primary session multiplexes stream, datagram and raw
//! sub-sessions over one control connection. Destinations and keys come from
//! [`sam_keys`].

#![deny(clippy::print_stdout)]

pub mod bridge;
pub mod channel;
pub mod client;
pub mod config;
pub mod datagram;
pub mod error;
pub mod keystore;
pub mod listener;
pub mod primary;
pub mod reply;
pub mod session;
pub mod stream;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bridge::{BridgeConnector, TcpBridge};
pub use channel::ControlChannel;
pub use client::SamClient;
pub use config::{BridgeConfig, ReplyFraming, SidecarPolicy};
pub use datagram::DatagramSession;
pub use error::{ProtocolError, SamError, SamResult};
pub use keystore::{generate, generate_or_load};
pub use listener::StreamListener;
pub use primary::{Connection, DatagramPeer, PrimarySession};
pub use session::SessionStyle;
pub use stream::{SamStream, StreamSession};

pub use sam_keys::{Destination, DestinationHash, KeyPair, SignatureType};
