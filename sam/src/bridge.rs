// Copyright (c) 2024 Botho Foundation

//! Opening control connections.
//!
//! Every session keeps the connector it was created with, and every dial,
//! accept and lookup opens its own fresh control connection through it.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::ControlChannel;
use crate::config::BridgeConfig;
use crate::error::{SamError, SamResult};

/// Something that can open a ready-to-use control channel to a bridge.
///
/// A returned channel has completed any handshake and accepts commands.
#[async_trait]
pub trait BridgeConnector: Send + Sync + Debug {
    /// Open a new control connection.
    async fn connect(&self) -> SamResult<ControlChannel>;

    /// Bridge configuration this connector was built from.
    fn config(&self) -> &BridgeConfig;

    /// Bridge control address, `host:port`.
    fn address(&self) -> &str {
        &self.config().address
    }
}

/// Connects over TCP and performs the `HELLO` version exchange.
#[derive(Debug, Clone)]
pub struct TcpBridge {
    config: BridgeConfig,
}

impl TcpBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// A bridge at `address` with default settings.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self::new(BridgeConfig::with_address(address))
    }

    fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout()
    }
}

impl Default for TcpBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

#[async_trait]
impl BridgeConnector for TcpBridge {
    async fn connect(&self) -> SamResult<ControlChannel> {
        let address = &self.config.address;
        let stream = tokio::time::timeout(self.connect_timeout(), TcpStream::connect(address))
            .await
            .map_err(|_| {
                SamError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to bridge at {}", address),
                ))
            })??;

        stream.set_nodelay(true)?;
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;

        let mut channel = ControlChannel::from_config(stream, &self.config).with_addrs(local, peer);
        hello(&mut channel, &self.config).await?;

        debug!(bridge = %address, %local, "control connection ready");
        Ok(channel)
    }

    fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// Negotiate the protocol version on a freshly opened channel.
pub async fn hello(channel: &mut ControlChannel, config: &BridgeConfig) -> SamResult<()> {
    let command = format!(
        "HELLO VERSION MIN={} MAX={}\n",
        config.hello_min_version, config.hello_max_version
    );
    channel.request(&command, "HELLO", "REPLY").await?;
    Ok(())
}
