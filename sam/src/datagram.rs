// Copyright (c) 2024 Botho Foundation

//! Datagram and raw sessions.
//!
//! The bridge relays repliable or raw datagrams over UDP: the client binds a
//! local socket, announces its port with `PORT=<n>` when the session is
//! created, and sends outbound datagrams to the bridge's UDP port. Relaying
//! payloads is left to the caller.

use sam_keys::Destination;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::channel::ControlChannel;
use crate::config::bridge_udp_port;
use crate::error::{SamError, SamResult};
use crate::session::{SessionCore, SessionStyle};

/// A local UDP socket and the bridge endpoint it exchanges datagrams with.
#[derive(Debug)]
pub(crate) struct UdpBinding {
    pub socket: UdpSocket,
    pub local_port: u16,
    pub bridge_udp_addr: SocketAddr,
}

impl UdpBinding {
    /// Bind on the control connection's local IP and work out the bridge's
    /// UDP endpoint for `udp_port` (zero selects the default).
    pub async fn bind(control: &ControlChannel, udp_port: u32) -> SamResult<Self> {
        let bridge_port = bridge_udp_port(udp_port)?;
        let (local, peer) = control.local_addr().zip(control.peer_addr()).ok_or_else(|| {
            SamError::Config("control channel has no socket addresses".to_string())
        })?;

        let socket = UdpSocket::bind(SocketAddr::new(local.ip(), 0)).await?;
        let local_port = socket.local_addr()?.port();
        Ok(Self {
            socket,
            local_port,
            bridge_udp_addr: SocketAddr::new(peer.ip(), bridge_port),
        })
    }

    /// The `PORT=` option announcing the local socket to the bridge.
    pub fn port_option(&self) -> String {
        format!("PORT={}", self.local_port)
    }
}

/// A `DATAGRAM` or `RAW` session, either top-level or registered under a
/// primary session.
///
/// Holds the local UDP socket registered with the bridge and the bridge's UDP
/// endpoint.
#[derive(Debug)]
pub struct DatagramSession {
    core: SessionCore,
    socket: Arc<UdpSocket>,
    bridge_udp_addr: SocketAddr,
}

impl DatagramSession {
    pub(crate) fn new(core: SessionCore, binding: UdpBinding) -> Self {
        Self {
            core,
            socket: Arc::new(binding.socket),
            bridge_udp_addr: binding.bridge_udp_addr,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// `DATAGRAM` or `RAW`.
    pub fn style(&self) -> SessionStyle {
        self.core.style
    }

    pub fn destination(&self) -> &Destination {
        self.core.destination()
    }

    /// The local socket the bridge forwards datagrams to.
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Where outbound datagrams are sent.
    pub fn bridge_udp_addr(&self) -> SocketAddr {
        self.bridge_udp_addr
    }

    /// Close the session. Sub-sessions leave their primary's channel open.
    pub async fn close(&self) {
        self.core.close().await;
    }
}
