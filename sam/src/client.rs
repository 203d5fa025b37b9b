// Copyright (c) 2024 Botho Foundation

//! The entry point: a control connection that has not yet become a session.
//!
//! A [`SamClient`] can generate keys and resolve names as often as needed.
//! Creating a session consumes it, since the bridge ties a session to the
//! control connection it was created on.

use sam_keys::destination::MIN_DESTINATION_CHARS;
use sam_keys::{Destination, KeyPair, SignatureType, I2P_SUFFIX};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bridge::{BridgeConnector, TcpBridge};
use crate::channel::ControlChannel;
use crate::config::BridgeConfig;
use crate::datagram::{DatagramSession, UdpBinding};
use crate::error::{ProtocolError, SamResult};
use crate::primary::PrimarySession;
use crate::reply::Reply;
use crate::session::{create_session, SessionCore, SessionRequest, SessionStyle};
use crate::stream::{strip_port, StreamSession};

/// Resolve `name` with `NAMING LOOKUP` on an open channel.
pub(crate) async fn lookup_on(channel: &mut ControlChannel, name: &str) -> SamResult<Destination> {
    let name = strip_port(name.trim());
    let command = format!("NAMING LOOKUP NAME={}\n", name);
    let reply = channel.request(&command, "NAMING", "REPLY").await?;

    let value = reply
        .get("VALUE")
        .ok_or_else(|| ProtocolError::UnparsedReply(reply.raw().to_string()))?;
    let destination = Destination::from_bridge(value)?;
    debug!(%name, %destination, "name resolved");
    Ok(destination)
}

/// Resolve `name` over a fresh connection from `connector`.
pub(crate) async fn lookup_with(
    connector: &dyn BridgeConnector,
    name: &str,
) -> SamResult<Destination> {
    let mut channel = connector.connect().await?;
    let result = lookup_on(&mut channel, name).await;
    channel.close().await;
    result
}

/// Turn a dial target into a destination: short `.i2p` names are looked up,
/// anything else must be a full base64 destination. A `:port` suffix is
/// ignored.
pub(crate) async fn resolve_with(
    connector: &dyn BridgeConnector,
    addr: &str,
) -> SamResult<Destination> {
    let host = strip_port(addr.trim());
    if host.ends_with(I2P_SUFFIX) && host.len() < MIN_DESTINATION_CHARS {
        lookup_with(connector, host).await
    } else {
        Ok(host.parse::<Destination>()?)
    }
}

/// Ask the bridge for a fresh key pair with `DEST GENERATE`.
///
/// A successful `DEST REPLY` carries no `RESULT=`; it is recognised by its
/// `PUB=` and `PRIV=` pairs.
pub(crate) async fn generate_keys_on(
    channel: &mut ControlChannel,
    signature_type: SignatureType,
) -> SamResult<KeyPair> {
    let command = format!("DEST GENERATE SIGNATURE_TYPE={}\n", signature_type.code());
    channel.send(&command).await?;

    let outcome = match channel.read_reply().await {
        Ok(raw) => keys_from_reply(Reply::parse(&raw)),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(keys) => {
            debug!(destination = %keys.destination(), %signature_type, "generated keys");
            Ok(keys)
        }
        Err(e) => {
            warn!(error = %e, "key generation failed");
            channel.close().await;
            Err(e)
        }
    }
}

fn keys_from_reply(reply: Reply) -> SamResult<KeyPair> {
    if reply.topic() == "DEST" && reply.kind() == "REPLY" {
        if let (Some(public), Some(private)) = (reply.get("PUB"), reply.get("PRIV")) {
            let destination = Destination::from_bridge(public)?;
            return Ok(KeyPair::from_parts(destination, private)?);
        }
    }

    // Without keys, only a rejection makes sense; even RESULT=OK is garbled.
    let raw = reply.raw().to_string();
    match reply.classify("DEST", "REPLY") {
        Err(e) => Err(e.into()),
        Ok(_) => Err(ProtocolError::UnparsedReply(raw).into()),
    }
}

/// A greeted control connection to the bridge.
#[derive(Debug)]
pub struct SamClient {
    channel: ControlChannel,
    connector: Arc<dyn BridgeConnector>,
}

impl SamClient {
    /// Connect over TCP using `config`.
    pub async fn new(config: BridgeConfig) -> SamResult<Self> {
        config.validate()?;
        Self::connect(Arc::new(TcpBridge::new(config))).await
    }

    /// Open a control connection through `connector`. Sessions created from
    /// this client use the same connector for their dials and accepts.
    pub async fn connect(connector: Arc<dyn BridgeConnector>) -> SamResult<Self> {
        let channel = connector.connect().await?;
        Ok(Self::from_channel(channel, connector))
    }

    /// Wrap a channel that has already completed the handshake.
    pub fn from_channel(channel: ControlChannel, connector: Arc<dyn BridgeConnector>) -> Self {
        Self { channel, connector }
    }

    pub fn connector(&self) -> &Arc<dyn BridgeConnector> {
        &self.connector
    }

    pub fn config(&self) -> &BridgeConfig {
        self.connector.config()
    }

    fn default_signature(&self) -> SignatureType {
        self.config().signature_type.unwrap_or_default()
    }

    /// Generate keys with the configured signature type (Ed25519 unless set).
    ///
    /// A rejected request closes the control connection.
    pub async fn new_keys(&mut self) -> SamResult<KeyPair> {
        let signature_type = self.default_signature();
        self.new_keys_with_signature(signature_type).await
    }

    pub async fn new_keys_with_signature(
        &mut self,
        signature_type: SignatureType,
    ) -> SamResult<KeyPair> {
        generate_keys_on(&mut self.channel, signature_type).await
    }

    /// Resolve a name such as `example.i2p`. A trailing `:port` is ignored.
    pub async fn lookup(&mut self, name: &str) -> SamResult<Destination> {
        lookup_on(&mut self.channel, name).await
    }

    async fn create(self, request: SessionRequest<'_>) -> SamResult<SessionCore> {
        create_session(self.channel, self.connector, request).await
    }

    /// Create a `STREAM` session bound to `keys`. `options` are passed to
    /// the bridge verbatim.
    pub async fn new_stream_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
    ) -> SamResult<StreamSession> {
        let signature_type = self.config().signature_type;
        self.stream_session(id, keys, options, signature_type, None, None)
            .await
    }

    pub async fn new_stream_session_with_signature(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        signature_type: SignatureType,
    ) -> SamResult<StreamSession> {
        self.stream_session(id, keys, options, Some(signature_type), None, None)
            .await
    }

    /// Like [`new_stream_session_with_signature`], restricted to the given
    /// ports. `None` or `Some(0)` leaves a port unrestricted.
    ///
    /// [`new_stream_session_with_signature`]: Self::new_stream_session_with_signature
    pub async fn new_stream_session_with_signature_and_ports(
        self,
        id: &str,
        from_port: Option<u16>,
        to_port: Option<u16>,
        keys: &KeyPair,
        options: &[&str],
        signature_type: SignatureType,
    ) -> SamResult<StreamSession> {
        self.stream_session(id, keys, options, Some(signature_type), from_port, to_port)
            .await
    }

    async fn stream_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        signature_type: Option<SignatureType>,
        from_port: Option<u16>,
        to_port: Option<u16>,
    ) -> SamResult<StreamSession> {
        let request = SessionRequest {
            style: SessionStyle::Stream,
            id,
            keys,
            from_port,
            to_port,
            signature_type,
            options,
        };
        Ok(StreamSession::from_core(self.create(request).await?))
    }

    /// Create a `PRIMARY` session that sub-sessions can be added to.
    pub async fn new_primary_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
    ) -> SamResult<PrimarySession> {
        let signature_type = self.config().signature_type;
        self.primary_session(id, keys, options, signature_type).await
    }

    pub async fn new_primary_session_with_signature(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        signature_type: SignatureType,
    ) -> SamResult<PrimarySession> {
        self.primary_session(id, keys, options, Some(signature_type))
            .await
    }

    async fn primary_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        signature_type: Option<SignatureType>,
    ) -> SamResult<PrimarySession> {
        let request = SessionRequest {
            style: SessionStyle::Primary,
            id,
            keys,
            from_port: None,
            to_port: None,
            signature_type,
            options,
        };
        Ok(PrimarySession::from_core(self.create(request).await?))
    }

    /// Create a top-level `DATAGRAM` session bound to `keys`.
    ///
    /// A local UDP socket is bound and announced with `PORT=`; `udp_port` is
    /// the bridge's UDP port, zero selecting the default.
    pub async fn new_datagram_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        udp_port: u32,
    ) -> SamResult<DatagramSession> {
        self.udp_session(SessionStyle::Datagram, id, keys, options, udp_port)
            .await
    }

    /// Create a top-level `RAW` session. Arguments as for
    /// [`new_datagram_session`](Self::new_datagram_session).
    pub async fn new_raw_session(
        self,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        udp_port: u32,
    ) -> SamResult<DatagramSession> {
        self.udp_session(SessionStyle::Raw, id, keys, options, udp_port)
            .await
    }

    async fn udp_session(
        mut self,
        style: SessionStyle,
        id: &str,
        keys: &KeyPair,
        options: &[&str],
        udp_port: u32,
    ) -> SamResult<DatagramSession> {
        let binding = match UdpBinding::bind(&self.channel, udp_port).await {
            Ok(binding) => binding,
            Err(e) => {
                self.channel.close().await;
                return Err(e);
            }
        };

        let port = binding.port_option();
        let mut session_options = vec![port.as_str()];
        session_options.extend_from_slice(options);
        let request = SessionRequest {
            style,
            id,
            keys,
            from_port: None,
            to_port: None,
            signature_type: self.config().signature_type,
            options: &session_options,
        };
        let core = self.create(request).await?;
        debug!(
            session = %id,
            %style,
            local_port = binding.local_port,
            bridge = %binding.bridge_udp_addr,
            "udp session registered"
        );
        Ok(DatagramSession::new(core, binding))
    }

    /// Close the control connection.
    pub async fn close(mut self) {
        self.channel.close().await;
    }
}
