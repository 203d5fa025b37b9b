// Copyright (c) 2024 Botho Foundation

//! Stream sessions and the active-open side of streaming.
//!
//! Every dial opens its own control connection to the bridge, sends
//! `STREAM CONNECT`, and on success that same socket becomes the data stream.
//!
//! ```text
//! Idle -> ControlOpened -> CommandSent -> ReplyParsed -> Connected
//!                                                     \-> Failed (socket closed)
//! ```

use sam_keys::{Destination, KeyPair, SignatureType};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{BoxedStream, ControlChannel};
use crate::client::{lookup_with, resolve_with};
use crate::error::{SamError, SamResult};
use crate::listener::StreamListener;
use crate::reply::Reply;
use crate::session::SessionCore;

/// A connected stream to a remote destination.
///
/// Reads and writes go straight to the socket that carried the `CONNECT` or
/// `ACCEPT` exchange; bytes that arrived together with the status line are
/// not lost.
pub struct SamStream {
    io: BufReader<BoxedStream>,
    local: Destination,
    remote: Destination,
    from_port: Option<u16>,
    to_port: Option<u16>,
}

impl SamStream {
    pub(crate) fn new(
        channel: ControlChannel,
        local: Destination,
        remote: Destination,
        from_port: Option<u16>,
        to_port: Option<u16>,
    ) -> Self {
        Self {
            io: channel.into_inner(),
            local,
            remote,
            from_port,
            to_port,
        }
    }

    /// Our own destination.
    pub fn local(&self) -> &Destination {
        &self.local
    }

    /// The peer's destination.
    pub fn remote(&self) -> &Destination {
        &self.remote
    }

    /// `FROM_PORT` reported for an accepted connection.
    pub fn from_port(&self) -> Option<u16> {
        self.from_port
    }

    /// `TO_PORT` reported for an accepted connection.
    pub fn to_port(&self) -> Option<u16> {
        self.to_port
    }
}

impl fmt::Debug for SamStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamStream")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("from_port", &self.from_port)
            .field("to_port", &self.to_port)
            .finish()
    }
}

impl AsyncRead for SamStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for SamStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// Strip a trailing `:port`; I2P addressing has no use for it.
pub(crate) fn strip_port(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    }
}

/// Networks a stream dial accepts.
pub(crate) fn is_stream_network(network: &str) -> bool {
    matches!(network, "" | "tcp" | "tcp4" | "tcp6")
}

/// Earliest of the non-empty candidates.
pub(crate) fn earliest(candidates: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    candidates.into_iter().flatten().min()
}

/// A streaming session.
///
/// Cheap to clone; clones share the session's control channel.
#[derive(Debug, Clone)]
pub struct StreamSession {
    core: Arc<SessionCore>,
}

impl StreamSession {
    pub(crate) fn from_core(core: SessionCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn keys(&self) -> &KeyPair {
        &self.core.keys
    }

    /// Our own destination.
    pub fn destination(&self) -> &Destination {
        self.core.destination()
    }

    /// `FROM_PORT` the session was created with.
    pub fn from_port(&self) -> Option<u16> {
        self.core.from_port
    }

    /// `TO_PORT` the session was created with.
    pub fn to_port(&self) -> Option<u16> {
        self.core.to_port
    }

    pub fn signature_type(&self) -> Option<SignatureType> {
        self.core.signature_type
    }

    /// Per-dial timeout; zero disables it.
    pub fn timeout(&self) -> Duration {
        self.core.timeout
    }

    /// Absolute deadline applied to every dial, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.core.deadline
    }

    /// Set the per-dial timeout. Only affects handles created afterwards
    /// through this one.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_core(|core| core.timeout = timeout)
    }

    /// Set an absolute deadline for dials. Only affects handles created
    /// afterwards through this one.
    pub fn with_deadline(&self, deadline: Option<Instant>) -> Self {
        self.with_core(|core| core.deadline = deadline)
    }

    fn with_core(&self, update: impl FnOnce(&mut SessionCore)) -> Self {
        let mut core = SessionCore::clone(&self.core);
        update(&mut core);
        Self::from_core(core)
    }

    /// Resolve a name through a fresh bridge connection.
    pub async fn lookup(&self, name: &str) -> SamResult<Destination> {
        lookup_with(self.core.connector.as_ref(), name).await
    }

    /// Connect to `destination`.
    pub async fn dial_i2p(&self, destination: &Destination) -> SamResult<SamStream> {
        let mut channel = self.core.connector.connect().await?;
        let command = format!(
            "STREAM CONNECT ID={} DESTINATION={} SILENT=false\n",
            self.core.id,
            destination.to_base64()
        );
        channel.send(&command).await?;

        let raw = match channel.read_line().await {
            Ok(raw) => raw,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };
        if let Err(e) = Reply::parse(&raw).classify("STREAM", "STATUS") {
            warn!(session = %self.core.id, remote = %destination, error = %e, "dial failed");
            channel.close().await;
            return Err(e.into());
        }

        debug!(session = %self.core.id, remote = %destination, "stream connected");
        Ok(SamStream::new(
            channel,
            self.destination().clone(),
            destination.clone(),
            None,
            None,
        ))
    }

    /// Connect to `addr`: a name ending in `.i2p` (resolved through the
    /// bridge) or a full base64 destination. A trailing `:port` is ignored.
    pub async fn dial(&self, network: &str, addr: &str) -> SamResult<SamStream> {
        self.dial_with_deadline(network, addr, None).await
    }

    /// Like [`dial`](Self::dial), bounded by the earliest of the session
    /// timeout, the session deadline and `deadline`.
    ///
    /// When the bound expires the in-flight control socket is dropped and
    /// [`SamError::DeadlineExceeded`] is returned.
    pub async fn dial_with_deadline(
        &self,
        network: &str,
        addr: &str,
        deadline: Option<Instant>,
    ) -> SamResult<SamStream> {
        if !is_stream_network(network) {
            return Err(SamError::Config(format!(
                "network {:?} cannot carry a stream",
                network
            )));
        }

        let now = Instant::now();
        let session_bound = (!self.core.timeout.is_zero()).then(|| now + self.core.timeout);
        let bound = earliest([session_bound, self.core.deadline, deadline]);

        let dial = self.resolve_and_dial(addr);
        match bound {
            Some(bound) => tokio::time::timeout_at(bound, dial)
                .await
                .map_err(|_| SamError::DeadlineExceeded)?,
            None => dial.await,
        }
    }

    async fn resolve_and_dial(&self, addr: &str) -> SamResult<SamStream> {
        let destination = resolve_with(self.core.connector.as_ref(), addr).await?;
        self.dial_i2p(&destination).await
    }

    /// A listener accepting inbound streams on this session.
    pub fn listen(&self) -> StreamListener {
        StreamListener::new(self.core.clone())
    }

    /// Accept one inbound stream.
    pub async fn accept(&self) -> SamResult<SamStream> {
        self.listen().accept().await
    }

    /// Close the session. Sub-sessions leave their primary's channel open.
    pub async fn close(&self) {
        self.core.close().await;
    }
}
