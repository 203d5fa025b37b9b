// Copyright (c) 2024 Botho Foundation

//! The control channel: one duplex byte stream to the bridge.
//!
//! Commands are newline-terminated text lines. Replies carry no length
//! prefix; in [`ReplyFraming::SingleRead`] mode a reply is whatever a single
//! read returns, up to the configured buffer size. A reply split across two
//! reads will be misparsed. That is a property of the protocol, and the
//! [`ReplyFraming::Line`] mode is the alternative for bridges known to
//! terminate every reply with a newline.

use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{trace, warn};

use crate::config::{BridgeConfig, ReplyFraming};
use crate::error::{SamError, SamResult};
use crate::reply::{redact, Reply};

/// Maximum write calls spent flushing a single command.
pub const MAX_WRITE_ATTEMPTS: u32 = 15;

/// A byte stream usable as a control channel.
pub trait ControlStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug {}

impl<T> ControlStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin + Debug {}

/// A boxed control stream for dynamic dispatch.
pub type BoxedStream = Box<dyn ControlStream>;

/// A control connection to the bridge.
#[derive(Debug)]
pub struct ControlChannel {
    io: BufReader<BoxedStream>,
    framing: ReplyFraming,
    buffer_size: usize,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    closed: bool,
}

impl ControlChannel {
    /// Wrap an established stream.
    pub fn new<S: ControlStream + 'static>(
        stream: S,
        framing: ReplyFraming,
        buffer_size: usize,
    ) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            io: BufReader::with_capacity(buffer_size, Box::new(stream)),
            framing,
            buffer_size,
            local_addr: None,
            peer_addr: None,
            closed: false,
        }
    }

    /// Wrap an established stream using the framing and buffer size from
    /// `config`.
    pub fn from_config<S: ControlStream + 'static>(stream: S, config: &BridgeConfig) -> Self {
        Self::new(stream, config.reply_framing, config.reply_buffer_size)
    }

    /// Record the socket addresses of the underlying connection.
    pub fn with_addrs(mut self, local: SocketAddr, peer: SocketAddr) -> Self {
        self.local_addr = Some(local);
        self.peer_addr = Some(peer);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether [`close`](Self::close) has run, directly or after a rejection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write one command line.
    ///
    /// Gives up after [`MAX_WRITE_ATTEMPTS`] write calls without flushing the
    /// whole line; the channel is closed in that case. A closed channel
    /// refuses with [`SamError::ConnectionClosed`].
    pub async fn send(&mut self, command: &str) -> SamResult<()> {
        if self.closed {
            return Err(SamError::ConnectionClosed);
        }
        trace!(command = %redact(command).trim_end(), "sending command");

        let bytes = command.as_bytes();
        let mut written = 0;
        let mut attempts = 0;
        while written < bytes.len() {
            if attempts == MAX_WRITE_ATTEMPTS {
                warn!(attempts, written, total = bytes.len(), "giving up on command write");
                self.close().await;
                return Err(SamError::WriteFailed { attempts });
            }
            attempts += 1;

            match self.io.get_mut().write(&bytes[written..]).await {
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    self.close().await;
                    return Err(e.into());
                }
            }
        }

        self.io.get_mut().flush().await?;
        Ok(())
    }

    /// Read one reply according to the channel's framing.
    pub async fn read_reply(&mut self) -> SamResult<String> {
        let reply = match self.framing {
            ReplyFraming::SingleRead => {
                let buf = self.io.fill_buf().await?;
                if buf.is_empty() {
                    return Err(SamError::ConnectionClosed);
                }
                let n = buf.len().min(self.buffer_size);
                let reply = String::from_utf8_lossy(&buf[..n]).into_owned();
                self.io.consume(n);
                reply
            }
            ReplyFraming::Line => self.read_line().await?,
        };
        trace!(reply = %redact(&reply).trim_end(), "received reply");
        Ok(reply)
    }

    /// Read up to and including the next newline.
    pub async fn read_line(&mut self) -> SamResult<String> {
        let mut line = String::new();
        if self.io.read_line(&mut line).await? == 0 {
            return Err(SamError::ConnectionClosed);
        }
        Ok(line)
    }

    /// Send a command and classify its reply as `<topic> <kind> RESULT=...`.
    ///
    /// On any rejection the channel is closed before the error is returned.
    pub async fn request(&mut self, command: &str, topic: &str, kind: &str) -> SamResult<Reply> {
        self.send(command).await?;
        let raw = match self.read_reply().await {
            Ok(raw) => raw,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };

        match Reply::parse(&raw).classify(topic, kind) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(error = %e, topic, kind, "bridge rejected command");
                self.close().await;
                Err(e.into())
            }
        }
    }

    /// Shut down the write side. Errors are ignored; the peer may already be
    /// gone.
    pub async fn close(&mut self) {
        self.closed = true;
        if let Err(e) = self.io.get_mut().shutdown().await {
            trace!(error = %e, "control channel shutdown");
        }
    }

    /// Give up the channel as a raw data stream, keeping any bytes already
    /// buffered.
    pub fn into_inner(self) -> BufReader<BoxedStream> {
        self.io
    }
}
