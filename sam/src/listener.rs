// Copyright (c) 2024 Botho Foundation

//! The passive-open side of streaming.
//!
//! ```text
//! Idle -> ControlOpened -> AcceptSent -> StatusLineRead -> OriginLineRead -> Connected
//!                                                       \-> Failed (socket closed)
//! ```
//!
//! After a successful status line the bridge sends one origin line:
//! `<destination> [FROM_PORT=n] [TO_PORT=n]`. The ports are handed back on
//! the returned [`SamStream`]; the session itself is never mutated, so
//! concurrent accept loops on one session do not race.

use sam_keys::Destination;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::ControlChannel;
use crate::error::{ProtocolError, SamResult};
use crate::reply::Reply;
use crate::session::{parse_port, SessionCore};
use crate::stream::SamStream;

/// Where an accepted stream came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Origin {
    pub remote: Destination,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
}

impl Origin {
    /// Parse `<destination> [FROM_PORT=n] [TO_PORT=n]`; the port attributes
    /// may appear anywhere after the destination.
    pub fn parse(line: &str) -> SamResult<Self> {
        let mut tokens = line.split_whitespace();
        let first = tokens
            .next()
            .ok_or_else(|| ProtocolError::UnparsedReply(line.to_string()))?;
        let remote = Destination::from_bridge(first)?;

        let mut from_port = None;
        let mut to_port = None;
        for token in tokens {
            if let Some(value) = token.strip_prefix("FROM_PORT=") {
                from_port = parse_port(value)?;
            } else if let Some(value) = token.strip_prefix("TO_PORT=") {
                to_port = parse_port(value)?;
            }
        }

        Ok(Self {
            remote,
            from_port,
            to_port,
        })
    }
}

/// Accepts inbound streams for one session.
#[derive(Debug, Clone)]
pub struct StreamListener {
    core: Arc<SessionCore>,
}

impl StreamListener {
    pub(crate) fn new(core: Arc<SessionCore>) -> Self {
        Self { core }
    }

    /// Id of the session this listener accepts for.
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// The destination peers connect to.
    pub fn destination(&self) -> &Destination {
        self.core.destination()
    }

    /// Wait for one inbound stream.
    ///
    /// Each call opens its own control connection; call it repeatedly (or
    /// from several tasks) to serve more than one peer.
    pub async fn accept(&self) -> SamResult<SamStream> {
        let mut channel = self.core.connector.connect().await?;
        let command = format!("STREAM ACCEPT ID={} SILENT=false\n", self.core.id);
        channel.send(&command).await?;

        match self.await_origin(&mut channel).await {
            Ok(origin) => {
                debug!(
                    session = %self.core.id,
                    remote = %origin.remote,
                    from_port = ?origin.from_port,
                    to_port = ?origin.to_port,
                    "stream accepted"
                );
                Ok(SamStream::new(
                    channel,
                    self.destination().clone(),
                    origin.remote,
                    origin.from_port,
                    origin.to_port,
                ))
            }
            Err(e) => {
                warn!(session = %self.core.id, error = %e, "accept failed");
                channel.close().await;
                Err(e)
            }
        }
    }

    async fn await_origin(&self, channel: &mut ControlChannel) -> SamResult<Origin> {
        let status = channel.read_line().await?;
        Reply::parse(&status).classify("STREAM", "STATUS")?;

        let origin = channel.read_line().await?;
        Origin::parse(origin.trim_end_matches(['\r', '\n']))
    }

    /// Close the session this listener belongs to.
    pub async fn close(&self) {
        self.core.close().await;
    }
}
