// Copyright (c) 2024 Botho Foundation

//! Session negotiation.
//!
//! Top-level sessions are created with `SESSION CREATE` on a control channel
//! they then own. Sub-sessions of a primary session are registered with
//! `SESSION ADD` on the primary's channel and share it.
//!
//! Port clauses are left out entirely when a port is unset; the bridge treats
//! a missing `FROM_PORT` differently from `FROM_PORT=0`.

use sam_keys::{Destination, KeyPair, SignatureType};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bridge::BridgeConnector;
use crate::channel::ControlChannel;
use crate::error::{SamError, SamResult};

/// Session style, as sent in `STYLE=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStyle {
    Stream,
    Datagram,
    Raw,
    Primary,
}

impl SessionStyle {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStyle::Stream => "STREAM",
            SessionStyle::Datagram => "DATAGRAM",
            SessionStyle::Raw => "RAW",
            SessionStyle::Primary => "PRIMARY",
        }
    }
}

impl fmt::Display for SessionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SessionStyle {
    type Err = SamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STREAM" => Ok(SessionStyle::Stream),
            "DATAGRAM" => Ok(SessionStyle::Datagram),
            "RAW" => Ok(SessionStyle::Raw),
            // MASTER is the pre-0.9.47 name of PRIMARY
            "PRIMARY" | "MASTER" => Ok(SessionStyle::Primary),
            other => Err(SamError::Config(format!("unknown session style {:?}", other))),
        }
    }
}

/// Parse a port attribute; empty and `"0"` mean unset.
pub fn parse_port(value: &str) -> SamResult<Option<u16>> {
    match value.trim() {
        "" | "0" => Ok(None),
        v => v
            .parse::<u16>()
            .map(Some)
            .map_err(|_| SamError::Config(format!("invalid port {:?}", v))),
    }
}

/// Treat `Some(0)` as unset.
pub(crate) fn normalize_port(port: Option<u16>) -> Option<u16> {
    port.filter(|&p| p != 0)
}

fn port_clauses(from_port: Option<u16>, to_port: Option<u16>) -> String {
    let mut clauses = String::new();
    if let Some(port) = normalize_port(from_port) {
        clauses.push_str(&format!(" FROM_PORT={}", port));
    }
    if let Some(port) = normalize_port(to_port) {
        clauses.push_str(&format!(" TO_PORT={}", port));
    }
    clauses
}

/// Session ids go on the wire unquoted.
pub(crate) fn validate_id(id: &str) -> SamResult<()> {
    if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c == '=') {
        return Err(SamError::Config(format!("invalid session id {:?}", id)));
    }
    Ok(())
}

/// Parameters for creating a top-level session.
#[derive(Debug, Clone)]
pub(crate) struct SessionRequest<'a> {
    pub style: SessionStyle,
    pub id: &'a str,
    pub keys: &'a KeyPair,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    pub signature_type: Option<SignatureType>,
    pub options: &'a [&'a str],
}

impl SessionRequest<'_> {
    /// `SESSION CREATE STYLE=<s> ID=<id> [FROM_PORT=n] [TO_PORT=n]
    /// DESTINATION=<keys> [SIGNATURE_TYPE=n] <options>`
    pub fn command(&self) -> String {
        let mut line = format!(
            "SESSION CREATE STYLE={} ID={}{} DESTINATION={}",
            self.style,
            self.id,
            port_clauses(self.from_port, self.to_port),
            self.keys.combined()
        );
        if let Some(signature_type) = self.signature_type {
            line.push_str(&format!(" SIGNATURE_TYPE={}", signature_type.code()));
        }
        for option in self.options {
            line.push(' ');
            line.push_str(option);
        }
        line.push('\n');
        line
    }
}

/// `SESSION ADD STYLE=<s> ID=<id> [FROM_PORT=n] [TO_PORT=n] <extras>`
///
/// The separator before the extras is always written, even when there are
/// none.
pub(crate) fn add_command(
    style: SessionStyle,
    id: &str,
    from_port: Option<u16>,
    to_port: Option<u16>,
    extras: &[String],
) -> String {
    format!(
        "SESSION ADD STYLE={} ID={}{} {}\n",
        style,
        id,
        port_clauses(from_port, to_port),
        extras.join(" ")
    )
}

/// Send a session command and classify the `SESSION STATUS` reply.
///
/// The channel is closed on any rejection.
pub(crate) async fn negotiate(channel: &mut ControlChannel, command: &str) -> SamResult<()> {
    channel.request(command, "SESSION", "STATUS").await?;
    Ok(())
}

/// State shared by every handle onto one session.
#[derive(Debug, Clone)]
pub(crate) struct SessionCore {
    pub id: String,
    pub style: SessionStyle,
    pub keys: KeyPair,
    pub control: Arc<Mutex<ControlChannel>>,
    /// Whether closing this session closes the control channel. False for
    /// sub-sessions, which borrow their primary's.
    pub owns_control: bool,
    pub connector: Arc<dyn BridgeConnector>,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    pub signature_type: Option<SignatureType>,
    pub timeout: Duration,
    pub deadline: Option<Instant>,
}

impl SessionCore {
    /// Core for a session that owns `channel`.
    pub fn owned(
        request: &SessionRequest<'_>,
        channel: ControlChannel,
        connector: Arc<dyn BridgeConnector>,
    ) -> Self {
        let timeout = connector.config().session_timeout();
        Self {
            id: request.id.to_string(),
            style: request.style,
            keys: request.keys.clone(),
            control: Arc::new(Mutex::new(channel)),
            owns_control: true,
            connector,
            from_port: normalize_port(request.from_port),
            to_port: normalize_port(request.to_port),
            signature_type: request.signature_type,
            timeout,
            deadline: None,
        }
    }

    /// Core for a sub-session riding on `parent`'s channel.
    pub fn borrowed(
        parent: &SessionCore,
        style: SessionStyle,
        id: &str,
        from_port: Option<u16>,
        to_port: Option<u16>,
    ) -> Self {
        Self {
            id: id.to_string(),
            style,
            keys: parent.keys.clone(),
            control: parent.control.clone(),
            owns_control: false,
            connector: parent.connector.clone(),
            from_port: normalize_port(from_port),
            to_port: normalize_port(to_port),
            signature_type: None,
            timeout: parent.timeout,
            deadline: None,
        }
    }

    pub fn destination(&self) -> &Destination {
        self.keys.destination()
    }

    /// Close the control channel if this session owns it.
    pub async fn close(&self) {
        if self.owns_control {
            self.control.lock().await.close().await;
            info!(session = %self.id, style = %self.style, "session closed");
        } else {
            debug!(session = %self.id, "sub-session released");
        }
    }
}

/// Open a session on `channel` with `SESSION CREATE`.
pub(crate) async fn create_session(
    mut channel: ControlChannel,
    connector: Arc<dyn BridgeConnector>,
    request: SessionRequest<'_>,
) -> SamResult<SessionCore> {
    validate_id(request.id)?;
    negotiate(&mut channel, &request.command()).await?;

    info!(
        session = %request.id,
        style = %request.style,
        destination = %request.keys.destination(),
        "session created"
    );
    Ok(SessionCore::owned(&request, channel, connector))
}

/// Register a sub-session on `parent`'s channel with `SESSION ADD`.
pub(crate) async fn add_subsession(
    parent: &SessionCore,
    style: SessionStyle,
    id: &str,
    from_port: Option<u16>,
    to_port: Option<u16>,
    extras: &[String],
) -> SamResult<SessionCore> {
    validate_id(id)?;
    let command = add_command(style, id, from_port, to_port, extras);
    {
        let mut control = parent.control.lock().await;
        negotiate(&mut control, &command).await?;
    }

    debug!(primary = %parent.id, session = %id, style = %style, "sub-session added");
    Ok(SessionCore::borrowed(parent, style, id, from_port, to_port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sam_keys::test_utils::keypair_from_seed;

    #[test]
    fn test_style_names() {
        assert_eq!(SessionStyle::Stream.to_string(), "STREAM");
        assert_eq!("raw".parse::<SessionStyle>().unwrap(), SessionStyle::Raw);
        assert_eq!("MASTER".parse::<SessionStyle>().unwrap(), SessionStyle::Primary);
        assert!("QUIC".parse::<SessionStyle>().is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("").unwrap(), None);
        assert_eq!(parse_port("0").unwrap(), None);
        assert_eq!(parse_port("1234").unwrap(), Some(1234));
        assert!(parse_port("70000").is_err());
        assert!(parse_port("abc").is_err());
    }

    #[test]
    fn test_add_command_omits_unset_ports() {
        assert_eq!(
            add_command(SessionStyle::Stream, "sub", None, Some(0), &[]),
            "SESSION ADD STYLE=STREAM ID=sub \n"
        );
        assert_eq!(
            add_command(SessionStyle::Stream, "sub", Some(4000), Some(5000), &[]),
            "SESSION ADD STYLE=STREAM ID=sub FROM_PORT=4000 TO_PORT=5000 \n"
        );
        assert_eq!(
            add_command(
                SessionStyle::Datagram,
                "dg",
                None,
                None,
                &["PORT=40000".to_string(), "HOST=127.0.0.1".to_string()]
            ),
            "SESSION ADD STYLE=DATAGRAM ID=dg PORT=40000 HOST=127.0.0.1\n"
        );
    }

    #[test]
    fn test_create_command() {
        let keys = keypair_from_seed([1u8; 32]);
        let request = SessionRequest {
            style: SessionStyle::Stream,
            id: "test",
            keys: &keys,
            from_port: Some(0),
            to_port: Some(8080),
            signature_type: Some(SignatureType::EdDsaSha512Ed25519),
            options: &["inbound.length=1", "outbound.length=1"],
        };
        assert_eq!(
            request.command(),
            format!(
                "SESSION CREATE STYLE=STREAM ID=test TO_PORT=8080 DESTINATION={} \
                 SIGNATURE_TYPE=7 inbound.length=1 outbound.length=1\n",
                keys.combined()
            )
        );
    }

    #[test]
    fn test_create_command_minimal() {
        let keys = keypair_from_seed([2u8; 32]);
        let request = SessionRequest {
            style: SessionStyle::Primary,
            id: "p",
            keys: &keys,
            from_port: None,
            to_port: None,
            signature_type: None,
            options: &[],
        };
        assert_eq!(
            request.command(),
            format!("SESSION CREATE STYLE=PRIMARY ID=p DESTINATION={}\n", keys.combined())
        );
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("test").is_ok());
        assert!(validate_id("primary.tcpAbCd").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("two words").is_err());
        assert!(validate_id("a=b").is_err());
    }
}
