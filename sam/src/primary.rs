// Copyright (c) 2024 Botho Foundation

//! Primary sessions and their sub-sessions.
//!
//! A primary session owns one control connection; every sub-session is
//! registered on it with `SESSION ADD` and shares the primary's keys. Dials
//! through the primary are routed to a sub-session per
//! `network + first four characters of the target`, created on first use and
//! reused afterwards.
//!
//! Concurrent first dials for the same routing key join a single in-flight
//! creation instead of racing to register duplicate sub-sessions.

use parking_lot::Mutex;
use rand::Rng;
use sam_keys::{Destination, KeyPair, SignatureType};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::client::{lookup_with, resolve_with};
use crate::datagram::{DatagramSession, UdpBinding};
use crate::error::{SamError, SamResult};
use crate::session::{add_subsession, SessionCore, SessionStyle};
use crate::stream::{SamStream, StreamSession};

/// Range random sub-session ports are drawn from.
const EPHEMERAL_PORTS: std::ops::Range<u16> = 10000..65534;

fn random_port() -> u16 {
    rand::thread_rng().gen_range(EPHEMERAL_PORTS)
}

/// `network` plus the first four characters of `addr`.
pub(crate) fn routing_key(network: &str, addr: &str) -> SamResult<String> {
    let prefix = addr.get(..4).ok_or_else(|| {
        SamError::Config(format!("address {:?} is too short to route", addr))
    })?;
    Ok(format!("{}{}", network, prefix))
}

/// Sub-sessions keyed by routing key, each created at most once.
#[derive(Debug)]
struct SubSessionCache<T> {
    slots: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T: Clone> SubSessionCache<T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The cached value for `key`, or the result of `create`.
    ///
    /// Failures are not cached. A rejected `SESSION ADD` closes the
    /// primary's channel though, so later creations on the same primary
    /// fail with [`SamError::ConnectionClosed`].
    async fn get_or_create<F, Fut>(&self, key: &str, create: F) -> SamResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SamResult<T>>,
    {
        let slot = self.slots.lock().entry(key.to_string()).or_default().clone();
        slot.get_or_try_init(create).await.cloned()
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// A datagram sub-session paired with the peer a dial resolved.
#[derive(Debug, Clone)]
pub struct DatagramPeer {
    pub session: Arc<DatagramSession>,
    pub remote: Destination,
}

/// What a [`PrimarySession::dial`] produced.
#[derive(Debug)]
pub enum Connection {
    Stream(SamStream),
    Datagram(DatagramPeer),
}

/// A `PRIMARY` session.
#[derive(Debug)]
pub struct PrimarySession {
    core: Arc<SessionCore>,
    streams: SubSessionCache<StreamSession>,
    datagrams: SubSessionCache<Arc<DatagramSession>>,
}

impl PrimarySession {
    pub(crate) fn from_core(core: SessionCore) -> Self {
        Self {
            core: Arc::new(core),
            streams: SubSessionCache::new(),
            datagrams: SubSessionCache::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn keys(&self) -> &KeyPair {
        &self.core.keys
    }

    pub fn destination(&self) -> &Destination {
        self.core.destination()
    }

    pub fn signature_type(&self) -> Option<SignatureType> {
        self.core.signature_type
    }

    /// Primary sessions are never port-restricted.
    pub fn from_port(&self) -> Option<u16> {
        None
    }

    pub fn to_port(&self) -> Option<u16> {
        None
    }

    /// Dial timeout inherited by stream sub-sessions.
    pub fn timeout(&self) -> Duration {
        self.core.timeout
    }

    /// Number of stream sub-sessions created by [`dial_tcp`](Self::dial_tcp).
    pub fn routed_streams(&self) -> usize {
        self.streams.len()
    }

    /// Number of datagram sub-sessions created by [`dial_udp`](Self::dial_udp).
    pub fn routed_datagrams(&self) -> usize {
        self.datagrams.len()
    }

    /// Register a `STREAM` sub-session without port restrictions.
    pub async fn new_stream_subsession(&self, id: &str) -> SamResult<StreamSession> {
        self.new_stream_subsession_with_ports(id, None, None).await
    }

    /// Register a `STREAM` sub-session on a random port pair, so several can
    /// coexist under one primary without colliding.
    pub async fn new_unique_stream_subsession(&self, id: &str) -> SamResult<StreamSession> {
        self.new_stream_subsession_with_ports(id, Some(random_port()), Some(random_port()))
            .await
    }

    pub async fn new_stream_subsession_with_ports(
        &self,
        id: &str,
        from_port: Option<u16>,
        to_port: Option<u16>,
    ) -> SamResult<StreamSession> {
        let core =
            add_subsession(&self.core, SessionStyle::Stream, id, from_port, to_port, &[]).await?;
        Ok(StreamSession::from_core(core))
    }

    /// Register a `DATAGRAM` sub-session. `udp_port` is the bridge's UDP
    /// port; zero selects the default.
    pub async fn new_datagram_subsession(
        &self,
        id: &str,
        udp_port: u32,
    ) -> SamResult<DatagramSession> {
        self.udp_subsession(SessionStyle::Datagram, id, udp_port)
            .await
    }

    /// Register a `RAW` sub-session. `udp_port` as for
    /// [`new_datagram_subsession`](Self::new_datagram_subsession).
    pub async fn new_raw_subsession(&self, id: &str, udp_port: u32) -> SamResult<DatagramSession> {
        self.udp_subsession(SessionStyle::Raw, id, udp_port).await
    }

    async fn udp_subsession(
        &self,
        style: SessionStyle,
        id: &str,
        udp_port: u32,
    ) -> SamResult<DatagramSession> {
        let binding = {
            let control = self.core.control.lock().await;
            UdpBinding::bind(&control, udp_port).await?
        };
        let extras = [binding.port_option()];
        let core = add_subsession(&self.core, style, id, None, None, &extras).await?;

        debug!(
            primary = %self.core.id,
            session = %id,
            %style,
            local_port = binding.local_port,
            bridge = %binding.bridge_udp_addr,
            "udp sub-session registered"
        );
        Ok(DatagramSession::new(core, binding))
    }

    fn routed_id(&self, key: &str) -> String {
        format!("{}.{}", self.core.id, key)
    }

    /// Dial through a routed sub-session: `tcp`, `tcp4` and `tcp6` give a
    /// stream, `udp`, `udp4` and `udp6` a datagram peer.
    pub async fn dial(&self, network: &str, addr: &str) -> SamResult<Connection> {
        match network {
            "tcp" | "tcp4" | "tcp6" => self.dial_tcp(network, addr).await.map(Connection::Stream),
            "udp" | "udp4" | "udp6" => {
                self.dial_udp(network, addr).await.map(Connection::Datagram)
            }
            other => Err(SamError::Config(format!(
                "unsupported network {:?}",
                other
            ))),
        }
    }

    /// Open a stream to `addr` through the stream sub-session for its
    /// routing key.
    pub async fn dial_tcp(&self, network: &str, addr: &str) -> SamResult<SamStream> {
        let key = routing_key(network, addr)?;
        let id = self.routed_id(&key);
        let session = self
            .streams
            .get_or_create(&key, || self.new_unique_stream_subsession(&id))
            .await?;
        session.dial(network, addr).await
    }

    /// Resolve `addr` and pair it with the datagram sub-session for its
    /// routing key.
    pub async fn dial_udp(&self, network: &str, addr: &str) -> SamResult<DatagramPeer> {
        let key = routing_key(network, addr)?;
        let id = self.routed_id(&key);
        let session = self
            .datagrams
            .get_or_create(&key, || async {
                self.new_datagram_subsession(&id, 0)
                    .await
                    .map(Arc::new)
            })
            .await?;
        let remote = resolve_with(self.core.connector.as_ref(), addr).await?;
        Ok(DatagramPeer { session, remote })
    }

    /// Resolve a name over a fresh bridge connection.
    pub async fn lookup(&self, name: &str) -> SamResult<Destination> {
        lookup_with(self.core.connector.as_ref(), name).await
    }

    /// Close the primary session and with it every sub-session.
    pub async fn close(&self) {
        self.streams.clear();
        self.datagrams.clear();
        self.core.close().await;
        info!(session = %self.core.id, "primary session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SamClient;
    use crate::error::ProtocolError;
    use crate::testing::MockBridge;
    use sam_keys::test_utils::keypair_from_seed;
    use std::net::SocketAddr;

    const ADD_OK: &str = "SESSION STATUS RESULT=OK\n";

    async fn primary(bridge: &MockBridge, seed: u8) -> PrimarySession {
        let keys = keypair_from_seed([seed; 32]);
        SamClient::connect(Arc::new(bridge.connector()))
            .await
            .unwrap()
            .new_primary_session("main", &keys, &[])
            .await
            .unwrap()
    }

    #[test]
    fn test_routing_key() {
        assert_eq!(routing_key("tcp", "abcdefgh").unwrap(), "tcpabcd");
        assert_eq!(routing_key("udp6", "wxyz.i2p").unwrap(), "udp6wxyz");
        assert!(routing_key("tcp", "abc").is_err());
    }

    #[test]
    fn test_random_port_range() {
        for _ in 0..1000 {
            assert!(EPHEMERAL_PORTS.contains(&random_port()));
        }
    }

    #[tokio::test]
    async fn test_stream_subsession_variants() {
        let bridge = MockBridge::start(vec![
            ("SESSION CREATE", ADD_OK),
            ("SESSION ADD", ADD_OK),
        ])
        .await;
        let primary = primary(&bridge, 1).await;

        let plain = primary.new_stream_subsession("plain").await.unwrap();
        assert_eq!(plain.destination(), primary.destination());
        assert_eq!((plain.from_port(), plain.to_port()), (None, None));

        let ported = primary
            .new_stream_subsession_with_ports("ported", Some(80), Some(0))
            .await
            .unwrap();
        assert_eq!(ported.from_port(), Some(80));

        let unique = primary.new_unique_stream_subsession("unique").await.unwrap();
        let from = unique.from_port().unwrap();
        let to = unique.to_port().unwrap();

        let adds = bridge.commands_starting_with("SESSION ADD");
        assert_eq!(
            adds,
            vec![
                "SESSION ADD STYLE=STREAM ID=plain ".to_string(),
                "SESSION ADD STYLE=STREAM ID=ported FROM_PORT=80 ".to_string(),
                format!("SESSION ADD STYLE=STREAM ID=unique FROM_PORT={} TO_PORT={} ", from, to),
            ]
        );
        assert_eq!(
            bridge.commands_starting_with("SESSION CREATE")[0],
            format!(
                "SESSION CREATE STYLE=PRIMARY ID=main DESTINATION={}",
                primary.keys().combined()
            )
        );
    }

    #[tokio::test]
    async fn test_subsession_close_keeps_primary() {
        let bridge = MockBridge::start(vec![
            ("SESSION CREATE", ADD_OK),
            ("SESSION ADD", ADD_OK),
        ])
        .await;
        let primary = primary(&bridge, 2).await;
        let sub = primary.new_stream_subsession("sub").await.unwrap();
        sub.close().await;

        primary.new_stream_subsession("again").await.unwrap();
        assert_eq!(bridge.closed(), 0);

        primary.close().await;
        bridge.wait_closed(1).await;
    }

    #[tokio::test]
    async fn test_rejected_add_closes_primary_channel() {
        let bridge = MockBridge::start(vec![
            ("SESSION CREATE", ADD_OK),
            ("SESSION ADD", "SESSION STATUS RESULT=DUPLICATED_ID\n"),
        ])
        .await;
        let primary = primary(&bridge, 3).await;
        let err = primary.new_stream_subsession("dup").await.unwrap_err();
        assert_eq!(err.protocol(), Some(&ProtocolError::DuplicateId));
        bridge.wait_closed(1).await;
    }

    #[tokio::test]
    async fn test_datagram_subsession_registers_udp_port() {
        let bridge = MockBridge::start(vec![
            ("SESSION CREATE", ADD_OK),
            ("SESSION ADD", ADD_OK),
        ])
        .await;
        let primary = primary(&bridge, 4).await;

        let datagrams = primary.new_datagram_subsession("dg", 0).await.unwrap();
        let local_port = datagrams.socket().local_addr().unwrap().port();
        assert_eq!(datagrams.style(), SessionStyle::Datagram);
        assert_eq!(
            datagrams.bridge_udp_addr(),
            SocketAddr::new(bridge.addr().ip(), 7655)
        );

        let raw = primary.new_raw_subsession("raw", 9000).await.unwrap();
        let raw_port = raw.socket().local_addr().unwrap().port();
        assert_eq!(raw.bridge_udp_addr().port(), 9000);

        assert_eq!(
            bridge.commands_starting_with("SESSION ADD"),
            vec![
                format!("SESSION ADD STYLE=DATAGRAM ID=dg PORT={}", local_port),
                format!("SESSION ADD STYLE=RAW ID=raw PORT={}", raw_port),
            ]
        );

        datagrams.close().await;
        primary.new_stream_subsession("after").await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_port_out_of_range() {
        let bridge = MockBridge::start(vec![("SESSION CREATE", ADD_OK)]).await;
        let primary = primary(&bridge, 5).await;
        let err = primary.new_datagram_subsession("dg", 70000).await.unwrap_err();
        assert!(matches!(err, SamError::Config(_)));
        assert!(bridge.commands_starting_with("SESSION ADD").is_empty());
    }

    #[tokio::test]
    async fn test_dial_rejects_unknown_network() {
        let bridge = MockBridge::start(vec![("SESSION CREATE", ADD_OK)]).await;
        let primary = primary(&bridge, 6).await;
        let target = keypair_from_seed([7u8; 32]);
        let err = primary
            .dial("unix", target.destination().to_base64())
            .await
            .unwrap_err();
        assert!(matches!(err, SamError::Config(_)));
    }

    #[tokio::test]
    async fn test_dial_tcp_reuses_subsession() {
        let bridge = MockBridge::builder()
            .reply("SESSION CREATE", ADD_OK)
            .reply("SESSION ADD", ADD_OK)
            .stream_reply("STREAM CONNECT", "STREAM STATUS RESULT=OK\n")
            .start()
            .await;
        let primary = primary(&bridge, 8).await;
        let target = keypair_from_seed([9u8; 32]);
        let addr = target.destination().to_base64();

        let first = primary.dial_tcp("tcp", addr).await.unwrap();
        let second = primary.dial("tcp", addr).await.unwrap();
        assert!(matches!(second, Connection::Stream(_)));
        assert_eq!(first.remote(), target.destination());
        assert_eq!(first.local(), primary.destination());
        assert_eq!(primary.routed_streams(), 1);

        let key = routing_key("tcp", addr).unwrap();
        let adds = bridge.commands_starting_with("SESSION ADD");
        assert_eq!(adds.len(), 1);
        assert!(adds[0].starts_with(&format!("SESSION ADD STYLE=STREAM ID=main.{} FROM_PORT=", key)));
        assert_eq!(
            bridge.commands_starting_with("STREAM CONNECT"),
            vec![format!("STREAM CONNECT ID=main.{} DESTINATION={} SILENT=false", key, addr); 2]
        );
    }

    #[tokio::test]
    async fn test_concurrent_dials_share_one_subsession() {
        let bridge = MockBridge::builder()
            .reply("SESSION CREATE", ADD_OK)
            .reply("SESSION ADD", ADD_OK)
            .stream_reply("STREAM CONNECT", "STREAM STATUS RESULT=OK\n")
            .start()
            .await;
        let primary = Arc::new(primary(&bridge, 10).await);
        let first = keypair_from_seed([11u8; 32]);
        let second = keypair_from_seed([12u8; 32]);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let primary = primary.clone();
            let addr = if i % 2 == 0 {
                first.destination().to_base64().to_string()
            } else {
                second.destination().to_base64().to_string()
            };
            tasks.push(tokio::spawn(async move {
                primary.dial_tcp("tcp", &addr).await.map(|_| ())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let distinct_keys = [first.destination(), second.destination()]
            .iter()
            .map(|d| routing_key("tcp", d.to_base64()).unwrap())
            .collect::<std::collections::HashSet<_>>()
            .len();
        assert_eq!(primary.routed_streams(), distinct_keys);
        assert_eq!(
            bridge.commands_starting_with("SESSION ADD").len(),
            distinct_keys
        );
        assert_eq!(bridge.commands_starting_with("STREAM CONNECT").len(), 8);
    }

    #[tokio::test]
    async fn test_failed_creation_is_not_cached() {
        let bridge = MockBridge::builder()
            .reply("SESSION CREATE", ADD_OK)
            .reply_once("SESSION ADD", "SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"busy\"\n")
            .start()
            .await;
        let primary = primary(&bridge, 13).await;
        let target = keypair_from_seed([14u8; 32]);

        let err = primary
            .dial_tcp("tcp", target.destination().to_base64())
            .await
            .unwrap_err();
        assert_eq!(
            err.protocol(),
            Some(&ProtocolError::I2pError("busy".to_string()))
        );
        assert_eq!(primary.routed_streams(), 0);

        let retry = primary
            .dial_tcp("tcp", target.destination().to_base64())
            .await
            .unwrap_err();
        assert!(matches!(retry, SamError::ConnectionClosed));
        assert_eq!(primary.routed_streams(), 0);
        assert_eq!(bridge.commands_starting_with("SESSION ADD").len(), 1);
    }

    #[tokio::test]
    async fn test_dial_udp_caches_datagram_subsession() {
        let bridge = MockBridge::start(vec![
            ("SESSION CREATE", ADD_OK),
            ("SESSION ADD", ADD_OK),
        ])
        .await;
        let primary = primary(&bridge, 15).await;
        let target = keypair_from_seed([16u8; 32]);
        let addr = target.destination().to_base64();

        let Connection::Datagram(peer) = primary.dial("udp", addr).await.unwrap() else {
            panic!("expected a datagram peer");
        };
        assert_eq!(&peer.remote, target.destination());
        assert_eq!(peer.session.style(), SessionStyle::Datagram);

        let again = primary.dial_udp("udp", addr).await.unwrap();
        assert!(Arc::ptr_eq(&peer.session, &again.session));
        assert_eq!(primary.routed_datagrams(), 1);
        assert_eq!(bridge.commands_starting_with("SESSION ADD").len(), 1);
    }
}
