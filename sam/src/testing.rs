// Copyright (c) 2024 Botho Foundation

//! A scripted, in-process bridge for tests.
//!
//! [`MockBridge`] listens on `127.0.0.1:0`, answers `HELLO`, and replies to
//! every later command line with the first scripted reply whose prefix
//! matches it. It records every command it receives and counts connections
//! the client has closed.
//!
//! ```ignore
//! let bridge = MockBridge::builder()
//!     .reply("SESSION CREATE", "SESSION STATUS RESULT=OK\n")
//!     .stream_reply("STREAM CONNECT", "STREAM STATUS RESULT=OK\n")
//!     .start()
//!     .await;
//! let client = SamClient::connect(Arc::new(bridge.connector())).await?;
//! ```

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::bridge::TcpBridge;
use crate::config::BridgeConfig;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    reply: String,
    remaining: Option<usize>,
    echo: bool,
}

#[derive(Debug, Default)]
struct MockState {
    hello_reply: String,
    rules: Mutex<Vec<Rule>>,
    hellos: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
    closed: AtomicUsize,
    changed: Notify,
}

impl MockState {
    /// First matching rule's reply, consuming one use of it.
    fn take_reply(&self, command: &str) -> Option<(String, bool)> {
        let mut rules = self.rules.lock();
        let index = rules.iter().position(|rule| {
            command.starts_with(&rule.prefix) && rule.remaining.map_or(true, |n| n > 0)
        })?;
        let rule = &mut rules[index];
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some((rule.reply.clone(), rule.echo))
    }
}

/// Builder for a [`MockBridge`].
#[derive(Debug)]
pub struct MockBridgeBuilder {
    hello_reply: String,
    rules: Vec<Rule>,
}

impl Default for MockBridgeBuilder {
    fn default() -> Self {
        Self {
            hello_reply: "HELLO REPLY RESULT=OK VERSION=3.3\n".to_string(),
            rules: Vec::new(),
        }
    }
}

impl MockBridgeBuilder {
    /// Reply sent to `HELLO`.
    pub fn hello_reply(mut self, reply: &str) -> Self {
        self.hello_reply = reply.to_string();
        self
    }

    /// Answer every command starting with `prefix`.
    pub fn reply(mut self, prefix: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply: reply.to_string(),
            remaining: None,
            echo: false,
        });
        self
    }

    /// Answer the next command starting with `prefix`, once.
    pub fn reply_once(mut self, prefix: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply: reply.to_string(),
            remaining: Some(1),
            echo: false,
        });
        self
    }

    /// Answer commands starting with `prefix`, then echo any further bytes on
    /// that connection back to the client.
    pub fn stream_reply(mut self, prefix: &str, reply: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply: reply.to_string(),
            remaining: None,
            echo: true,
        });
        self
    }

    /// Bind and start serving.
    pub async fn start(self) -> MockBridge {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock bridge");
        let addr = listener.local_addr().expect("mock bridge address");
        let state = Arc::new(MockState {
            hello_reply: self.hello_reply,
            rules: Mutex::new(self.rules),
            ..MockState::default()
        });

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    state.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, state.clone()));
                }
            }
        });

        MockBridge { addr, state, task }
    }
}

async fn serve(stream: TcpStream, state: Arc<MockState>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    let mut greeted = false;

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end_matches(['\r', '\n']).to_string();

        if !greeted && command.starts_with("HELLO") {
            greeted = true;
            state.hellos.lock().push(command);
            if write.write_all(state.hello_reply.as_bytes()).await.is_err() {
                break;
            }
            continue;
        }

        state.commands.lock().push(command.clone());
        state.changed.notify_waiters();

        let (reply, echo) = state.take_reply(&command).unwrap_or_else(|| {
            let topic = command.split_whitespace().next().unwrap_or("SESSION");
            (
                format!("{} STATUS RESULT=I2P_ERROR MESSAGE=\"unscripted\"\n", topic),
                false,
            )
        });
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
        if echo {
            let _ = tokio::io::copy(&mut reader, &mut write).await;
            let _ = write.shutdown().await;
            break;
        }
    }

    state.closed.fetch_add(1, Ordering::SeqCst);
    state.changed.notify_waiters();
}

/// A running scripted bridge. Stops serving when dropped.
#[derive(Debug)]
pub struct MockBridge {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockBridge {
    pub fn builder() -> MockBridgeBuilder {
        MockBridgeBuilder::default()
    }

    /// Start a bridge answering `(prefix, reply)` pairs.
    pub async fn start(replies: Vec<(&str, &str)>) -> MockBridge {
        replies
            .into_iter()
            .fold(Self::builder(), |builder, (prefix, reply)| {
                builder.reply(prefix, reply)
            })
            .start()
            .await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Config pointing at this bridge.
    pub fn config(&self) -> BridgeConfig {
        BridgeConfig::with_address(self.addr.to_string())
    }

    /// A TCP connector for this bridge.
    pub fn connector(&self) -> TcpBridge {
        TcpBridge::new(self.config())
    }

    /// `HELLO` lines received, one per greeted connection.
    pub fn hellos(&self) -> Vec<String> {
        self.state.hellos.lock().clone()
    }

    /// All non-`HELLO` command lines received, without line terminators.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().clone()
    }

    /// Commands starting with `prefix`.
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections the client has closed so far.
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` connections have been closed by the client.
    pub async fn wait_closed(&self, n: usize) {
        self.wait_until(|bridge| bridge.closed() >= n).await
    }

    /// Wait until at least `n` commands have been received.
    pub async fn wait_commands(&self, n: usize) {
        self.wait_until(|bridge| bridge.commands().len() >= n).await
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        let wait = async {
            loop {
                let changed = self.state.changed.notified();
                if condition(self) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(WAIT_LIMIT, wait)
            .await
            .expect("mock bridge condition not reached in time");
    }
}

impl Drop for MockBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
