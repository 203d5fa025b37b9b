// Copyright (c) 2024 Botho Foundation
//
//! Shared setup for the bridge integration tests.

#![allow(dead_code)]

use sam::telemetry::{init_tracing, TelemetryConfig};
use sam::testing::MockBridge;
use sam::{KeyPair, SamClient, TcpBridge};
use sam_keys::test_utils::keypair_from_seed;
use std::sync::Arc;

pub const SESSION_OK: &str = "SESSION STATUS RESULT=OK\n";
pub const STREAM_OK: &str = "STREAM STATUS RESULT=OK\n";

/// Install a test subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = init_tracing(&TelemetryConfig::default());
}

/// Keys with a recognisable first byte.
pub fn test_keys(seed: u8) -> KeyPair {
    keypair_from_seed([seed; 32])
}

/// The two-line `STREAM ACCEPT` answer announcing `origin` as the caller.
pub fn accept_reply(origin: &str, from_port: u16, to_port: u16) -> String {
    format!(
        "{}{} FROM_PORT={} TO_PORT={}\n",
        STREAM_OK, origin, from_port, to_port
    )
}

/// A bridge accepting sessions, connects and accepts from `origin`.
pub async fn streaming_bridge(origin: &str) -> MockBridge {
    MockBridge::builder()
        .reply("SESSION CREATE", SESSION_OK)
        .reply("SESSION ADD", SESSION_OK)
        .stream_reply("STREAM CONNECT", STREAM_OK)
        .stream_reply("STREAM ACCEPT", &accept_reply(origin, 1234, 0))
        .start()
        .await
}

pub fn connector(bridge: &MockBridge) -> Arc<TcpBridge> {
    Arc::new(bridge.connector())
}

pub async fn client(bridge: &MockBridge) -> SamClient {
    SamClient::connect(connector(bridge))
        .await
        .expect("connect to mock bridge")
}
