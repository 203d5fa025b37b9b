// Copyright (c) 2024 Botho Foundation

//! Bridge configuration.
//!
//! Configuration is plain data threaded through constructors. The
//! environment is consulted only by [`BridgeConfig::from_env`], which is
//! meant to be called once at process start.
//!
//! ```toml
//! address = "127.0.0.1:7656"
//! connect_timeout_secs = 30
//! reply_buffer_size = 4096
//! reply_framing = "single_read"
//! session_timeout_secs = 600
//! sidecar = "best_effort"
//! signature_type = "EdDSA_SHA512_Ed25519"
//! ```

use anyhow::{Context, Result};
use sam_keys::SignatureType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{SamError, SamResult};

/// Default bridge control address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7656";

/// Default bridge host when only a port is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bridge control port.
pub const DEFAULT_PORT: u16 = 7656;

/// UDP port the bridge listens on for datagram forwarding.
pub const DEFAULT_UDP_PORT: u16 = 7655;

/// How a reply is read off the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFraming {
    /// One read into a fixed buffer; the reply is whatever arrived.
    #[default]
    SingleRead,
    /// Read up to and including the next newline.
    Line,
}

/// What to do when the short-form sidecar file cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarPolicy {
    /// Log a warning and carry on.
    #[default]
    BestEffort,
    /// Fail the key operation.
    Required,
}

/// Settings for talking to a SAM bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge control address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,

    /// Timeout for opening a control connection, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Size of the buffer a single-read reply is read into.
    #[serde(default = "default_reply_buffer_size")]
    pub reply_buffer_size: usize,

    #[serde(default)]
    pub reply_framing: ReplyFraming,

    /// Default dial timeout for sessions, in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Lowest protocol version offered in `HELLO`.
    #[serde(default = "default_hello_min")]
    pub hello_min_version: String,

    /// Highest protocol version offered in `HELLO`.
    #[serde(default = "default_hello_max")]
    pub hello_max_version: String,

    #[serde(default)]
    pub sidecar: SidecarPolicy,

    /// Signature type requested for new keys and sessions.
    #[serde(default)]
    pub signature_type: Option<SignatureType>,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reply_buffer_size() -> usize {
    4096
}

fn default_session_timeout() -> u64 {
    600
}

fn default_hello_min() -> String {
    "3.1".to_string()
}

fn default_hello_max() -> String {
    "3.3".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_secs: default_connect_timeout(),
            reply_buffer_size: default_reply_buffer_size(),
            reply_framing: ReplyFraming::default(),
            session_timeout_secs: default_session_timeout(),
            hello_min_version: default_hello_min(),
            hello_max_version: default_hello_max(),
            sidecar: SidecarPolicy::default(),
            signature_type: None,
        }
    }
}

impl BridgeConfig {
    /// Create a new builder.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Config for a bridge at `address`, all else default.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Build a config from the `sam_host` / `sam_port` environment variables.
    pub fn from_env() -> Self {
        Self::from_host_port(
            std::env::var("sam_host").ok().as_deref(),
            std::env::var("sam_port").ok().as_deref(),
        )
    }

    /// Build a config from optional host and port strings; blanks fall back
    /// to the defaults.
    pub fn from_host_port(host: Option<&str>, port: Option<&str>) -> Self {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST);
        let port = port
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_PORT.to_string());
        Self::with_address(format!("{}:{}", host, port))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> SamResult<()> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| SamError::Config(format!("address {:?} has no port", self.address)))?;
        if host.is_empty() {
            return Err(SamError::Config(format!(
                "address {:?} has no host",
                self.address
            )));
        }
        port.parse::<u16>()
            .map_err(|_| SamError::Config(format!("invalid bridge port {:?}", port)))?;
        if self.reply_buffer_size == 0 {
            return Err(SamError::Config("reply_buffer_size must be non-zero".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Host part of the bridge address.
    pub fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address)
    }
}

/// Resolve the bridge UDP port for datagram and raw sub-sessions.
///
/// Zero selects [`DEFAULT_UDP_PORT`].
pub fn bridge_udp_port(port: u32) -> SamResult<u16> {
    match port {
        0 => Ok(DEFAULT_UDP_PORT),
        p => u16::try_from(p)
            .map_err(|_| SamError::Config(format!("UDP port {} is out of range", p))),
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn reply_buffer_size(mut self, size: usize) -> Self {
        self.config.reply_buffer_size = size;
        self
    }

    pub fn reply_framing(mut self, framing: ReplyFraming) -> Self {
        self.config.reply_framing = framing;
        self
    }

    pub fn session_timeout_secs(mut self, secs: u64) -> Self {
        self.config.session_timeout_secs = secs;
        self
    }

    pub fn sidecar(mut self, policy: SidecarPolicy) -> Self {
        self.config.sidecar = policy;
        self
    }

    pub fn signature_type(mut self, signature_type: SignatureType) -> Self {
        self.config.signature_type = Some(signature_type);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
