// Copyright (c) 2024 Botho Foundation

//! Console tracing setup.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the application. [`init_tracing`] is a convenience for binaries and tests.
//!
//! ```toml
//! [telemetry]
//! filter = "sam=debug,info"
//! with_target = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directives, in `EnvFilter` syntax. `RUST_LOG` overrides this
    /// when set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Include event targets (module paths) in output.
    #[serde(default)]
    pub with_target: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            with_target: false,
        }
    }
}

impl TelemetryConfig {
    /// Debug-level output for this crate, info for everything else.
    pub fn verbose() -> Self {
        Self {
            filter: "sam=debug,info".to_string(),
            with_target: true,
        }
    }

    fn configured_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.filter)
            .with_context(|| format!("Invalid tracing filter {:?}", self.filter))
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.configured_filter(),
        }
    }
}

/// Install a console subscriber.
///
/// Returns `false` if a global subscriber was already installed, so this is
/// safe to call from several tests.
pub fn init_tracing(config: &TelemetryConfig) -> Result<bool> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_filter(config.env_filter()?);

    Ok(tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok())
}
