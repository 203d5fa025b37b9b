// Copyright (c) 2024 Botho Foundation

//! Persistent keys per named slot.
//!
//! A slot is a path prefix: keys live in `<slot>.i2p.private` and the short
//! form in `<slot>.i2p.public.txt`. The first call for a slot asks the bridge
//! for keys and writes them; later calls only read the file. Concurrent first
//! calls for the same slot are not coordinated.

use sam_keys::{load_keys, store_keys, write_short_form_file, KeyPair, SignatureType};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeConnector, TcpBridge};
use crate::client::{generate_keys_on, SamClient};
use crate::config::{BridgeConfig, SidecarPolicy};
use crate::error::SamResult;
use crate::listener::StreamListener;
use crate::primary::PrimarySession;
use crate::stream::StreamSession;

/// Load the keys stored in `slot`, or generate them through `connector` and
/// store them there.
pub async fn generate_or_load<P: AsRef<Path>>(
    slot: P,
    connector: &dyn BridgeConnector,
) -> SamResult<KeyPair> {
    let slot = slot.as_ref();
    if let Some(keys) = load_keys(slot)? {
        debug!(slot = %slot.display(), destination = %keys.destination(), "loaded keys");
        return Ok(keys);
    }

    let signature_type: SignatureType = connector.config().signature_type.unwrap_or_default();
    let mut channel = connector.connect().await?;
    let generated = generate_keys_on(&mut channel, signature_type).await;
    channel.close().await;
    let keys = generated?;

    let path = store_keys(&keys, slot)?;
    info!(path = %path.display(), destination = %keys.destination(), "stored new keys");
    Ok(keys)
}

/// [`generate_or_load`] against a TCP bridge configured by `config`.
pub async fn generate<P: AsRef<Path>>(slot: P, config: BridgeConfig) -> SamResult<KeyPair> {
    generate_or_load(slot, &TcpBridge::new(config)).await
}

/// Write the short-form sidecar for `keys`, honouring `policy`.
pub fn write_sidecar<P: AsRef<Path>>(
    keys: &KeyPair,
    slot: P,
    policy: SidecarPolicy,
) -> SamResult<()> {
    match write_short_form_file(keys, slot) {
        Ok(path) => {
            debug!(path = %path.display(), "wrote short-form file");
            Ok(())
        }
        Err(e) if policy == SidecarPolicy::BestEffort => {
            warn!(error = %e, "could not write short-form file");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Open a stream session `id` on the keys stored in `slot`.
pub async fn stream_session_for_slot<P: AsRef<Path>>(
    id: &str,
    slot: P,
    connector: Arc<dyn BridgeConnector>,
    options: &[&str],
) -> SamResult<StreamSession> {
    let keys = generate_or_load(slot, connector.as_ref()).await?;
    SamClient::connect(connector)
        .await?
        .new_stream_session(id, &keys, options)
        .await
}

/// Open a primary session `id` on the keys stored in `slot`.
pub async fn primary_session_for_slot<P: AsRef<Path>>(
    id: &str,
    slot: P,
    connector: Arc<dyn BridgeConnector>,
    options: &[&str],
) -> SamResult<PrimarySession> {
    let keys = generate_or_load(slot, connector.as_ref()).await?;
    SamClient::connect(connector)
        .await?
        .new_primary_session(id, &keys, options)
        .await
}

/// Open a stream session on the keys in `slot`, write the short-form
/// sidecar next to them and return a listener for it.
pub async fn listener_for_slot<P: AsRef<Path>>(
    id: &str,
    slot: P,
    connector: Arc<dyn BridgeConnector>,
    options: &[&str],
) -> SamResult<StreamListener> {
    let slot = slot.as_ref();
    let policy = connector.config().sidecar;
    let session = stream_session_for_slot(id, slot, connector, options).await?;
    if let Err(e) = write_sidecar(session.keys(), slot, policy) {
        session.close().await;
        return Err(e);
    }

    info!(session = %id, address = %session.destination().to_base32(), "listening");
    Ok(session.listen())
}
