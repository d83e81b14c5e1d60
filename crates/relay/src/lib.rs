// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signalling relay for WebRTC session setup.
//!
//! Mediates session negotiation between player endpoints and streamer
//! endpoints connected over WebSockets. The relay never touches media;
//! it routes offers, answers, and ICE candidates, and maintains the
//! player -> streamer subscription relationship that determines
//! routing.

pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::relay::Relay;
use crate::transport::build_router;

/// Shared state handed to every transport handler.
///
/// The relay mutex is the single exclusive section required by the
/// routing model: every inbound transport event locks it, applies all
/// registry and subscription mutations, and queues any resulting
/// frames before the next event is processed.
pub struct RelayState {
    pub relay: Mutex<Relay>,
    pub config: RelayConfig,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let rtc_config = config.peer_connection_options()?;
        Ok(Self { relay: Mutex::new(Relay::new(rtc_config)), config, shutdown })
    }
}

/// Run the relay until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(RelayState::new(config, shutdown.clone())?);
    let router = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("signalling relay listening on {addr}");
    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
