// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the signalling relay.

pub mod http;
pub mod player_ws;
pub mod streamer_ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::RelayState;

/// Build the axum `Router` with all relay routes.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        // Inspection (read-only registry snapshots)
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/players", get(http::list_players))
        .route("/api/v1/streamers", get(http::list_streamers))
        // Endpoint role is decided by the route taken at handshake.
        .route("/ws/player", get(player_ws::ws_handler))
        .route("/ws/streamer", get(streamer_ws::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
