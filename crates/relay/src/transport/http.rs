// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the inspection API.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::RelayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub player_count: usize,
    pub streamer_count: usize,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    let relay = s.relay.lock().await;
    Json(HealthResponse {
        status: "running".to_owned(),
        player_count: relay.player_count(),
        streamer_count: relay.streamer_count(),
    })
}

/// `GET /api/v1/players` — snapshot of all connected players.
pub async fn list_players(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    let relay = s.relay.lock().await;
    Json(relay.player_snapshots())
}

/// `GET /api/v1/streamers` — snapshot of all registered streamers.
pub async fn list_streamers(State(s): State<Arc<RelayState>>) -> impl IntoResponse {
    let relay = s.relay.lock().await;
    Json(relay.streamer_snapshots())
}
