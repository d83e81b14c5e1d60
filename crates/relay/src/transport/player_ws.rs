// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Player WebSocket handler.
//!
//! Each connection owns an unbounded outbound channel drained by this
//! loop; the relay core pushes frames onto it without ever awaiting.
//! Teardown runs through `remove_player` on every exit path and is
//! idempotent against repeated close signals.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::RelayState;

/// Query parameters for the player WebSocket upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerWsQuery {
    /// Whether the player wants streamers to send it the offer.
    #[serde(default = "default_send_offer", rename = "sendOffer")]
    pub send_offer: bool,
}

fn default_send_offer() -> bool {
    true
}

/// `GET /ws/player` — WebSocket upgrade for a player endpoint.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<PlayerWsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let send_offer = query.send_offer;
    ws.on_upgrade(move |socket| handle_player(state, socket, send_offer, addr.to_string()))
}

/// Per-connection event loop.
async fn handle_player(
    state: Arc<RelayState>,
    socket: WebSocket,
    send_offer: bool,
    remote_addr: String,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let cancel = state.shutdown.child_token();

    let player_id = state
        .relay
        .lock()
        .await
        .add_player(tx, cancel.clone(), send_offer, Some(remote_addr));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // Frames queued by the relay core.
            frame = rx.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Inbound messages from the player.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.relay.lock().await.handle_player_message(&player_id, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::warn!(code = %RelayError::Transport, player_id = %player_id, %err, "player transport error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.relay.lock().await.remove_player(&player_id);
    let _ = ws_tx.close().await;
}
