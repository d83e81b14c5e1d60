// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streamer WebSocket handler.
//!
//! A streamer is not registered until it answers the relay's
//! `identify` request with an `endpointId` declaration. An id conflict
//! rejects the registration and drops the connection; the existing
//! streamer is unaffected. On close, the registry removal and the
//! disconnect cascade to subscribed players happen in one step under
//! the relay lock.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::protocol::{message_type, OutboundMessage, StreamerControl};
use crate::registry::StreamerKey;
use crate::relay::encode;
use crate::RelayState;

/// `GET /ws/streamer` — WebSocket upgrade for a streamer endpoint.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_streamer(state, socket, addr.to_string()))
}

/// Per-connection event loop.
async fn handle_streamer(state: Arc<RelayState>, socket: WebSocket, remote_addr: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let cancel = state.shutdown.child_token();

    // Ask the endpoint to declare its id before anything is routed.
    if let Some(frame) = encode(&OutboundMessage::Identify {}) {
        if tx.send(frame).is_err() {
            return;
        }
    }

    let mut key: Option<StreamerKey> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

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

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match key {
                            Some(k) => state.relay.lock().await.handle_streamer_message(k, &text),
                            None => {
                                match identify(&state, &text, &tx, &cancel, &remote_addr).await {
                                    IdentifyOutcome::Registered(k) => key = Some(k),
                                    IdentifyOutcome::Pending => {}
                                    IdentifyOutcome::Rejected => break,
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::warn!(code = %RelayError::Transport, streamer_key = ?key, %err, "streamer transport error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(k) = key {
        state.relay.lock().await.remove_streamer(k);
    }
    let _ = ws_tx.close().await;
}

enum IdentifyOutcome {
    Registered(StreamerKey),
    Pending,
    Rejected,
}

/// Handle a frame from a streamer that has not yet declared its id.
/// Only `endpointId` and `ping` are meaningful here; everything else
/// is a protocol error and is dropped.
async fn identify(
    state: &Arc<RelayState>,
    text: &str,
    tx: &mpsc::UnboundedSender<String>,
    cancel: &tokio_util::sync::CancellationToken,
    remote_addr: &str,
) -> IdentifyOutcome {
    let msg: serde_json::Value = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(err) => {
            tracing::warn!(code = %RelayError::Protocol, %err, "unparseable message from unidentified streamer, dropping");
            return IdentifyOutcome::Pending;
        }
    };

    match message_type(&msg) {
        Some("endpointId") => match serde_json::from_value::<StreamerControl>(msg) {
            Ok(StreamerControl::EndpointId { id }) => {
                let registered = state.relay.lock().await.register_streamer(
                    &id,
                    tx.clone(),
                    cancel.clone(),
                    Some(remote_addr.to_owned()),
                );
                match registered {
                    Ok(k) => IdentifyOutcome::Registered(k),
                    Err(_) => IdentifyOutcome::Rejected,
                }
            }
            _ => {
                tracing::warn!(code = %RelayError::Protocol, "malformed endpointId, dropping");
                IdentifyOutcome::Pending
            }
        },
        Some("ping") => {
            if let Ok(StreamerControl::Ping { time }) = serde_json::from_value(msg) {
                if let Some(frame) = encode(&OutboundMessage::Pong { time }) {
                    let _ = tx.send(frame);
                }
            }
            IdentifyOutcome::Pending
        }
        other => {
            tracing::warn!(code = %RelayError::Protocol, msg_type = ?other, "message before identification, dropping");
            IdentifyOutcome::Pending
        }
    }
}
