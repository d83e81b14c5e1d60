// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message model for the signalling protocol.
//!
//! Messages are JSON objects tagged with a `type` field. Messages the
//! relay builds itself are typed enums; messages it merely routes
//! (offers, answers, ICE candidates, ...) stay as raw
//! [`serde_json::Value`] — the relay treats their payloads as opaque
//! apart from the `playerId` field it stamps or strips in transit.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types a player may send that are forwarded to its
/// subscribed streamer rather than handled by the relay.
pub const PLAYER_ROUTABLE_TYPES: [&str; 6] = [
    "offer",
    "answer",
    "iceCandidate",
    "dataChannelRequest",
    "peerDataChannelsReady",
    "layerPreference",
];

/// True if messages of this type are forwarded player -> streamer.
pub fn is_player_routable(msg_type: &str) -> bool {
    PLAYER_ROUTABLE_TYPES.contains(&msg_type)
}

// ---------------------------------------------------------------------------
// Relay -> endpoint
// ---------------------------------------------------------------------------

/// Messages originated by the relay itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Peer-connection options, sent to a player on connect.
    #[serde(rename_all = "camelCase")]
    Config { peer_connection_options: Value },
    /// Asks a freshly connected streamer to declare its id.
    Identify {},
    /// Confirms the id a streamer is registered (or stays) under.
    #[serde(rename_all = "camelCase")]
    EndpointIdConfirm { committed_id: String },
    /// Announces a new subscriber to a streamer. Routed through the
    /// same stamping path as any forwarded message.
    #[serde(rename_all = "camelCase")]
    PlayerConnected { player_id: String, data_channel: bool, sfu: bool, send_offer: bool },
    /// Announces an unsubscribing player to a streamer.
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected { player_id: String },
    /// Tells a subscribed player that its streamer changed id.
    StreamerIdChanged {
        #[serde(rename = "newID")]
        new_id: String,
    },
    /// Reply to `listStreamers`: the current registry membership.
    StreamerList { ids: Vec<String> },
    Pong { time: u64 },
}

impl OutboundMessage {
    /// Serialize to a raw JSON value, e.g. for the stamping path.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Endpoint -> relay (control messages handled by the relay)
// ---------------------------------------------------------------------------

/// Control messages from a player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerControl {
    #[serde(rename_all = "camelCase")]
    Subscribe { streamer_id: String },
    Unsubscribe {},
    ListStreamers {},
    Ping { time: u64 },
}

/// Control messages from a streamer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamerControl {
    /// Declares (first time) or renames (afterwards) the streamer id.
    EndpointId { id: String },
    /// Asks the relay to disconnect one of the streamer's players.
    #[serde(rename_all = "camelCase")]
    DisconnectPlayer {
        player_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Ping { time: u64 },
}

// ---------------------------------------------------------------------------
// Raw message helpers
// ---------------------------------------------------------------------------

/// Return the `type` discriminator of a raw message, if present.
pub fn message_type(msg: &Value) -> Option<&str> {
    msg.get("type").and_then(Value::as_str)
}

/// Inject the originating player's id. Performed exactly once per
/// forwarded message, on the player -> streamer leg.
pub fn stamp_player_id(msg: &mut Value, player_id: &str) {
    if let Some(obj) = msg.as_object_mut() {
        obj.insert("playerId".to_owned(), Value::String(player_id.to_owned()));
    }
}

/// Remove and return the target player id from a streamer message.
/// The id is routing metadata for the relay, not payload for the
/// player, so it is stripped on the streamer -> player leg.
pub fn take_player_id(msg: &mut Value) -> Option<String> {
    let obj = msg.as_object_mut()?;
    match obj.remove("playerId")? {
        Value::String(id) => Some(id),
        other => {
            obj.insert("playerId".to_owned(), other);
            None
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
