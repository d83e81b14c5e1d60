// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay core: registries, the player subscription state machine, and
//! message routing between players and streamers.
//!
//! Every operation here runs under the relay's single mutex (see
//! [`crate::RelayState`]), so a registry mutation and the notification
//! of its dependents are one atomic step: no player can observe a
//! streamer mid-removal. Nothing in this module awaits — outbound
//! frames are pushed onto per-connection unbounded channels and
//! forced disconnects cancel the target connection's token, which its
//! own transport loop reacts to.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::protocol::{
    is_player_routable, message_type, stamp_player_id, take_player_id, OutboundMessage,
    PlayerControl, StreamerControl,
};
use crate::registry::{
    Player, PlayerInfo, PlayerRegistry, StreamerInfo, StreamerKey, StreamerRegistry,
};

/// Serialize a relay-built message to a wire frame.
pub(crate) fn encode(msg: &OutboundMessage) -> Option<String> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!(code = %RelayError::Internal, %err, "failed to encode outbound message");
            None
        }
    }
}

/// Process-wide routing state. One instance per relay process.
#[derive(Debug)]
pub struct Relay {
    players: PlayerRegistry,
    streamers: StreamerRegistry,
    /// `peerConnectionOptions` blob sent to every player on connect.
    rtc_config: Value,
}

impl Relay {
    pub fn new(rtc_config: Value) -> Self {
        Self { players: PlayerRegistry::new(), streamers: StreamerRegistry::new(), rtc_config }
    }

    // -- Player lifecycle ---------------------------------------------------

    /// Register a new player and send it the peer-connection config.
    /// Returns the relay-assigned player id.
    pub fn add_player(
        &mut self,
        tx: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        send_offer: bool,
        remote_addr: Option<String>,
    ) -> String {
        let id = self.players.next_player_id();
        let player = Player {
            id: id.clone(),
            tx,
            cancel,
            send_offer,
            remote_addr: remote_addr.clone(),
            subscription: None,
        };
        tracing::info!(player_id = %id, remote_addr = ?remote_addr, send_offer, "player connected");

        if let Some(frame) =
            encode(&OutboundMessage::Config { peer_connection_options: self.rtc_config.clone() })
        {
            player.send(frame);
        }
        self.players.add(player);
        id
    }

    /// Unwind a player: unsubscribe (notifying its streamer), then
    /// drop the registry entry. Safe to call more than once.
    pub fn remove_player(&mut self, player_id: &str) {
        self.unsubscribe(player_id);
        if self.players.remove(player_id).is_some() {
            tracing::info!(player_id, "player disconnected");
        }
    }

    /// Dispatch one inbound player frame.
    pub fn handle_player_message(&mut self, player_id: &str, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(code = %RelayError::Protocol, player_id, %err, "unparseable player message, dropping");
                return;
            }
        };
        let Some(msg_type) = message_type(&msg).map(str::to_owned) else {
            tracing::warn!(code = %RelayError::Protocol, player_id, "player message without type, dropping");
            return;
        };

        if is_player_routable(&msg_type) {
            self.forward_to_streamer(player_id, msg);
            return;
        }

        match serde_json::from_value::<PlayerControl>(msg) {
            Ok(PlayerControl::Subscribe { streamer_id }) => self.subscribe(player_id, &streamer_id),
            Ok(PlayerControl::Unsubscribe {}) => self.unsubscribe(player_id),
            Ok(PlayerControl::ListStreamers {}) => self.send_streamer_list(player_id),
            Ok(PlayerControl::Ping { time }) => {
                self.send_to_player(player_id, &OutboundMessage::Pong { time });
            }
            Err(err) => {
                tracing::warn!(code = %RelayError::Protocol, player_id, msg_type = %msg_type, %err, "unhandled player message, dropping");
            }
        }
    }

    // -- Subscription state machine -----------------------------------------

    /// Subscribe a player to a streamer by public id. Unknown id is a
    /// routing error with no state change; an existing subscription is
    /// replaced (resubscribe).
    pub fn subscribe(&mut self, player_id: &str, streamer_id: &str) {
        let Some(key) = self.streamers.find_key(streamer_id) else {
            tracing::warn!(code = %RelayError::Routing, player_id, streamer_id, "subscribe to unknown streamer");
            return;
        };
        self.subscribe_key(player_id, key);
    }

    fn subscribe_key(&mut self, player_id: &str, key: StreamerKey) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        let existing = player.subscription;
        if let Some(old) = existing {
            let old_id = self.streamers.get(old).map(|s| s.id.clone()).unwrap_or_default();
            tracing::warn!(player_id, streamer_id = %old_id, "resubscribing an already subscribed player");
            self.unsubscribe(player_id);
        }

        let (id, send_offer) = match self.players.get_mut(player_id) {
            Some(p) => {
                p.subscription = Some(key);
                (p.id.clone(), p.send_offer)
            }
            None => return,
        };
        let streamer_id = self.streamers.get(key).map(|s| s.id.clone()).unwrap_or_default();
        tracing::info!(player_id, streamer_id = %streamer_id, "subscribed");

        let connected = OutboundMessage::PlayerConnected {
            player_id: id,
            data_channel: true,
            sfu: false,
            send_offer,
        };
        match connected.to_value() {
            Ok(msg) => self.stamp_and_send(player_id, key, msg),
            Err(err) => {
                tracing::error!(code = %RelayError::Internal, %err, "failed to encode playerConnected")
            }
        }
    }

    /// Drop the player's subscription, announcing the departure to the
    /// streamer. No-op when already unsubscribed, so repeated calls
    /// produce exactly one `playerDisconnected`.
    pub fn unsubscribe(&mut self, player_id: &str) {
        let Some(key) = self.players.get_mut(player_id).and_then(|p| p.subscription.take()) else {
            return;
        };
        let streamer_id = self.streamers.get(key).map(|s| s.id.clone()).unwrap_or_default();
        tracing::info!(player_id, streamer_id = %streamer_id, "unsubscribed");

        let disconnected = OutboundMessage::PlayerDisconnected { player_id: player_id.to_owned() };
        match disconnected.to_value() {
            Ok(msg) => self.stamp_and_send(player_id, key, msg),
            Err(err) => {
                tracing::error!(code = %RelayError::Internal, %err, "failed to encode playerDisconnected")
            }
        }
    }

    /// Forward a routable player message to its subscribed streamer,
    /// establishing the fallback subscription first when needed.
    fn forward_to_streamer(&mut self, player_id: &str, msg: Value) {
        let subscription = self.players.get(player_id).and_then(|p| p.subscription);
        let key = match subscription {
            Some(key) => key,
            None => {
                tracing::warn!(player_id, "routable message from unsubscribed player");
                let Some(key) = self.streamers.first_key() else {
                    tracing::warn!(code = %RelayError::Routing, player_id, "no streamer available for fallback subscribe, disconnecting player");
                    self.disconnect_player(player_id);
                    return;
                };
                tracing::warn!(player_id, "fallback subscribing to first streamer");
                self.subscribe_key(player_id, key);
                key
            }
        };
        self.stamp_and_send(player_id, key, msg);
    }

    /// Stamp the originating player id and deliver to the streamer.
    fn stamp_and_send(&self, player_id: &str, key: StreamerKey, mut msg: Value) {
        stamp_player_id(&mut msg, player_id);
        let Some(streamer) = self.streamers.get(key) else {
            tracing::warn!(code = %RelayError::Routing, player_id, "subscribed streamer vanished, dropping message");
            return;
        };
        tracing::debug!(player_id, streamer_id = %streamer.id, msg_type = message_type(&msg).unwrap_or(""), "player -> streamer");
        match serde_json::to_string(&msg) {
            Ok(frame) => streamer.send(frame),
            Err(err) => {
                tracing::error!(code = %RelayError::Internal, %err, "failed to encode forwarded message")
            }
        }
    }

    fn send_streamer_list(&self, player_id: &str) {
        let ids = self.streamers.ids();
        self.send_to_player(player_id, &OutboundMessage::StreamerList { ids });
    }

    fn send_to_player(&self, player_id: &str, msg: &OutboundMessage) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        if let Some(frame) = encode(msg) {
            player.send(frame);
        }
    }

    /// Cancel a player's transport. The connection loop then runs the
    /// ordinary close path (`remove_player`).
    fn disconnect_player(&mut self, player_id: &str) {
        if let Some(player) = self.players.get(player_id) {
            player.cancel.cancel();
        }
    }

    // -- Streamer lifecycle -------------------------------------------------

    /// Register a streamer under its self-declared id, confirming with
    /// `endpointIdConfirm`. An id conflict rejects the registration;
    /// the caller is expected to drop the connection.
    pub fn register_streamer(
        &mut self,
        id: &str,
        tx: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        remote_addr: Option<String>,
    ) -> Result<StreamerKey, RelayError> {
        match self.streamers.add(id.to_owned(), tx, cancel, remote_addr.clone()) {
            Ok(key) => {
                tracing::info!(streamer_id = %id, remote_addr = ?remote_addr, "streamer registered");
                self.confirm_endpoint_id(key);
                Ok(key)
            }
            Err(taken) => {
                tracing::warn!(code = %RelayError::IdentityConflict, streamer_id = %taken, "streamer id already registered, rejecting");
                Err(RelayError::IdentityConflict)
            }
        }
    }

    /// Remove a streamer and cascade: every subscribed player loses
    /// its subscription and is disconnected, atomically with the
    /// registry mutation.
    pub fn remove_streamer(&mut self, key: StreamerKey) {
        let Some(streamer) = self.streamers.remove(key) else {
            return;
        };

        let mut dropped = 0usize;
        for player in self.players.iter_mut() {
            if player.subscription == Some(key) {
                // The streamer is gone; there is no one left to send
                // playerDisconnected to. Clear locally and tear the
                // player down rather than leaving it orphaned.
                player.subscription = None;
                player.cancel.cancel();
                dropped += 1;
            }
        }
        tracing::info!(streamer_id = %streamer.id, subscribers = dropped, "streamer disconnected");
    }

    /// Dispatch one inbound frame from a registered streamer.
    pub fn handle_streamer_message(&mut self, key: StreamerKey, text: &str) {
        let streamer_id = match self.streamers.get(key) {
            Some(s) => s.id.clone(),
            None => return,
        };
        let mut msg: Value = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(code = %RelayError::Protocol, streamer_id = %streamer_id, %err, "unparseable streamer message, dropping");
                return;
            }
        };
        let Some(msg_type) = message_type(&msg).map(str::to_owned) else {
            tracing::warn!(code = %RelayError::Protocol, streamer_id = %streamer_id, "streamer message without type, dropping");
            return;
        };

        match msg_type.as_str() {
            "endpointId" | "disconnectPlayer" | "ping" => {
                match serde_json::from_value::<StreamerControl>(msg) {
                    Ok(StreamerControl::EndpointId { id }) => self.rename_streamer(key, &id),
                    Ok(StreamerControl::DisconnectPlayer { player_id, reason }) => {
                        tracing::info!(streamer_id = %streamer_id, player_id = %player_id, reason = ?reason, "streamer requested player disconnect");
                        self.disconnect_player(&player_id);
                    }
                    Ok(StreamerControl::Ping { time }) => {
                        self.send_to_streamer(key, &OutboundMessage::Pong { time });
                    }
                    Err(err) => {
                        tracing::warn!(code = %RelayError::Protocol, streamer_id = %streamer_id, msg_type = %msg_type, %err, "malformed streamer control message, dropping");
                    }
                }
            }
            _ => {
                // Anything else must carry the target player's id.
                match take_player_id(&mut msg) {
                    Some(player_id) => self.forward_to_player(&streamer_id, &player_id, msg),
                    None => {
                        tracing::warn!(code = %RelayError::Protocol, streamer_id = %streamer_id, msg_type = %msg_type, "streamer message without playerId, dropping");
                    }
                }
            }
        }
    }

    /// Rename a registered streamer. Subscribed players are told the
    /// new id; their subscriptions (held by key) are unaffected. A
    /// taken id is rejected and the current id re-confirmed.
    fn rename_streamer(&mut self, key: StreamerKey, new_id: &str) {
        match self.streamers.rename(key, new_id.to_owned()) {
            Ok(()) => {
                tracing::info!(streamer_id = %new_id, "streamer renamed");
                self.confirm_endpoint_id(key);
                let Some(frame) =
                    encode(&OutboundMessage::StreamerIdChanged { new_id: new_id.to_owned() })
                else {
                    return;
                };
                for player in self.players.iter() {
                    if player.subscription == Some(key) {
                        tracing::debug!(player_id = %player.id, new_id, "notifying subscriber of rename");
                        player.send(frame.clone());
                    }
                }
            }
            Err(taken) => {
                tracing::warn!(code = %RelayError::IdentityConflict, streamer_id = %taken, "rename to taken id rejected");
                self.confirm_endpoint_id(key);
            }
        }
    }

    fn confirm_endpoint_id(&self, key: StreamerKey) {
        let Some(streamer) = self.streamers.get(key) else {
            return;
        };
        if let Some(frame) =
            encode(&OutboundMessage::EndpointIdConfirm { committed_id: streamer.id.clone() })
        {
            streamer.send(frame);
        }
    }

    fn send_to_streamer(&self, key: StreamerKey, msg: &OutboundMessage) {
        let Some(streamer) = self.streamers.get(key) else {
            return;
        };
        if let Some(frame) = encode(msg) {
            streamer.send(frame);
        }
    }

    /// Deliver a streamer message to its target player. The streamer's
    /// client addressed the player itself; a missing target is a
    /// reportable, non-fatal routing error.
    fn forward_to_player(&self, streamer_id: &str, player_id: &str, msg: Value) {
        let Some(player) = self.players.get(player_id) else {
            tracing::warn!(code = %RelayError::Routing, streamer_id, player_id, "message for unknown player, dropping");
            return;
        };
        tracing::debug!(streamer_id, player_id, msg_type = message_type(&msg).unwrap_or(""), "streamer -> player");
        match serde_json::to_string(&msg) {
            Ok(frame) => player.send(frame),
            Err(err) => {
                tracing::error!(code = %RelayError::Internal, %err, "failed to encode forwarded message")
            }
        }
    }

    // -- Inspection ---------------------------------------------------------

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn streamer_count(&self) -> usize {
        self.streamers.len()
    }

    /// Read-only player snapshots for the inspection API.
    pub fn player_snapshots(&self) -> Vec<PlayerInfo> {
        let mut infos: Vec<PlayerInfo> = self
            .players
            .iter()
            .map(|p| PlayerInfo {
                player_id: p.id.clone(),
                subscribed_to: p
                    .subscription
                    .and_then(|key| self.streamers.get(key))
                    .map(|s| s.id.clone()),
                send_offer: p.send_offer,
                remote_address: p.remote_addr.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        infos
    }

    /// Read-only streamer snapshots for the inspection API.
    pub fn streamer_snapshots(&self) -> Vec<StreamerInfo> {
        self.streamers
            .iter()
            .map(|s| StreamerInfo {
                streamer_id: s.id.clone(),
                subscriber_count: self
                    .players
                    .iter()
                    .filter(|p| p.subscription == Some(s.key))
                    .count(),
                remote_address: s.remote_addr.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn subscription_of(&self, player_id: &str) -> Option<StreamerKey> {
        self.players.get(player_id).and_then(|p| p.subscription)
    }

    #[cfg(test)]
    pub(crate) fn streamer(&self, key: StreamerKey) -> Option<&crate::registry::Streamer> {
        self.streamers.get(key)
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
