// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Player and streamer registries.
//!
//! Plain synchronous maps with no interior locking — both registries
//! are owned by [`crate::relay::Relay`], whose single mutex is the
//! exclusive section serializing every mutation and its dependent
//! notifications (see DESIGN.md).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Stable internal handle for a registered streamer. Subscriptions
/// hold this key rather than the public id string, so a rename never
/// dangles a subscription. Keys are monotonic and never reused.
pub type StreamerKey = u64;

/// A connected player endpoint.
#[derive(Debug)]
pub struct Player {
    /// Relay-generated id, unique for the process lifetime.
    pub id: String,
    /// Outbound frame channel, drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<String>,
    /// Cancelling this tears down the player's transport.
    pub cancel: CancellationToken,
    /// Whether the player asked streamers to send it an offer.
    pub send_offer: bool,
    /// Remote address, display only.
    pub remote_addr: Option<String>,
    /// Current subscription: at most one streamer at any time.
    pub subscription: Option<StreamerKey>,
}

impl Player {
    /// Queue a frame for delivery. A closed channel means the writer
    /// task already exited; the frame is dropped with the connection.
    pub fn send(&self, frame: String) {
        if self.tx.send(frame).is_err() {
            tracing::trace!(player_id = %self.id, "dropping frame for closed player channel");
        }
    }
}

/// A connected streamer endpoint.
#[derive(Debug)]
pub struct Streamer {
    pub key: StreamerKey,
    /// Self-declared public id, renameable, unique within the registry.
    pub id: String,
    pub tx: mpsc::UnboundedSender<String>,
    pub cancel: CancellationToken,
    pub remote_addr: Option<String>,
}

impl Streamer {
    pub fn send(&self, frame: String) {
        if self.tx.send(frame).is_err() {
            tracing::trace!(streamer_id = %self.id, "dropping frame for closed streamer channel");
        }
    }
}

/// Serializable player snapshot for the inspection API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub player_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed_to: Option<String>,
    pub send_offer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
}

/// Serializable streamer snapshot for the inspection API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerInfo {
    pub streamer_id: String,
    pub subscriber_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
}

// ---------------------------------------------------------------------------
// Player registry
// ---------------------------------------------------------------------------

/// Tracks all connected players and generates their ids.
#[derive(Debug)]
pub struct PlayerRegistry {
    players: HashMap<String, Player>,
    next_id: u64,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// First generated player id. Matches the upstream signalling server,
/// which starts numbering players at 100.
const FIRST_PLAYER_ID: u64 = 100;

impl PlayerRegistry {
    pub fn new() -> Self {
        Self { players: HashMap::new(), next_id: FIRST_PLAYER_ID }
    }

    /// Generate a fresh player id. Ids are never reused within a
    /// process lifetime.
    pub fn next_player_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    pub fn add(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn remove(&mut self, id: &str) -> Option<Player> {
        self.players.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.values_mut()
    }
}

// ---------------------------------------------------------------------------
// Streamer registry
// ---------------------------------------------------------------------------

/// Tracks all registered streamers, keyed by their stable internal
/// key. Key order is registration order, which defines the fallback
/// selection ("first registered still present") and the `streamerList`
/// ordering.
#[derive(Debug)]
pub struct StreamerRegistry {
    streamers: BTreeMap<StreamerKey, Streamer>,
    next_key: StreamerKey,
}

impl Default for StreamerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamerRegistry {
    pub fn new() -> Self {
        Self { streamers: BTreeMap::new(), next_key: 1 }
    }

    /// Register a streamer under its self-declared id. Fails without
    /// side effect when the id is already taken.
    pub fn add(
        &mut self,
        id: String,
        tx: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        remote_addr: Option<String>,
    ) -> Result<StreamerKey, String> {
        if self.find_key(&id).is_some() {
            return Err(id);
        }
        let key = self.next_key;
        self.next_key += 1;
        self.streamers.insert(key, Streamer { key, id, tx, cancel, remote_addr });
        Ok(key)
    }

    pub fn remove(&mut self, key: StreamerKey) -> Option<Streamer> {
        self.streamers.remove(&key)
    }

    /// Change a streamer's public id. Fails without side effect when
    /// the new id belongs to a different streamer.
    pub fn rename(&mut self, key: StreamerKey, new_id: String) -> Result<(), String> {
        match self.find_key(&new_id) {
            Some(existing) if existing != key => Err(new_id),
            _ => {
                if let Some(streamer) = self.streamers.get_mut(&key) {
                    streamer.id = new_id;
                }
                Ok(())
            }
        }
    }

    pub fn get(&self, key: StreamerKey) -> Option<&Streamer> {
        self.streamers.get(&key)
    }

    /// Look up a streamer key by public id.
    pub fn find_key(&self, id: &str) -> Option<StreamerKey> {
        self.streamers.values().find(|s| s.id == id).map(|s| s.key)
    }

    /// The first-registered streamer still present, used by the
    /// fallback-subscribe policy.
    pub fn first_key(&self) -> Option<StreamerKey> {
        self.streamers.keys().next().copied()
    }

    /// Current public ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.streamers.values().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.streamers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streamers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Streamer> {
        self.streamers.values()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
