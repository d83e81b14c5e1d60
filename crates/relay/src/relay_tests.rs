// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit tests for the relay core. Unbounded channels stand in for the
//! WebSocket transports; frames are drained synchronously.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::registry::StreamerKey;

struct TestPlayer {
    id: String,
    rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl TestPlayer {
    fn drain(&mut self) -> Vec<Value> {
        drain(&mut self.rx)
    }
}

struct TestStreamer {
    key: StreamerKey,
    rx: mpsc::UnboundedReceiver<String>,
    #[allow(dead_code)]
    cancel: CancellationToken,
}

impl TestStreamer {
    fn drain(&mut self) -> Vec<Value> {
        drain(&mut self.rx)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(serde_json::from_str(&text).expect("valid json frame"));
    }
    frames
}

fn relay() -> Relay {
    Relay::new(json!({}))
}

fn connect_player(relay: &mut Relay) -> TestPlayer {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let id = relay.add_player(tx, cancel.clone(), true, None);
    let mut player = TestPlayer { id, rx, cancel };
    let greeting = player.drain();
    assert_eq!(greeting.len(), 1);
    assert_eq!(greeting[0]["type"], "config");
    player
}

fn connect_streamer(relay: &mut Relay, id: &str) -> TestStreamer {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let key = relay.register_streamer(id, tx, cancel.clone(), None).expect("register streamer");
    let mut streamer = TestStreamer { key, rx, cancel };
    let confirm = streamer.drain();
    assert_eq!(confirm.len(), 1);
    assert_eq!(confirm[0]["type"], "endpointIdConfirm");
    assert_eq!(confirm[0]["committedId"], id);
    streamer
}

fn types(frames: &[Value]) -> Vec<&str> {
    frames.iter().filter_map(|f| f["type"].as_str()).collect()
}

// -- Subscription state machine ----------------------------------------------

#[test]
fn subscribe_announces_player_to_streamer() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);

    let frames = streamer.drain();
    assert_eq!(types(&frames), vec!["playerConnected"]);
    assert_eq!(frames[0]["playerId"], player.id);
    assert_eq!(frames[0]["dataChannel"], true);
    assert_eq!(frames[0]["sfu"], false);
    assert_eq!(frames[0]["sendOffer"], true);
    assert_eq!(relay.subscription_of(&player.id), Some(streamer.key));
}

#[test]
fn at_most_one_subscription_across_resubscribes() {
    let mut relay = relay();
    let mut first = connect_streamer(&mut relay, "a");
    let mut second = connect_streamer(&mut relay, "b");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"a"}"#);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"b"}"#);

    // The old streamer saw the player come and go.
    assert_eq!(types(&first.drain()), vec!["playerConnected", "playerDisconnected"]);
    assert_eq!(types(&second.drain()), vec!["playerConnected"]);
    assert_eq!(relay.subscription_of(&player.id), Some(second.key));
}

#[test]
fn subscribe_to_unknown_streamer_changes_nothing() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let mut player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"ghost"}"#);

    assert_eq!(relay.subscription_of(&player.id), None);
    assert!(streamer.drain().is_empty());
    assert!(player.drain().is_empty());
}

#[test]
fn double_unsubscribe_sends_one_player_disconnected() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    relay.handle_player_message(&player.id, r#"{"type":"unsubscribe"}"#);
    relay.handle_player_message(&player.id, r#"{"type":"unsubscribe"}"#);

    assert_eq!(types(&streamer.drain()), vec!["playerConnected", "playerDisconnected"]);
    assert_eq!(relay.subscription_of(&player.id), None);
}

#[test]
fn player_close_unwinds_subscription() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    relay.remove_player(&player.id);
    relay.remove_player(&player.id); // repeated close signal

    assert_eq!(types(&streamer.drain()), vec!["playerConnected", "playerDisconnected"]);
    assert_eq!(relay.player_count(), 0);
}

// -- Forwarding and fallback --------------------------------------------------

#[test]
fn forward_stamps_origin_player_id() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    streamer.drain();

    relay.handle_player_message(&player.id, r#"{"type":"answer","sdp":"v=0"}"#);

    let frames = streamer.drain();
    assert_eq!(types(&frames), vec!["answer"]);
    assert_eq!(frames[0]["playerId"], player.id);
    assert_eq!(frames[0]["sdp"], "v=0");
}

#[test]
fn offer_while_unsubscribed_falls_back_to_first_streamer() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"offer","sdp":"v=0"}"#);

    // playerConnected must arrive before the forwarded offer.
    let frames = streamer.drain();
    assert_eq!(types(&frames), vec!["playerConnected", "offer"]);
    assert_eq!(frames[1]["playerId"], player.id);
    assert_eq!(relay.subscription_of(&player.id), Some(streamer.key));
}

#[test]
fn fallback_picks_first_registered_streamer() {
    let mut relay = relay();
    let mut first = connect_streamer(&mut relay, "a");
    let mut second = connect_streamer(&mut relay, "b");
    let player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"iceCandidate","candidate":"c"}"#);

    assert_eq!(types(&first.drain()), vec!["playerConnected", "iceCandidate"]);
    assert!(second.drain().is_empty());
}

#[test]
fn routable_with_no_streamers_disconnects_player() {
    let mut relay = relay();
    let mut player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"offer","sdp":"v=0"}"#);

    assert!(player.cancel.is_cancelled());
    assert_eq!(relay.subscription_of(&player.id), None);
    assert!(player.drain().is_empty());
}

// -- Streamer cascades --------------------------------------------------------

#[test]
fn streamer_removal_disconnects_exactly_its_subscribers() {
    let mut relay = relay();
    let doomed = connect_streamer(&mut relay, "doomed");
    let _other = connect_streamer(&mut relay, "other");

    let subscribed: Vec<TestPlayer> = (0..3)
        .map(|_| {
            let p = connect_player(&mut relay);
            relay.handle_player_message(&p.id, r#"{"type":"subscribe","streamerId":"doomed"}"#);
            p
        })
        .collect();
    let bystander = connect_player(&mut relay);
    relay.handle_player_message(&bystander.id, r#"{"type":"subscribe","streamerId":"other"}"#);

    relay.remove_streamer(doomed.key);

    for p in &subscribed {
        assert!(p.cancel.is_cancelled(), "subscriber {} not disconnected", p.id);
        assert_eq!(relay.subscription_of(&p.id), None);
    }
    assert!(!bystander.cancel.is_cancelled());
    assert!(relay.subscription_of(&bystander.id).is_some());
    assert!(relay.streamer(doomed.key).is_none());
    assert!(relay.streamer_snapshots().iter().all(|s| s.streamer_id != "doomed"));
}

#[test]
fn rename_notifies_each_subscriber_exactly_once() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let mut subscribed_a = connect_player(&mut relay);
    let mut subscribed_b = connect_player(&mut relay);
    let mut bystander = connect_player(&mut relay);
    relay.handle_player_message(&subscribed_a.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    relay.handle_player_message(&subscribed_b.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    streamer.drain();

    relay.handle_streamer_message(streamer.key, r#"{"type":"endpointId","id":"cam-east"}"#);

    for p in [&mut subscribed_a, &mut subscribed_b] {
        let frames = p.drain();
        assert_eq!(types(&frames), vec!["streamerIdChanged"]);
        assert_eq!(frames[0]["newID"], "cam-east");
    }
    assert!(bystander.drain().is_empty());

    // Subscription survives the rename and routes to the new id.
    let confirm = streamer.drain();
    assert_eq!(types(&confirm), vec!["endpointIdConfirm"]);
    assert_eq!(confirm[0]["committedId"], "cam-east");
    relay.handle_player_message(&subscribed_a.id, r#"{"type":"offer","sdp":"v=0"}"#);
    assert_eq!(types(&streamer.drain()), vec!["offer"]);
}

#[test]
fn rename_to_taken_id_keeps_current_id() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "a");
    let _other = connect_streamer(&mut relay, "b");
    let mut player = connect_player(&mut relay);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"a"}"#);
    streamer.drain();
    player.drain();

    relay.handle_streamer_message(streamer.key, r#"{"type":"endpointId","id":"b"}"#);

    let confirm = streamer.drain();
    assert_eq!(types(&confirm), vec!["endpointIdConfirm"]);
    assert_eq!(confirm[0]["committedId"], "a");
    assert!(player.drain().is_empty());
}

#[test]
fn duplicate_streamer_registration_is_rejected() {
    let mut relay = relay();
    let existing = connect_streamer(&mut relay, "cam");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = relay.register_streamer("cam", tx, CancellationToken::new(), None);
    assert_eq!(result, Err(crate::error::RelayError::IdentityConflict));
    assert!(rx.try_recv().is_err());

    // The existing registration is unaffected.
    assert!(relay.streamer(existing.key).is_some());
    assert_eq!(relay.streamer_count(), 1);
}

// -- Streamer -> player routing -----------------------------------------------

#[test]
fn streamer_message_is_routed_and_stripped() {
    let mut relay = relay();
    let streamer = connect_streamer(&mut relay, "cam");
    let mut player = connect_player(&mut relay);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    player.drain();

    let frame = format!(r#"{{"type":"offer","playerId":"{}","sdp":"v=0"}}"#, player.id);
    relay.handle_streamer_message(streamer.key, &frame);

    let frames = player.drain();
    assert_eq!(types(&frames), vec!["offer"]);
    assert!(frames[0].get("playerId").is_none());
    assert_eq!(frames[0]["sdp"], "v=0");
}

#[test]
fn streamer_message_for_unknown_player_is_dropped() {
    let mut relay = relay();
    let streamer = connect_streamer(&mut relay, "cam");
    relay.handle_streamer_message(streamer.key, r#"{"type":"offer","playerId":"404"}"#);
    // Non-fatal: the streamer stays registered.
    assert_eq!(relay.streamer_count(), 1);
}

#[test]
fn streamer_message_without_player_id_is_dropped() {
    let mut relay = relay();
    let streamer = connect_streamer(&mut relay, "cam");
    let mut player = connect_player(&mut relay);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);
    player.drain();

    relay.handle_streamer_message(streamer.key, r#"{"type":"offer","sdp":"v=0"}"#);
    assert!(player.drain().is_empty());
}

#[test]
fn streamer_can_force_player_disconnect() {
    let mut relay = relay();
    let streamer = connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);

    let frame = format!(
        r#"{{"type":"disconnectPlayer","playerId":"{}","reason":"kicked"}}"#,
        player.id
    );
    relay.handle_streamer_message(streamer.key, &frame);
    assert!(player.cancel.is_cancelled());
}

// -- Direct replies -----------------------------------------------------------

#[test]
fn list_streamers_reflects_current_membership() {
    let mut relay = relay();
    let first = connect_streamer(&mut relay, "a");
    connect_streamer(&mut relay, "b");
    let mut player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"listStreamers"}"#);
    let frames = player.drain();
    assert_eq!(types(&frames), vec!["streamerList"]);
    assert_eq!(frames[0]["ids"], json!(["a", "b"]));

    relay.remove_streamer(first.key);
    relay.handle_player_message(&player.id, r#"{"type":"listStreamers"}"#);
    assert_eq!(player.drain()[0]["ids"], json!(["b"]));
}

#[test]
fn ping_gets_pong_on_both_sides() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let mut player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, r#"{"type":"ping","time":7}"#);
    let frames = player.drain();
    assert_eq!(types(&frames), vec!["pong"]);
    assert_eq!(frames[0]["time"], 7);

    relay.handle_streamer_message(streamer.key, r#"{"type":"ping","time":9}"#);
    assert_eq!(streamer.drain()[0]["time"], 9);
}

// -- Protocol errors ----------------------------------------------------------

#[test]
fn malformed_player_messages_are_dropped() {
    let mut relay = relay();
    let mut streamer = connect_streamer(&mut relay, "cam");
    let mut player = connect_player(&mut relay);

    relay.handle_player_message(&player.id, "not json");
    relay.handle_player_message(&player.id, r#"{"no":"type"}"#);
    relay.handle_player_message(&player.id, r#"{"type":"wholeNewThing"}"#);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe"}"#); // missing streamerId

    assert!(streamer.drain().is_empty());
    assert!(player.drain().is_empty());
    assert!(!player.cancel.is_cancelled());
    assert_eq!(relay.player_count(), 1);
}

// -- Inspection ---------------------------------------------------------------

#[test]
fn snapshots_expose_subscription_state() {
    let mut relay = relay();
    connect_streamer(&mut relay, "cam");
    let player = connect_player(&mut relay);
    relay.handle_player_message(&player.id, r#"{"type":"subscribe","streamerId":"cam"}"#);

    let players = relay.player_snapshots();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].player_id, player.id);
    assert_eq!(players[0].subscribed_to.as_deref(), Some("cam"));
    assert!(players[0].send_offer);

    let streamers = relay.streamer_snapshots();
    assert_eq!(streamers.len(), 1);
    assert_eq!(streamers[0].streamer_id, "cam");
    assert_eq!(streamers[0].subscriber_count, 1);
}

#[test]
fn config_is_sent_on_player_connect() {
    let mut relay = Relay::new(json!({"iceServers": [{"urls": ["stun:stun.example"]}]}));
    let (tx, mut rx) = mpsc::unbounded_channel();
    relay.add_player(tx, CancellationToken::new(), false, Some("10.0.0.1:555".to_owned()));

    let frames = drain(&mut rx);
    assert_eq!(types(&frames), vec!["config"]);
    assert_eq!(frames[0]["peerConnectionOptions"]["iceServers"][0]["urls"][0], "stun:stun.example");
}
