#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the pgnet client.
//!
//! The test plays the server through `tests/common`, answering each packet by
//! hand to check ordering, flushing, heartbeat back-pressure and cache
//! replacement end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pgnet_client::games::{ChatRoom, TicTacToe, BOT_NAME};
use pgnet_client::{
    Client, ClientConfig, ClientError, ClientEvent, ConnectionState, Credentials, GameDirectory,
    LocalConnector, LocalServer, Packet, Response, Status,
};
use serde_json::{json, Value};

use common::{connect, manual_config, next_event, state_reply, PairConnector, PATIENCE};

// ════════════════════════════════════════════════════════════════════
// Request ordering
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn replies_resolve_in_send_order() {
    let mut h = connect(manual_config()).await;
    let a = h.client.send(Packet::new("a"));
    let b = h.client.send(Packet::new("b"));

    h.server.expect_message("a").await;
    // B stays queued until A is answered.
    h.server.expect_silence(Duration::from_millis(50)).await;
    h.server.reply(Response::new("reply a"));
    h.server.expect_message("b").await;
    h.server.reply(Response::new("reply b"));

    assert_eq!(a.await.unwrap().message, "reply a");
    assert_eq!(b.await.unwrap().message, "reply b");
}

#[tokio::test]
async fn do_next_jumps_the_queue() {
    let mut h = connect(manual_config()).await;
    let a = h.client.send(Packet::new("a"));
    h.server.expect_message("a").await;

    let b = h.client.send(Packet::new("b"));
    let urgent = h.client.send_next(Packet::new("urgent"));
    // Give the loop time to queue both before A is answered.
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.server.reply(Response::new("reply a"));

    h.server.expect_message("urgent").await;
    h.server.reply(Response::new("reply urgent"));
    h.server.expect_message("b").await;
    h.server.reply(Response::new("reply b"));

    assert_eq!(a.await.unwrap().message, "reply a");
    assert_eq!(urgent.await.unwrap().message, "reply urgent");
    assert_eq!(b.await.unwrap().message, "reply b");
}

#[tokio::test]
async fn application_failures_reach_the_caller() {
    let mut h = connect(manual_config()).await;
    let reply = h.client.send(Packet::new("play_square").with_field("square", 4));
    h.server.expect_message("play_square").await;
    h.server.reply(Response::unexpected("Not your turn."));

    let response = reply.await.unwrap();
    assert_eq!(response.status, Status::Unexpected);
    assert!(h.client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Flushing
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn flush_drops_pending_and_swallows_late_reply() {
    let mut h = connect(manual_config()).await;
    let a = h.client.send(Packet::new("a"));
    let b = h.client.send(Packet::new("b"));
    h.server.expect_message("a").await;

    h.client.flush_queue().unwrap();
    let c = h.client.send(Packet::new("c"));
    // C waits for the stray reply to A.
    h.server.expect_silence(Duration::from_millis(50)).await;

    h.server.reply(Response::new("late reply a"));
    h.server.expect_message("c").await;
    h.server.reply(Response::new("reply c"));

    assert_eq!(a.await, None);
    assert_eq!(b.await, None);
    assert_eq!(c.await.unwrap().message, "reply c");
}

#[tokio::test]
async fn disconnect_drops_pending_requests() {
    let mut h = connect(manual_config()).await;
    let a = h.client.send(Packet::new("a"));
    let b = h.client.send(Packet::new("b"));
    h.server.expect_message("a").await;

    drop(h.server);
    assert_eq!(a.await, None);
    assert_eq!(b.await, None);
    h.task.await.unwrap().unwrap();
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// State synchronization
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn matching_hash_is_a_no_op_and_new_hash_replaces_cache() {
    let mut h = connect(manual_config()).await;
    h.enter_game("room1").await;

    // First check carries the "no data" sentinel.
    h.client.check_update().unwrap();
    let check = h.server.expect_message("check_update").await;
    assert_eq!(check.payload["state_hash"], Value::Null);
    h.server.reply(state_reply(json!({"state_hash": "H0", "board": ["", "", ""]})));
    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
    let ClientEvent::StateChanged(state) = event else {
        unreachable!()
    };
    assert_eq!(state.state_hash(), &json!("H0"));

    // Unchanged: the server echoes the hash only.
    h.client.check_update().unwrap();
    let check = h.server.expect_message("check_update").await;
    assert_eq!(check.payload["state_hash"], "H0");
    h.server.reply(state_reply(json!({"state_hash": "H0"})));

    // A later round trip proves the check reply was processed.
    let ping = h.client.send(Packet::new("ping"));
    h.server.expect_message("ping").await;
    h.server.reply(Response::new("pong"));
    ping.await.unwrap();
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, ClientEvent::StateChanged(_))));
    let cached = h.client.game_state().await;
    assert_eq!(cached.get("board"), Some(&json!(["", "", ""])));

    // Changed: the new snapshot replaces the cache wholesale.
    h.client.check_update().unwrap();
    h.server.expect_message("check_update").await;
    h.server.reply(state_reply(
        json!({"state_hash": "H1", "players": ["alice", "bob"]}),
    ));
    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
    let ClientEvent::StateChanged(state) = event else {
        unreachable!()
    };
    assert_eq!(state.state_hash(), &json!("H1"));
    assert_eq!(state.get("board"), None);
    assert_eq!(h.client.game_state().await, state);
}

#[tokio::test]
async fn missing_hash_keeps_previous_cache() {
    let mut h = connect(manual_config()).await;
    h.enter_game("room1").await;

    h.client.check_update().unwrap();
    h.server.expect_message("check_update").await;
    h.server.reply(state_reply(json!({"state_hash": "H0", "turn": 1})));
    next_event(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;

    h.client.check_update().unwrap();
    h.server.expect_message("check_update").await;
    h.server.reply(state_reply(json!({"state_hash": "", "turn": 2})));

    let ping = h.client.send(Packet::new("ping"));
    h.server.expect_message("ping").await;
    h.server.reply(Response::new("pong"));
    ping.await.unwrap();
    assert_eq!(h.client.game_state().await.get("turn"), Some(&json!(1)));
}

#[tokio::test]
async fn heartbeat_skips_ticks_while_check_in_flight() {
    let config = ClientConfig::new().with_heartbeat_interval(Duration::from_millis(10));
    let mut h = connect(config).await;
    h.enter_game("room1").await;

    h.server.expect_message("check_update").await;
    // Many ticks pass; none of them may queue another check.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let ping = h.client.send(Packet::new("ping"));
    h.server.reply(state_reply(json!({"state_hash": "H0"})));

    // The ping is next on the wire, not a backlog of checks.
    h.server.expect_message("ping").await;
    h.server.reply(Response::new("ok"));
    ping.await.unwrap();

    // Ticks resume once the check resolved.
    let check = h.server.expect_message("check_update").await;
    assert_eq!(check.payload["state_hash"], "H0");
}

#[tokio::test]
async fn heartbeat_check_goes_ahead_of_queued_requests() {
    let config = ClientConfig::new().with_heartbeat_interval(Duration::from_millis(10));
    let mut h = connect(config).await;
    h.enter_game("room1").await;

    h.server.expect_message("check_update").await;
    let a = h.client.send(Packet::new("a"));
    let b = h.client.send(Packet::new("b"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.server.reply(state_reply(json!({"state_hash": "H0"})));

    // Ticks land while A is on the wire; their check overtakes B.
    h.server.expect_message("a").await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    h.server.reply(Response::new("reply a"));
    let check = h.server.expect_message("check_update").await;
    assert_eq!(check.payload["state_hash"], "H0");
    h.server.reply(state_reply(json!({"state_hash": "H0"})));

    h.server.expect_message("b").await;
    h.server.reply(Response::new("reply b"));
    assert_eq!(a.await.unwrap().message, "reply a");
    assert_eq!(b.await.unwrap().message, "reply b");
}

#[tokio::test]
async fn no_heartbeat_outside_a_game() {
    let config = ClientConfig::new().with_heartbeat_interval(Duration::from_millis(10));
    let mut h = connect(config).await;
    h.server.expect_silence(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn send_and_sync_queues_check_behind_packet() {
    let mut h = connect(manual_config()).await;
    h.enter_game("room1").await;

    let reply = h.client.send_and_sync(Packet::new("play_square").with_field("square", 0));
    h.server.expect_message("play_square").await;
    h.server.reply(Response::new("Marked square."));
    h.server.expect_message("check_update").await;
    h.server.reply(state_reply(json!({"state_hash": "H2"})));
    assert!(reply.await.unwrap().status.is_ok());
    next_event(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
}

#[tokio::test]
async fn leaving_a_game_resets_cache_and_reports() {
    let mut h = connect(manual_config()).await;
    h.enter_game("room1").await;
    h.client.check_update().unwrap();
    h.server.expect_message("check_update").await;
    h.server.reply(state_reply(json!({"state_hash": "H0"})));
    next_event(&mut h.events, |e| matches!(e, ClientEvent::StateChanged(_))).await;

    let reply = h.client.leave_game();
    h.server.expect_message("__pgnet__.leave_game").await;
    h.server
        .reply(Response::new("Left game.").with_field("game", Value::Null));
    reply.await.unwrap();

    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::Game(_))).await;
    assert_eq!(event, ClientEvent::Game(None));
    assert_eq!(h.client.game().await, None);
    assert!(!h.client.game_state().await.has_data());
}

#[tokio::test]
async fn rejected_join_keeps_game() {
    let mut h = connect(manual_config()).await;
    let reply = h.client.join_game("room9", Some("secret"));
    let packet = h.server.expect_message("__pgnet__.join_game").await;
    assert_eq!(packet.payload["password"], "secret");
    h.server.reply(Response::unexpected("No such game."));
    assert_eq!(reply.await.unwrap().status, Status::Unexpected);
    assert_eq!(h.client.game().await, None);
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn close_is_idempotent() {
    let mut h = connect(manual_config()).await;
    h.drain_events();

    h.client.close().await;
    h.client.close().await;
    (&mut h.task).await.unwrap().unwrap();
    h.server.expect_closed().await;

    let events = h.drain_events();
    assert_eq!(
        events,
        vec![
            ClientEvent::Status("Closing connection.".into()),
            ClientEvent::Status("Connection closed.".into()),
            ClientEvent::Connection(false),
        ]
    );
    let reply = h.client.send(Packet::new("late")).await.unwrap();
    assert_eq!(reply.status, Status::Unexpected);
}

#[tokio::test]
async fn malformed_frame_closes_connection() {
    let mut h = connect(manual_config()).await;
    h.server.send_raw("{ definitely not json");
    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(false));
    h.task.await.unwrap().unwrap();
    assert!(!h.client.is_connected());
}

#[tokio::test]
async fn leaving_game_on_disconnect_is_reported() {
    let mut h = connect(manual_config()).await;
    h.enter_game("room1").await;
    drop(h.server);
    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::Game(_))).await;
    assert_eq!(event, ClientEvent::Game(None));
    let event = next_event(&mut h.events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(false));
}

#[tokio::test]
async fn second_connect_is_refused_while_connected() {
    let h = connect(manual_config()).await;
    assert!(matches!(
        h.client.async_connect().await,
        Err(ClientError::AlreadyConnected)
    ));
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn reconnect_after_timed_out_close_keeps_new_session() {
    let config = manual_config()
        .with_event_channel_capacity(1)
        .with_shutdown_timeout(Duration::from_millis(50));
    let (connector, mut servers) = PairConnector::with_sessions("alice", 2);
    let mut second = servers.pop().unwrap();
    let mut first = servers.pop().unwrap();
    let (client, mut events) = Client::new(connector, config);
    let client = Arc::new(client);

    let runner = Arc::clone(&client);
    let first_task = tokio::spawn(async move { runner.async_connect().await });
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(true));

    // Fill the event channel, then stall the loop on a state change nobody
    // reads.
    let created = client.create_game("room1", None);
    first.expect_message("__pgnet__.create_game").await;
    first.reply(Response::new("Created game.").with_field("game", "room1"));
    assert!(created.await.unwrap().status.is_ok());
    client.check_update().unwrap();
    first.expect_message("check_update").await;
    first.reply(state_reply(json!({"state_hash": "H1"})));
    tokio::time::timeout(PATIENCE, async {
        while !client.game_state().await.has_data() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    client.close().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let runner = Arc::clone(&client);
    let second_task = tokio::spawn(async move { runner.async_connect().await });
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(true));

    // The abandoned run winds down without touching the new session.
    first_task.await.unwrap().unwrap();
    first.expect_closed().await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.game().await, None);

    let reply = client.send(Packet::new("ping"));
    second.expect_message("ping").await;
    second.reply(Response::new("pong"));
    assert_eq!(reply.await.unwrap().message, "pong");

    client.close().await;
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(false));
    second_task.await.unwrap().unwrap();
}

// ════════════════════════════════════════════════════════════════════
// Local server end to end
// ════════════════════════════════════════════════════════════════════

async fn local_client(
    server: &LocalServer,
    username: &str,
    config: ClientConfig,
) -> (
    std::sync::Arc<Client>,
    tokio::sync::mpsc::Receiver<ClientEvent>,
) {
    let (client, mut events) = Client::new(LocalConnector::new(server.clone(), username), config);
    let client = std::sync::Arc::new(client);
    let runner = std::sync::Arc::clone(&client);
    tokio::spawn(async move { runner.async_connect().await });
    let event = next_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(event, ClientEvent::Connection(true));
    (client, events)
}

#[tokio::test]
async fn local_tictactoe_against_bot() {
    let server = LocalServer::new(TicTacToe::factory_with_bot_delay(Duration::ZERO));
    let config = ClientConfig::new().with_heartbeat_interval(Duration::from_millis(10));
    let (client, mut events) = local_client(&server, "alice", config).await;

    assert!(client.create_game("solo", None).await.unwrap().status.is_ok());
    assert_eq!(client.game().await.as_deref(), Some("solo"));
    let started = client.send(Packet::new("single_player")).await.unwrap();
    assert!(started.status.is_ok());

    // The bot plays X and moves first; wait for a snapshot showing its move.
    let state = tokio::time::timeout(PATIENCE, async {
        loop {
            let event = next_event(&mut events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
            if let ClientEvent::StateChanged(state) = event {
                if state.get("board").and_then(|b| b.get(0)) == Some(&json!("X")) {
                    return state;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(state.get("players"), Some(&json!(["alice", BOT_NAME])));
    assert_eq!(state.get("your_turn"), Some(&json!(true)));

    let played = client
        .send_and_sync(Packet::new("play_square").with_field("square", 4))
        .await
        .unwrap();
    assert!(played.status.is_ok());
    client.close().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn local_lobby_directory_and_chat() {
    let server = LocalServer::new(ChatRoom::factory());
    let (alice, _alice_events) = local_client(&server, "alice", common::manual_config()).await;
    let (bob, mut bob_events) = local_client(&server, "bob", common::manual_config()).await;

    alice
        .create_game("lounge", Some("pw"))
        .await
        .unwrap();
    let dir = GameDirectory::from_response(&bob.get_game_dir().await.unwrap()).unwrap();
    assert_eq!(dir.games["lounge"].user_count, 1);
    assert!(dir.games["lounge"].password_protected);

    let wrong = bob.join_game("lounge", None).await.unwrap();
    assert_eq!(wrong.status, Status::Unexpected);
    let joined = bob.join_game("lounge", Some("pw")).await.unwrap();
    assert!(joined.status.is_ok());
    let event = next_event(&mut bob_events, |e| matches!(e, ClientEvent::Game(_))).await;
    assert_eq!(event, ClientEvent::Game(Some("lounge".into())));

    alice
        .send(Packet::new("message").with_field("text", "hello bob"))
        .await
        .unwrap();
    bob.check_update().unwrap();
    let event = next_event(&mut bob_events, |e| matches!(e, ClientEvent::StateChanged(_))).await;
    let ClientEvent::StateChanged(state) = event else {
        unreachable!()
    };
    let messages = state.get("messages").unwrap().as_array().unwrap();
    assert_eq!(messages.last().unwrap()["text"], "hello bob");

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn local_duplicate_username_fails_auth() {
    let server = LocalServer::new(ChatRoom::factory());
    let (_alice, _events) = local_client(&server, "alice", manual_config()).await;

    let (impostor, mut events) = Client::new(
        LocalConnector::new(server.clone(), "alice"),
        manual_config(),
    );
    let err = impostor.async_connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Auth(_)));
    let status = next_event(&mut events, |e| {
        matches!(e, ClientEvent::Status(s) if s.starts_with("Failed to connect"))
    })
    .await;
    assert!(matches!(status, ClientEvent::Status(_)));
    assert_eq!(impostor.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn credentials_builder() {
    let credentials = Credentials::new("alice")
        .with_password("pw")
        .with_verify_pubkey("KEY");
    assert_eq!(credentials.password.as_deref(), Some("pw"));
    assert_eq!(credentials.verify_pubkey.as_deref(), Some("KEY"));
}
