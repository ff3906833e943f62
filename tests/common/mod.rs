#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for pgnet client integration tests.
//!
//! [`PairConnector`] hands the client one half of a local transport pair and
//! [`ServerSide`] lets the test play the server on the other half, so every
//! frame the client sends can be inspected and answered by hand.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use pgnet_client::protocol::{decode_packet, encode_response, Payload};
use pgnet_client::{
    local_pair, Client, ClientConfig, ClientError, ClientEvent, Connector, LocalPeer, Packet,
    Response, Session, Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a test waits for something that should happen.
pub const PATIENCE: Duration = Duration::from_secs(5);

// ── PairConnector ───────────────────────────────────────────────────

/// A connector that hands out pre-made transports, one per connection,
/// skipping the handshake.
pub struct PairConnector {
    transports: StdMutex<VecDeque<Box<dyn Transport>>>,
    username: String,
}

impl PairConnector {
    /// Create a connector plus the server half of its transport.
    pub fn new(username: &str) -> (Self, ServerSide) {
        let (connector, mut servers) = Self::with_sessions(username, 1);
        (connector, servers.remove(0))
    }

    /// Create a connector good for `count` connections, plus the server half
    /// of each in connection order.
    pub fn with_sessions(username: &str, count: usize) -> (Self, Vec<ServerSide>) {
        let mut transports: VecDeque<Box<dyn Transport>> = VecDeque::new();
        let mut servers = Vec::new();
        for _ in 0..count {
            let (transport, peer) = local_pair();
            transports.push_back(Box::new(transport));
            servers.push(ServerSide { peer });
        }
        let connector = Self {
            transports: StdMutex::new(transports),
            username: username.into(),
        };
        (connector, servers)
    }
}

#[async_trait]
impl Connector for PairConnector {
    async fn connect(&self) -> Result<(Box<dyn Transport>, Session), ClientError> {
        let transport = self
            .transports
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::Connect("no transports left".into()))?;
        let session = Session {
            username: self.username.clone(),
            server_pubkey: String::new(),
        };
        Ok((transport, session))
    }

    fn describe(&self) -> String {
        "test pair".into()
    }
}

// ── ServerSide ──────────────────────────────────────────────────────

/// The test's end of the connection.
pub struct ServerSide {
    pub peer: LocalPeer,
}

impl ServerSide {
    /// Wait for the next packet from the client.
    pub async fn expect_packet(&mut self) -> Packet {
        let frame = tokio::time::timeout(PATIENCE, self.peer.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("client closed the connection");
        decode_packet(&frame).unwrap()
    }

    /// Wait for the next packet and check its command keyword.
    pub async fn expect_message(&mut self, message: &str) -> Packet {
        let packet = self.expect_packet().await;
        assert_eq!(packet.message, message, "unexpected packet: {packet:?}");
        packet
    }

    /// Assert the client sends nothing for `duration`.
    pub async fn expect_silence(&mut self, duration: Duration) {
        if let Ok(frame) = tokio::time::timeout(duration, self.peer.recv()).await {
            panic!("expected no packet, got {frame:?}");
        }
    }

    /// Send a response to the client.
    pub fn reply(&self, response: Response) {
        self.peer.send(encode_response(&response).unwrap()).unwrap();
    }

    /// Send a raw frame to the client.
    pub fn send_raw(&self, frame: &str) {
        self.peer.send(frame).unwrap();
    }

    /// Wait until the client drops its half of the connection.
    pub async fn expect_closed(&mut self) {
        loop {
            let frame = tokio::time::timeout(PATIENCE, self.peer.recv())
                .await
                .expect("timed out waiting for the client to disconnect");
            if frame.is_none() {
                return;
            }
        }
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// A connected client with the test playing the server.
pub struct Harness {
    pub client: Arc<Client>,
    pub events: mpsc::Receiver<ClientEvent>,
    pub server: ServerSide,
    pub task: JoinHandle<Result<(), ClientError>>,
}

/// Config whose heartbeat never fires during a test, so checks only happen
/// when a test asks for them.
pub fn manual_config() -> ClientConfig {
    ClientConfig::new().with_heartbeat_interval(Duration::from_secs(3600))
}

/// Start a client and wait until it reports the connection.
pub async fn connect(config: ClientConfig) -> Harness {
    let (connector, server) = PairConnector::new("alice");
    let (client, mut events) = Client::new(connector, config);
    let client = Arc::new(client);
    let runner = Arc::clone(&client);
    let task = tokio::spawn(async move { runner.async_connect().await });

    let connected = next_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await;
    assert_eq!(connected, ClientEvent::Connection(true));
    Harness {
        client,
        events,
        server,
        task,
    }
}

impl Harness {
    /// Create and enter a game, answering as the server would.
    pub async fn enter_game(&mut self, name: &str) {
        let reply = self.client.create_game(name, None);
        let packet = self.server.expect_message("__pgnet__.create_game").await;
        assert_eq!(packet.payload["name"], name);
        self.server
            .reply(Response::new("Created game.").with_field("game", name));
        assert!(reply.await.unwrap().status.is_ok());
        let event = next_event(&mut self.events, |e| matches!(e, ClientEvent::Game(_))).await;
        assert_eq!(event, ClientEvent::Game(Some(name.to_string())));
    }

    /// Drain buffered events without waiting.
    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Wait for the first event matching `predicate`, skipping the others.
pub async fn next_event(
    events: &mut mpsc::Receiver<ClientEvent>,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(PATIENCE, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}

/// Build a response payload from a JSON object literal.
pub fn payload(value: Value) -> Payload {
    value.as_object().cloned().expect("payload must be an object")
}

/// A state reply carrying `value` as its payload.
pub fn state_reply(value: Value) -> Response {
    Response::new("Updated state.").with_payload(payload(value))
}
