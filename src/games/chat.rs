//! Chat room game.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{now_timestamp, Packet, Response, STATE_HASH_KEY};
use crate::server::{Game, GameFactory};
use crate::state::fingerprint;

/// How many messages a snapshot carries.
pub const HISTORY_LEN: usize = 50;

/// Rooms idle for longer than this are dropped once empty.
const EXPIRY_SECS: f64 = 2.0 * 60.0 * 60.0;

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub username: String,
    /// Message body.
    pub text: String,
    /// Seconds since the Unix epoch.
    pub time: f64,
}

impl ChatMessage {
    fn new(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            text: text.into(),
            time: now_timestamp(),
        }
    }
}

/// A chat room. Game command: `message {text}`.
#[derive(Debug)]
pub struct ChatRoom {
    name: String,
    users: BTreeSet<String>,
    log: Vec<ChatMessage>,
}

impl ChatRoom {
    /// Create a room with a welcome message.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let welcome = ChatMessage::new("admin", format!("Welcome to {name:?} chat room"));
        Self {
            name,
            users: BTreeSet::new(),
            log: vec![welcome],
        }
    }

    /// Factory for [`LocalServer`](crate::server::LocalServer).
    pub fn factory() -> GameFactory {
        Arc::new(|name: &str| Box::new(ChatRoom::new(name)) as Box<dyn Game>)
    }

    fn state_hash(&self) -> String {
        let last_time = self.log.last().map_or(0, |m| m.time.to_bits());
        fingerprint(&(&self.name, &self.users, self.log.len(), last_time))
    }

    fn recent(&self) -> &[ChatMessage] {
        let start = self.log.len().saturating_sub(HISTORY_LEN);
        self.log.get(start..).unwrap_or_default()
    }
}

impl Game for ChatRoom {
    fn user_joined(&mut self, username: &str) {
        self.users.insert(username.to_string());
    }

    fn user_left(&mut self, username: &str) {
        self.users.remove(username);
    }

    fn handle_heartbeat(&mut self, packet: &Packet) -> Response {
        let state_hash = self.state_hash();
        if packet.payload.get(STATE_HASH_KEY).and_then(Value::as_str) == Some(state_hash.as_str()) {
            return Response::new("Up to date.").with_field(STATE_HASH_KEY, state_hash);
        }
        let messages = match serde_json::to_value(self.recent()) {
            Ok(messages) => messages,
            Err(e) => return Response::bad(format!("Failed to serialize messages: {e}")),
        };
        let users: Vec<&str> = self.users.iter().map(String::as_str).collect();
        Response::new(format!("Last {HISTORY_LEN} messages."))
            .with_field(STATE_HASH_KEY, state_hash)
            .with_field("room_name", self.name.as_str())
            .with_field("users", users)
            .with_field("messages", messages)
    }

    fn handle_game_packet(&mut self, packet: &Packet) -> Response {
        if packet.message != "message" {
            return Response::unexpected("No such command.");
        }
        let Some(text) = packet
            .payload
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        else {
            return Response::unexpected("Expected text in payload.");
        };
        self.log.push(ChatMessage::new(packet.username.as_str(), text));
        Response::new("Added message.")
    }

    fn persistent(&self) -> bool {
        match self.log.last() {
            Some(last) if self.log.len() > 1 => now_timestamp() - last.time <= EXPIRY_SECS,
            _ => false,
        }
    }
}
