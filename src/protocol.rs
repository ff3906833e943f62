//! Wire-compatible protocol types for pgnet game servers.
//!
//! Requests travel as `{"message", "payload"}` JSON frames and replies as
//! `{"message", "payload", "status", "created_on"}` frames. Command keywords
//! without a dot are game commands handled by the joined game; keywords in the
//! reserved `__pgnet__.` namespace are session/lobby commands (see
//! [`MetaCommand`]).
//!
//! - `status` is the integer code of [`Status`]
//! - `created_on` is seconds since the Unix epoch as a float

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// A JSON object payload.
pub type Payload = Map<String, Value>;

/// Reserved prefix of session/lobby command keywords.
pub const META_PREFIX: &str = "__pgnet__.";

/// Game command carrying the client's last known state fingerprint.
pub const CHECK_UPDATE: &str = "check_update";

/// Payload key holding the state fingerprint.
pub const STATE_HASH_KEY: &str = "state_hash";

// ── Status ──────────────────────────────────────────────────────────

/// Outcome classification of a [`Response`].
///
/// Serialized as its integer code (`0`, `1`, `2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Status {
    /// The request was handled.
    #[default]
    Ok,
    /// A recoverable, user-facing rejection (e.g. "Not your turn.").
    Unexpected,
    /// A server-side anomaly.
    Bad,
}

impl Status {
    /// Returns `true` for [`Status::Ok`].
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => 0,
            Status::Unexpected => 1,
            Status::Bad => 2,
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Unexpected),
            2 => Ok(Status::Bad),
            other => Err(format!("unknown status code {other}")),
        }
    }
}

// ── Packet ──────────────────────────────────────────────────────────

/// An outbound request.
///
/// `username` is never sent: the server fills it in from the session that
/// delivered the packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Command keyword.
    pub message: String,
    /// Command arguments.
    #[serde(default)]
    pub payload: Payload,
    /// Sender identity, attached server-side.
    #[serde(skip)]
    pub username: String,
}

impl Packet {
    /// Create a packet with an empty payload.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: Payload::new(),
            username: String::new(),
        }
    }

    /// Create a packet with the given payload.
    pub fn with_payload(message: impl Into<String>, payload: Payload) -> Self {
        Self {
            payload,
            ..Self::new(message)
        }
    }

    /// Add one payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Attach the sender identity. Used by servers only.
    #[must_use]
    pub fn from_user(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Returns `true` if this packet is a `__pgnet__.` meta command.
    pub fn is_meta(&self) -> bool {
        self.message.starts_with(META_PREFIX)
    }

    /// Build the `check_update` packet for the given fingerprint.
    pub fn check_update(state_hash: Value) -> Self {
        Self::new(CHECK_UPDATE).with_field(STATE_HASH_KEY, state_hash)
    }
}

// ── Response ────────────────────────────────────────────────────────

/// An inbound reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Human-readable summary.
    pub message: String,
    /// Reply data.
    #[serde(default)]
    pub payload: Payload,
    /// Outcome classification.
    pub status: Status,
    /// Creation time in seconds since the Unix epoch.
    #[serde(default)]
    pub created_on: f64,
}

impl Response {
    /// Create an OK response with an empty payload, stamped with the current time.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: Payload::new(),
            status: Status::Ok,
            created_on: now_timestamp(),
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add one payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replace the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Shorthand for an `UNEXPECTED` response.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(message).with_status(Status::Unexpected)
    }

    /// Shorthand for a `BAD` response.
    pub fn bad(message: impl Into<String>) -> Self {
        Self::new(message).with_status(Status::Bad)
    }
}

pub(crate) fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

// ── Handshake frames ────────────────────────────────────────────────

/// First frame of a connection, sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHello {
    /// Public key the server identifies itself with. Empty when it has none.
    #[serde(default)]
    pub pubkey: String,
}

/// Credentials frame sent by the client after verifying [`ServerHello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Requested username.
    pub username: String,
    /// Account password, if any.
    #[serde(default)]
    pub password: Option<String>,
}

// ── Meta commands ───────────────────────────────────────────────────

/// Session and lobby commands in the reserved `__pgnet__.` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaCommand {
    /// List joinable games.
    GetGameDir,
    /// Create a game and join it.
    CreateGame,
    /// Join an existing game.
    JoinGame,
    /// Leave the current game.
    LeaveGame,
    /// List available meta commands.
    Help,
}

const META_COMMANDS: &[(&str, MetaCommand)] = &[
    ("__pgnet__.get_game_dir", MetaCommand::GetGameDir),
    ("__pgnet__.create_game", MetaCommand::CreateGame),
    ("__pgnet__.join_game", MetaCommand::JoinGame),
    ("__pgnet__.leave_game", MetaCommand::LeaveGame),
    ("__pgnet__.help", MetaCommand::Help),
];

impl MetaCommand {
    /// Every meta command, in help-listing order.
    pub fn all() -> impl Iterator<Item = MetaCommand> {
        META_COMMANDS.iter().map(|(_, command)| *command)
    }

    /// The wire keyword of this command.
    pub fn as_str(self) -> &'static str {
        META_COMMANDS
            .iter()
            .find(|(_, command)| *command == self)
            .map(|(keyword, _)| *keyword)
            .unwrap_or(META_PREFIX)
    }

    /// Look up a command by its wire keyword.
    pub fn parse(keyword: &str) -> Option<MetaCommand> {
        META_COMMANDS
            .iter()
            .find(|(name, _)| *name == keyword)
            .map(|(_, command)| *command)
    }

    /// Returns `true` for commands whose reply reports the session's game.
    pub fn changes_game(self) -> bool {
        matches!(
            self,
            MetaCommand::CreateGame | MetaCommand::JoinGame | MetaCommand::LeaveGame
        )
    }

    /// Build a packet for this command.
    pub fn packet(self) -> Packet {
        Packet::new(self.as_str())
    }
}

// ── Game directory ──────────────────────────────────────────────────

/// Directory entry of one joinable game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    /// Number of users currently in the game.
    #[serde(alias = "users")]
    pub user_count: usize,
    /// Whether joining requires a password.
    #[serde(default)]
    pub password_protected: bool,
}

/// Joinable games keyed by name, as returned by `__pgnet__.get_game_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameDirectory {
    /// Games keyed by name.
    #[serde(default)]
    pub games: BTreeMap<String, GameInfo>,
}

impl GameDirectory {
    /// Extract the directory from a `get_game_dir` reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the payload does not hold a directory.
    pub fn from_response(response: &Response) -> Result<Self> {
        serde_json::from_value(Value::Object(response.payload.clone()))
            .map_err(|e| ClientError::Protocol(format!("invalid game directory: {e}")))
    }

    /// Encode as a reply payload.
    pub fn to_payload(&self) -> Payload {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Payload::new(),
        }
    }
}

// ── Codec ───────────────────────────────────────────────────────────

/// Encode a packet as a request frame.
///
/// # Errors
///
/// Returns [`ClientError::Serialization`] if the payload cannot be encoded.
pub fn encode_packet(packet: &Packet) -> Result<String> {
    Ok(serde_json::to_string(packet)?)
}

/// Decode a request frame.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] for an ill-formed frame.
pub fn decode_packet(frame: &str) -> Result<Packet> {
    serde_json::from_str(frame).map_err(|e| ClientError::Protocol(format!("invalid packet: {e}")))
}

/// Encode a response frame.
///
/// # Errors
///
/// Returns [`ClientError::Serialization`] if the payload cannot be encoded.
pub fn encode_response(response: &Response) -> Result<String> {
    Ok(serde_json::to_string(response)?)
}

/// Decode a response frame.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] for an ill-formed frame.
pub fn decode_response(frame: &str) -> Result<Response> {
    serde_json::from_str(frame)
        .map_err(|e| ClientError::Protocol(format!("invalid response: {e}")))
}

/// Decode a handshake frame of type `T`.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] for an ill-formed frame.
pub fn decode_frame<T: serde::de::DeserializeOwned>(frame: &str) -> Result<T> {
    serde_json::from_str(frame)
        .map_err(|e| ClientError::Protocol(format!("invalid handshake frame: {e}")))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Status::Ok).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Status::Unexpected).unwrap(), "1");
        assert_eq!(serde_json::to_string(&Status::Bad).unwrap(), "2");
        assert!(serde_json::from_str::<Status>("3").is_err());
    }

    #[test]
    fn packet_username_is_not_on_the_wire() {
        let packet = Packet::new("play_square")
            .with_field("square", 4)
            .from_user("alice");
        let frame = encode_packet(&packet).unwrap();
        assert!(!frame.contains("alice"));
        let decoded = decode_packet(&frame).unwrap();
        assert_eq!(decoded.username, "");
        assert_eq!(decoded.payload["square"], json!(4));
    }

    #[test]
    fn meta_commands_round_trip_through_keywords() {
        for command in MetaCommand::all() {
            assert!(command.as_str().starts_with(META_PREFIX));
            assert_eq!(MetaCommand::parse(command.as_str()), Some(command));
        }
        assert_eq!(MetaCommand::parse("__pgnet__.shutdown"), None);
        assert_eq!(MetaCommand::parse("check_update"), None);
        assert!(MetaCommand::JoinGame.packet().is_meta());
        assert!(!Packet::check_update(Value::Null).is_meta());
    }

    #[test]
    fn game_directory_accepts_users_alias() {
        let response = Response::new("Games").with_field(
            "games",
            json!({
                "room1": { "users": 2, "password_protected": true },
                "room2": { "user_count": 0 }
            }),
        );
        let dir = GameDirectory::from_response(&response).unwrap();
        assert_eq!(dir.games["room1"].user_count, 2);
        assert!(dir.games["room1"].password_protected);
        assert!(!dir.games["room2"].password_protected);
    }

    #[test]
    fn decode_response_rejects_missing_status() {
        let err = decode_response(r#"{"message":"hi","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
