//! In-process game hosting for local/offline play.
//!
//! A remote pgnet server is an external collaborator; this module implements
//! just enough of its contract to host games inside the client process:
//! a [`Lobby`] answering the `__pgnet__.` meta commands and routing game
//! commands to [`Game`] instances, and a [`LocalServer`] that serves
//! [`LocalTransport`](crate::transports::LocalTransport) sessions from it.

mod lobby;
mod local;

use std::sync::Arc;

use crate::protocol::{Packet, Response};

pub use lobby::Lobby;
pub use local::LocalServer;

/// Server-side logic of one game instance.
///
/// Every method runs with the lobby locked, so implementations never see
/// concurrent calls.
pub trait Game: Send {
    /// A user entered the game.
    fn user_joined(&mut self, username: &str);

    /// A user left the game or disconnected.
    fn user_left(&mut self, username: &str);

    /// Answer a `check_update` packet.
    ///
    /// Must reply with only `{state_hash}` when the packet's `state_hash`
    /// equals the current fingerprint, and with a full snapshot (including the
    /// new `state_hash`) otherwise.
    fn handle_heartbeat(&mut self, packet: &Packet) -> Response;

    /// Answer any other game command.
    fn handle_game_packet(&mut self, packet: &Packet) -> Response;

    /// Advance time-driven logic. Called before every heartbeat.
    fn update(&mut self) {}

    /// Whether the game survives having no users. Empty games are asked
    /// again whenever the directory is listed or a game is created.
    fn persistent(&self) -> bool {
        false
    }
}

/// Builds a new game instance for a game name.
pub type GameFactory = Arc<dyn Fn(&str) -> Box<dyn Game> + Send + Sync>;
