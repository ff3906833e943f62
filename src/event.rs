//! Events emitted by the [`Client`](crate::Client) to the presentation layer.

use crate::state::GameState;

/// A notification from the client.
///
/// `Status` events are best-effort: when the event channel is full they are
/// dropped with a warning, since the latest status supersedes earlier ones.
/// Every other event is always delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Human-readable status after a connection-state transition or I/O error.
    Status(String),
    /// The handshake succeeded (`true`) or an established connection ended (`false`).
    Connection(bool),
    /// The session entered a game (`Some(name)`) or left it (`None`).
    Game(Option<String>),
    /// The cached game state was replaced by a new snapshot.
    StateChanged(GameState),
}
