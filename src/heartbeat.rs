//! Hash-based state synchronization.
//!
//! While a game is joined, the connection loop periodically asks the
//! [`HeartbeatEngine`] for a `check_update` packet carrying the cached
//! fingerprint. The server answers with just `{state_hash}` when nothing
//! changed, or with a full snapshot otherwise. Snapshots replace the cache
//! wholesale; matching fingerprints leave it untouched.
//!
//! Ticks are skipped, not queued, while an earlier check is still awaiting
//! its reply, so a stalled connection never accumulates checks.

use tracing::{debug, warn};

use crate::protocol::{Packet, Response, STATE_HASH_KEY};
use crate::state::{is_falsy, GameState};

/// What [`HeartbeatEngine::apply`] did with a check reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server fingerprint matches the cache; nothing changed.
    Unchanged,
    /// The cache was replaced by a new snapshot.
    Replaced,
    /// The reply was unusable and the cache was kept.
    Rejected,
}

/// Owner of the client-side [`GameState`] cache.
#[derive(Debug, Default)]
pub struct HeartbeatEngine {
    cache: GameState,
    outstanding: usize,
}

impl HeartbeatEngine {
    /// Create an engine with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a check for a timer tick, or `None` if a previous check is
    /// still unanswered.
    pub fn tick(&mut self) -> Option<Packet> {
        if self.outstanding > 0 {
            debug!(outstanding = self.outstanding, "heartbeat skipped, check in flight");
            return None;
        }
        Some(self.check())
    }

    /// Produce a check unconditionally.
    pub fn check(&mut self) -> Packet {
        self.outstanding += 1;
        Packet::check_update(self.cache.state_hash().clone())
    }

    /// Forget `count` checks that will never be answered (flushed or dropped).
    pub fn forget(&mut self, count: usize) {
        self.outstanding = self.outstanding.saturating_sub(count);
    }

    /// Number of checks awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Apply the reply to a check.
    pub fn apply(&mut self, response: &Response) -> SyncOutcome {
        self.outstanding = self.outstanding.saturating_sub(1);

        if !response.status.is_ok() {
            warn!(status = ?response.status, message = %response.message, "update check rejected");
            return SyncOutcome::Rejected;
        }

        let server_hash = match response.payload.get(STATE_HASH_KEY) {
            Some(hash) if !is_falsy(hash) => hash,
            _ => {
                warn!(payload = ?response.payload, "missing state hash in update reply");
                return SyncOutcome::Rejected;
            }
        };

        if server_hash == self.cache.state_hash() {
            return SyncOutcome::Unchanged;
        }

        self.cache = GameState::from_snapshot(response.payload.clone());
        debug!(state_hash = %self.cache.state_hash(), "new game state");
        SyncOutcome::Replaced
    }

    /// Drop the cache back to the "no data yet" sentinel.
    pub fn reset(&mut self) {
        self.cache = GameState::default();
    }

    /// The cached state.
    pub fn game_state(&self) -> &GameState {
        &self.cache
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::protocol::{Payload, Status};
    use serde_json::{json, Value};

    fn reply(payload: Value) -> Response {
        let map: Payload = payload.as_object().unwrap().clone();
        Response::new("Updated state.").with_payload(map)
    }

    #[test]
    fn tick_carries_cached_hash() {
        let mut engine = HeartbeatEngine::new();
        let packet = engine.tick().unwrap();
        assert_eq!(packet.message, "check_update");
        assert_eq!(packet.payload["state_hash"], Value::Null);
    }

    #[test]
    fn ticks_are_skipped_while_awaiting() {
        let mut engine = HeartbeatEngine::new();
        assert!(engine.tick().is_some());
        assert!(engine.tick().is_none());
        assert!(engine.tick().is_none());
        assert_eq!(engine.outstanding(), 1);

        engine.apply(&reply(json!({"state_hash": "H0"})));
        assert!(engine.tick().is_some());
    }

    #[test]
    fn matching_hash_is_a_no_op() {
        let mut engine = HeartbeatEngine::new();
        engine.check();
        assert_eq!(
            engine.apply(&reply(json!({"state_hash": "H0", "board": [1]}))),
            SyncOutcome::Replaced
        );
        let before = engine.game_state().clone();

        engine.check();
        assert_eq!(
            engine.apply(&reply(json!({"state_hash": "H0"}))),
            SyncOutcome::Unchanged
        );
        assert_eq!(engine.game_state(), &before);
        assert_eq!(engine.game_state().get("board"), Some(&json!([1])));
    }

    #[test]
    fn new_hash_replaces_cache_wholesale() {
        let mut engine = HeartbeatEngine::new();
        engine.check();
        engine.apply(&reply(json!({"state_hash": "H0", "board": [1], "info": "x"})));
        engine.check();
        engine.apply(&reply(json!({"state_hash": "H1", "board": [2]})));

        let state = engine.game_state();
        assert_eq!(state.state_hash(), &json!("H1"));
        assert_eq!(state.get("board"), Some(&json!([2])));
        assert!(state.get("info").is_none());
    }

    #[test]
    fn missing_or_falsy_hash_keeps_cache() {
        let mut engine = HeartbeatEngine::new();
        engine.check();
        engine.apply(&reply(json!({"state_hash": "H0"})));

        for bad in [json!({}), json!({"state_hash": ""}), json!({"state_hash": null})] {
            engine.check();
            assert_eq!(engine.apply(&reply(bad)), SyncOutcome::Rejected);
            assert_eq!(engine.game_state().state_hash(), &json!("H0"));
        }
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn failed_status_keeps_cache() {
        let mut engine = HeartbeatEngine::new();
        engine.check();
        let response = reply(json!({"state_hash": "H9"})).with_status(Status::Unexpected);
        assert_eq!(engine.apply(&response), SyncOutcome::Rejected);
        assert!(!engine.game_state().has_data());
    }

    #[test]
    fn forget_releases_backpressure() {
        let mut engine = HeartbeatEngine::new();
        engine.check();
        assert!(engine.tick().is_none());
        engine.forget(1);
        assert!(engine.tick().is_some());
    }
}
