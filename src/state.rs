//! Client-side cache of server-authoritative game state.

use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{Payload, STATE_HASH_KEY};

/// Compute a state fingerprint.
///
/// Deterministic: equal inputs always give equal fingerprints, including
/// across processes built with the same toolchain. The result is a 16-digit
/// lowercase hex string, so it is never falsy.
pub fn fingerprint<T: Hash + ?Sized>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Returns `true` for values treated as "no fingerprint": `null`, `false`,
/// zero, and empty strings, arrays or objects.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Last known snapshot of the joined game.
///
/// Always holds a `state_hash` entry. A fresh cache holds `null` there,
/// meaning "no data yet", which never matches a server fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameState(Payload);

impl Default for GameState {
    fn default() -> Self {
        let mut map = Payload::new();
        map.insert(STATE_HASH_KEY.to_string(), Value::Null);
        Self(map)
    }
}

impl GameState {
    /// Wrap a full snapshot received from the server.
    pub fn from_snapshot(mut snapshot: Payload) -> Self {
        snapshot
            .entry(STATE_HASH_KEY.to_string())
            .or_insert(Value::Null);
        Self(snapshot)
    }

    /// The cached fingerprint.
    pub fn state_hash(&self) -> &Value {
        self.0.get(STATE_HASH_KEY).unwrap_or(&Value::Null)
    }

    /// Returns `true` once a snapshot has been applied.
    pub fn has_data(&self) -> bool {
        !is_falsy(self.state_hash())
    }

    /// Look up one field of the snapshot.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The whole snapshot.
    pub fn as_map(&self) -> &Payload {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable() {
        let board = ["X", "", "O"];
        let players = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(
            fingerprint(&(board, &players, true)),
            fingerprint(&(board, &players, true))
        );
        assert_ne!(
            fingerprint(&(board, &players, true)),
            fingerprint(&(board, &players, false))
        );
        assert_eq!(fingerprint("abc").len(), 16);
    }

    #[test]
    fn falsy_values() {
        assert!(is_falsy(&Value::Null));
        assert!(is_falsy(&json!("")));
        assert!(is_falsy(&json!(0)));
        assert!(is_falsy(&json!(false)));
        assert!(!is_falsy(&json!("H0")));
        assert!(!is_falsy(&json!(17)));
    }

    #[test]
    fn default_cache_holds_sentinel() {
        let state = GameState::default();
        assert_eq!(state.state_hash(), &Value::Null);
        assert!(!state.has_data());
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({"state_hash": null}));
    }

    #[test]
    fn snapshot_keeps_all_fields() {
        let snapshot = json!({"state_hash": "H1", "board": ["X"]});
        let state = GameState::from_snapshot(snapshot.as_object().unwrap().clone());
        assert_eq!(state.state_hash(), &json!("H1"));
        assert_eq!(state.get("board").unwrap()[0], json!("X"));
        assert!(state.has_data());
    }
}
