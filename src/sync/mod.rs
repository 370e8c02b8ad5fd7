//! Declarative per-field visibility, first-sync snapshot, incremental diff
//! with per-player views, and the opcode/path-hash compression layer.
//! A land declares a field table once; the engine walks it every sync
//! cycle instead of the land hand-writing a delta type per state change.

pub mod diff;
pub mod hash;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::ids::PlayerId;
use diff::{OpKind, RawOp, diff_values};
use hash::PathTrie;

/// Per-field visibility rule.
#[derive(Clone)]
pub enum SyncPolicy {
    /// Sent to every member as-is.
    Broadcast,
    /// Never sent.
    ServerOnly,
    /// The raw value is a map keyed by player id (as a string); a given
    /// client's projection keeps only the entry whose key equals its own
    /// player id.
    PerPlayer,
    /// The engine calls the transform with `(value, target_player)` for
    /// the per-player projection.
    Masked(Arc<dyn Fn(&Value, Option<PlayerId>) -> Value + Send + Sync>),
}

impl std::fmt::Debug for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPolicy::Broadcast => write!(f, "Broadcast"),
            SyncPolicy::ServerOnly => write!(f, "ServerOnly"),
            SyncPolicy::PerPlayer => write!(f, "PerPlayer"),
            SyncPolicy::Masked(_) => write!(f, "Masked(..)"),
        }
    }
}

/// Declarative metadata for one field of a state tree.
#[derive(Clone, Debug)]
pub struct FieldMeta {
    pub name: &'static str,
    pub policy: SyncPolicy,
}

impl FieldMeta {
    pub fn broadcast(name: &'static str) -> Self {
        Self {
            name,
            policy: SyncPolicy::Broadcast,
        }
    }

    pub fn server_only(name: &'static str) -> Self {
        Self {
            name,
            policy: SyncPolicy::ServerOnly,
        }
    }

    pub fn per_player(name: &'static str) -> Self {
        Self {
            name,
            policy: SyncPolicy::PerPlayer,
        }
    }

    pub fn masked(
        name: &'static str,
        transform: impl Fn(&Value, Option<PlayerId>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            policy: SyncPolicy::Masked(Arc::new(transform)),
        }
    }
}

/// A user-defined aggregate of named fields, each carrying a [`SyncPolicy`].
/// Implementors supply the field declarations and a way to read each
/// field's current raw value as JSON; the engine does the rest.
pub trait StateTree: Send + Sync {
    fn field_metas(&self) -> &[FieldMeta];
    fn raw_value(&self, field: &str) -> Value;
}

/// Wire encoding advertised to the client in the join response; the client
/// must honor it for subsequent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Encoding {
    Json,
    OpcodeArray,
    #[cfg(feature = "msgpack")]
    MessagePack,
}

/// Full-form state delivery. Always sent as the first sync for a player.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StateSnapshot {
    pub land_type: &'static str,
    pub player_id: Option<PlayerId>,
    pub encoding: Encoding,
    pub fields: serde_json::Map<String, Value>,
}

/// A single JSON-Patch-shaped operation, with its path encoded either as a
/// literal string or as a hash + captured dynamic keys.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatchOp {
    pub kind: OpKind,
    pub path: PathRepr,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PathRepr {
    Literal(String),
    Hashed { hash: u32, dynamic_keys: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    NoChange,
    FirstSync,
    Diff,
}

/// Incremental diff form delivered every sync cycle after the first.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StateUpdate {
    pub kind: UpdateKind,
    pub patches: Vec<PatchOp>,
}

#[derive(Default)]
struct PlayerSyncState {
    first_sync_done: bool,
    last_projection: serde_json::Map<String, Value>,
}

/// Precomputes path hashes for every static path pattern in the schema and
/// tracks, per player, the last snapshot delivered so it can compute the
/// next diff. The trie is immutable after construction and therefore safe
/// for concurrent readers; the per-player projection cache is the only
/// mutable state and is guarded by a mutex scoped to a single land (never
/// contended across lands).
pub struct SyncEngine {
    land_type: &'static str,
    trie: Arc<PathTrie>,
    players: Mutex<HashMap<PlayerId, PlayerSyncState>>,
}

impl SyncEngine {
    pub fn new(land_type: &'static str, known_patterns: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            land_type,
            trie: Arc::new(PathTrie::build(known_patterns)),
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn trie(&self) -> &Arc<PathTrie> {
        &self.trie
    }

    /// Drop all sync history for a player, e.g. on leave, so a later
    /// rejoin with the same id starts from a clean first sync.
    pub fn forget(&self, player: PlayerId) {
        self.players
            .lock()
            .expect("sync engine mutex poisoned")
            .remove(&player);
    }

    fn project_fields(&self, state: &dyn StateTree, target: Option<PlayerId>) -> serde_json::Map<String, Value> {
        let mut out = serde_json::Map::new();
        for meta in state.field_metas() {
            let raw = state.raw_value(meta.name);
            let projected = match &meta.policy {
                SyncPolicy::Broadcast => Some(raw),
                SyncPolicy::ServerOnly => None,
                SyncPolicy::PerPlayer => Some(match target {
                    Some(player) => project_per_player(&raw, player),
                    None => raw,
                }),
                SyncPolicy::Masked(transform) => Some(transform(&raw, target)),
            };
            if let Some(value) = projected {
                out.insert(meta.name.to_string(), value);
            }
        }
        out
    }

    /// Produce a full snapshot for `target` (or a server-side dump when
    /// `target` is `None`).
    pub fn snapshot(&self, state: &dyn StateTree, target: Option<PlayerId>, encoding: Encoding) -> StateSnapshot {
        StateSnapshot {
            land_type: self.land_type,
            player_id: target,
            encoding,
            fields: self.project_fields(state, target),
        }
    }

    /// Compute this cycle's update for `target`: a `FirstSync` snapshot if
    /// this is the player's first call, a `Diff` against the previous
    /// projection otherwise, or `NoChange` if nothing moved.
    pub fn sync(&self, state: &dyn StateTree, target: PlayerId) -> StateUpdate {
        let current = self.project_fields(state, Some(target));

        let mut players = self.players.lock().expect("sync engine mutex poisoned");
        let entry = players.entry(target).or_default();

        if !entry.first_sync_done {
            entry.first_sync_done = true;
            entry.last_projection = current.clone();
            return StateUpdate {
                kind: UpdateKind::FirstSync,
                patches: current
                    .into_iter()
                    .map(|(k, v)| PatchOp {
                        kind: OpKind::Add,
                        path: PathRepr::Literal(k),
                        value: Some(v),
                    })
                    .collect(),
            };
        }

        let prev_value = Value::Object(entry.last_projection.clone());
        let curr_value = Value::Object(current.clone());
        let mut raw_ops = Vec::new();
        diff_values(&prev_value, &curr_value, &[], &mut raw_ops);

        entry.last_projection = current;

        if raw_ops.is_empty() {
            return StateUpdate {
                kind: UpdateKind::NoChange,
                patches: Vec::new(),
            };
        }

        let patches = raw_ops.into_iter().map(|op| self.encode_op(op)).collect();

        StateUpdate {
            kind: UpdateKind::Diff,
            patches,
        }
    }

    fn encode_op(&self, op: RawOp) -> PatchOp {
        let segments: Vec<&str> = op.path.iter().map(String::as_str).collect();
        let encoded = self.trie.encode(&segments);
        let path = if encoded.dynamic_keys.is_empty() && self.trie.decode(encoded.hash, &[]).is_none() {
            // No trie entry at all matched (not even the heuristic covers a
            // single fixed segment meaningfully) — keep the path literal so
            // a decoder without the schema can still apply it.
            PathRepr::Literal(op.path.join("."))
        } else {
            PathRepr::Hashed {
                hash: encoded.hash,
                dynamic_keys: encoded.dynamic_keys,
            }
        };
        PatchOp {
            kind: op.kind,
            path,
            value: op.value,
        }
    }
}

fn project_per_player(raw: &Value, target: PlayerId) -> Value {
    let Value::Object(map) = raw else {
        return Value::Object(Default::default());
    };
    let key = target.to_string();
    let mut out = serde_json::Map::new();
    if let Some(v) = map.get(&key) {
        out.insert(key, v.clone());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct DemoState {
        tick: Mutex<i64>,
        private_states: Mutex<HashMap<PlayerId, i64>>,
    }

    impl StateTree for DemoState {
        fn field_metas(&self) -> &[FieldMeta] {
            // `Box::leak` keeps this test self-contained; production state
            // trees return a `static` table computed once at registration.
            Box::leak(Box::new([
                FieldMeta::broadcast("tick"),
                FieldMeta::per_player("privateStates"),
            ]))
        }

        fn raw_value(&self, field: &str) -> Value {
            match field {
                "tick" => json!(*self.tick.lock().unwrap()),
                "privateStates" => {
                    let map: serde_json::Map<String, Value> = self
                        .private_states
                        .lock()
                        .unwrap()
                        .iter()
                        .map(|(id, score)| (id.to_string(), json!({"score": score})))
                        .collect();
                    Value::Object(map)
                }
                _ => Value::Null,
            }
        }
    }

    #[test]
    fn per_player_field_is_isolated_between_players() {
        let state = DemoState {
            tick: Mutex::new(2),
            private_states: Mutex::new(HashMap::from([
                (PlayerId(1), 0),
                (PlayerId(2), 0),
            ])),
        };
        let engine = SyncEngine::new("demo", ["tick", "privateStates.*.score"]);

        let p1 = engine.snapshot(&state, Some(PlayerId(1)), Encoding::Json);
        let p2 = engine.snapshot(&state, Some(PlayerId(2)), Encoding::Json);

        let p1_private = p1.fields.get("privateStates").unwrap();
        assert!(p1_private.get("1").is_some());
        assert!(p1_private.get("2").is_none());

        let p2_private = p2.fields.get("privateStates").unwrap();
        assert!(p2_private.get("2").is_some());
        assert!(p2_private.get("1").is_none());
    }

    #[test]
    fn server_only_field_never_appears_in_projection() {
        struct Secret;
        impl StateTree for Secret {
            fn field_metas(&self) -> &[FieldMeta] {
                Box::leak(Box::new([FieldMeta::server_only("internal")]))
            }
            fn raw_value(&self, _field: &str) -> Value {
                json!("leaked-if-this-appears")
            }
        }

        let engine = SyncEngine::new("demo", []);
        let snap = engine.snapshot(&Secret, Some(PlayerId(1)), Encoding::Json);
        assert!(snap.fields.is_empty());
    }

    #[test]
    fn first_sync_then_diff_sequence() {
        let state = DemoState {
            tick: Mutex::new(0),
            private_states: Mutex::new(HashMap::from([(PlayerId(1), 0)])),
        };
        let engine = SyncEngine::new("demo", ["tick"]);

        let first = engine.sync(&state, PlayerId(1));
        assert_eq!(first.kind, UpdateKind::FirstSync);

        let no_change = engine.sync(&state, PlayerId(1));
        assert_eq!(no_change.kind, UpdateKind::NoChange);

        *state.tick.lock().unwrap() = 1;
        let diff = engine.sync(&state, PlayerId(1));
        assert_eq!(diff.kind, UpdateKind::Diff);
    }
}
