//! Deterministic replay: re-runs a recorded action stream against a land
//! type's own keeper factory (registered as its `<landType>-replay` alias)
//! and captures a per-push state hash stream, for comparison against the
//! hashes captured during the original live run.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::{EventTarget, Outbox};
use crate::sync::{Encoding, StateSnapshot, StateUpdate};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedAction {
    pub tick: u64,
    pub player: u64,
    pub type_ident: String,
    pub payload: Vec<u8>,
}

/// A recorded session: the join payload the land was built with and every
/// action dispatched against it afterward, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub seed: u64,
    pub join_payload: Option<Vec<u8>>,
    pub actions: Vec<RecordedAction>,
}

/// The hash stream a replay produced, for the caller to diff against the
/// hashes recorded during the original run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub state_hashes: Vec<u64>,
}

/// Records every pushed snapshot/update as a hash instead of delivering it
/// anywhere; a replay run has no real transport to push to.
#[derive(Default)]
struct HashingOutbox {
    hashes: Mutex<Vec<u64>>,
}

impl Outbox for HashingOutbox {
    fn dispatch_event(&self, _target: EventTarget, _type_ident: &'static str, _payload: Vec<u8>) {}

    fn push_snapshot(&self, _player: PlayerId, snapshot: StateSnapshot) {
        self.hashes.lock().expect("hashing outbox poisoned").push(hash_json(&snapshot));
    }

    fn push_update(&self, _player: PlayerId, update: StateUpdate) {
        if matches!(update.kind, crate::sync::UpdateKind::NoChange) {
            return;
        }
        self.hashes.lock().expect("hashing outbox poisoned").push(hash_json(&update));
    }

    fn close(&self, _player: PlayerId, _code: u16, _reason: &'static str) {}
}

fn hash_json<T: Serialize>(value: &T) -> u64 {
    use std::hash::{Hash, Hasher};
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Spins up a fresh instance of `land_id`'s registered type (expected to be
/// a `<landType>-replay` alias), replays every recorded action against it
/// in order, and returns the hashes captured from each snapshot/update push
/// along the way. The replay land is never retired by this function —
/// callers own its lifetime through the same [`super::LandRouter`] machinery
/// a live join would use.
pub(super) async fn run_replay(
    types: &super::LandTypeRegistry,
    land_id: LandId,
    recording: Recording,
) -> Result<ReplayOutcome, crate::api::error::JoinError> {
    let outbox: Arc<HashingOutbox> = Arc::default();
    let outbox_dyn: Arc<dyn Outbox> = outbox.clone();
    let handle = types.create(&land_id, outbox_dyn, recording.join_payload)?;

    let player = PlayerId(1);
    let session = SessionId(1);
    handle.join(player, session, Encoding::Json).await?;

    for action in recording.actions {
        let _ = handle
            .action(PlayerId(action.player), action.type_ident, action.payload)
            .await;
    }

    handle.retire().await;

    let hashes = std::mem::take(&mut *outbox.hashes.lock().expect("hashing outbox poisoned"));
    Ok(ReplayOutcome { state_hashes: hashes })
}
