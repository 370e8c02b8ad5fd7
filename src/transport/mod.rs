//! Transport-agnostic session plumbing: enforces the pre-join protocol
//! rule (nothing but a `join` envelope is valid before a player has been
//! admitted to a land), owns the bounded outbound queue per session, and
//! implements [`crate::land::Outbox`] against whichever land a session is
//! currently a member of.

#[cfg(feature = "ws")]
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, watch};

use crate::api::error::TransportError;
use crate::api::message::{OutboundEnvelope, WireError};
use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::{EventTarget, Outbox};
use crate::sync::{Encoding, StateSnapshot, StateUpdate};

/// Frames queued per connection before the socket write side drains them.
/// Sized small deliberately: a session that can't keep up with its own
/// land's tick rate is backpressure the land can't absorb, so it's treated
/// as a fatal [`TransportError::SlowConsumer`] rather than buffered
/// indefinitely.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct SessionEntry {
    session_id: SessionId,
    land_id: LandId,
    user_id: Option<u64>,
    tx: mpsc::Sender<OutboundEnvelope>,
    /// Diffs are sent through a `watch` instead of `tx`: a diff that
    /// arrives while the previous one is still unread simply overwrites
    /// it, which is exactly the "coalesce a diff when a newer diff is
    /// already enqueued" rule a bounded queue can't express on its own.
    update_tx: watch::Sender<Option<StateUpdate>>,
}

/// Router-facing callbacks a transport drives once an envelope has been
/// decoded off the wire. Implemented by [`crate::realm::LandRouter`];
/// transports depend only on this trait so the module graph stays acyclic.
#[async_trait::async_trait]
pub trait InboundRouter: Send + Sync {
    async fn join(
        &self,
        candidate: PlayerId,
        session: SessionId,
        land_type: String,
        instance_id: Option<String>,
        payload: Option<Vec<u8>>,
        encoding: Encoding,
        outbox: Arc<SessionRegistry>,
    ) -> Result<(LandId, PlayerId), WireError>;

    async fn action(
        &self,
        land_id: &LandId,
        player: PlayerId,
        type_ident: String,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, WireError>;

    fn event(&self, land_id: &LandId, player: PlayerId, type_ident: String, payload: Vec<u8>);

    fn leave(&self, land_id: &LandId, player: PlayerId);
}

/// The two halves of a registered session's outbound path: everything that
/// must be delivered in full (actions, events, snapshots, errors, close)
/// goes through `frames`; sync diffs, which may be coalesced, go through
/// `updates`.
pub struct OutboundChannels {
    pub frames: mpsc::Receiver<OutboundEnvelope>,
    pub updates: watch::Receiver<Option<StateUpdate>>,
}

/// Tracks every live session's outbound queue and which land it currently
/// belongs to, and is the concrete [`Outbox`] a land keeper pushes
/// snapshots/updates/events into.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<PlayerId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A fresh per-connection outbound channel pair. The transport owns the
    /// receiving halves and drains them onto the socket.
    pub fn register(
        &self,
        player: PlayerId,
        session_id: SessionId,
        land_id: LandId,
        user_id: Option<u64>,
    ) -> OutboundChannels {
        let (tx, frames) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (update_tx, updates) = watch::channel(None);
        self.sessions.write().expect("session registry poisoned").insert(
            player,
            SessionEntry {
                session_id,
                land_id,
                user_id,
                tx,
                update_tx,
            },
        );
        OutboundChannels { frames, updates }
    }

    pub fn unregister(&self, player: PlayerId) {
        self.sessions.write().expect("session registry poisoned").remove(&player);
    }

    /// The player currently holding `session_id`, if any. `Close`/event
    /// targeting by session id goes through this lookup since sessions are
    /// indexed by player id internally.
    fn player_for_session(&self, session_id: SessionId) -> Option<PlayerId> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .iter()
            .find(|(_, entry)| entry.session_id == session_id)
            .map(|(player, _)| *player)
    }

    pub fn push_action_response(
        &self,
        player: PlayerId,
        request_id: String,
        result: Result<Vec<u8>, WireError>,
    ) {
        self.try_push(
            player,
            OutboundEnvelope::ActionResponse {
                v: crate::api::message::ENVELOPE_VERSION,
                request_id,
                result,
            },
        );
    }

    /// Queues `envelope` for `player`; on overflow the session is fatal and
    /// told so via a `Close` frame with the slow-consumer close code rather
    /// than silently dropping the frame that triggered it.
    fn try_push(&self, player: PlayerId, envelope: OutboundEnvelope) {
        let sessions = self.sessions.read().expect("session registry poisoned");
        let Some(entry) = sessions.get(&player) else {
            return;
        };
        if entry.tx.try_send(envelope).is_err() {
            let _ = entry.tx.try_send(OutboundEnvelope::close(
                TransportError::SlowConsumer.close_code(),
                "outbound queue overflowed",
            ));
        }
    }

    /// Closes every session currently registered under `user_id`. A user
    /// only ever holds one session under normal operation; this exists for
    /// the cluster-lease eviction path, which identifies the session to
    /// close by user id rather than by player id (the evicting node doesn't
    /// know the evicted session's per-land player id).
    pub fn close_user(&self, user_id: u64, code: u16, reason: &'static str) {
        let players: Vec<PlayerId> = self
            .sessions
            .read()
            .expect("session registry poisoned")
            .iter()
            .filter(|(_, entry)| entry.user_id == Some(user_id))
            .map(|(player, _)| *player)
            .collect();
        for player in players {
            self.close(player, code, reason);
        }
    }

    fn push_event(&self, player: PlayerId, type_ident: &'static str, payload: Vec<u8>) {
        self.try_push(
            player,
            OutboundEnvelope::Event {
                v: crate::api::message::ENVELOPE_VERSION,
                direction: crate::api::message::EventDirection::FromServer,
                type_ident: type_ident.to_string(),
                payload,
            },
        );
    }
}

impl Outbox for SessionRegistry {
    fn dispatch_event(&self, target: EventTarget, type_ident: &'static str, payload: Vec<u8>) {
        match target {
            EventTarget::All => {
                let players: Vec<PlayerId> = self
                    .sessions
                    .read()
                    .expect("session registry poisoned")
                    .keys()
                    .copied()
                    .collect();
                for player in players {
                    self.push_event(player, type_ident, payload.clone());
                }
            }
            EventTarget::Player(player) => self.push_event(player, type_ident, payload),
            EventTarget::Session(session_id) => {
                if let Some(player) = self.player_for_session(session_id) {
                    self.push_event(player, type_ident, payload);
                }
            }
            EventTarget::Filter(matches) => {
                let players: Vec<PlayerId> = self
                    .sessions
                    .read()
                    .expect("session registry poisoned")
                    .keys()
                    .copied()
                    .filter(|player| matches(*player))
                    .collect();
                for player in players {
                    self.push_event(player, type_ident, payload.clone());
                }
            }
        }
    }

    fn push_snapshot(&self, player: PlayerId, snapshot: StateSnapshot) {
        self.try_push(
            player,
            OutboundEnvelope::Snapshot {
                v: crate::api::message::ENVELOPE_VERSION,
                snapshot,
            },
        );
    }

    fn push_update(&self, player: PlayerId, update: StateUpdate) {
        if matches!(update.kind, crate::sync::UpdateKind::NoChange) {
            return;
        }
        let sessions = self.sessions.read().expect("session registry poisoned");
        let Some(entry) = sessions.get(&player) else {
            return;
        };
        // `watch::Sender::send` overwrites whatever the receiver hasn't
        // picked up yet — that's the coalescing, for free.
        let _ = entry.update_tx.send(Some(update));
    }

    fn close(&self, player: PlayerId, code: u16, reason: &'static str) {
        self.try_push(player, OutboundEnvelope::close(code, reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registering_a_session_yields_a_queue_that_receives_pushes() {
        let registry = SessionRegistry::new();
        let mut channels = registry.register(PlayerId(1), SessionId(1), LandId::new("demo", "a"), None);
        registry.dispatch_event(EventTarget::Player(PlayerId(1)), "ping", b"{}".to_vec());
        let frame = channels.frames.recv().await.unwrap();
        assert!(matches!(frame, OutboundEnvelope::Event { .. }));
    }

    #[tokio::test]
    async fn no_change_updates_are_not_pushed() {
        let registry = SessionRegistry::new();
        let mut channels = registry.register(PlayerId(1), SessionId(1), LandId::new("demo", "a"), None);
        registry.push_update(
            PlayerId(1),
            StateUpdate {
                kind: crate::sync::UpdateKind::NoChange,
                patches: vec![],
            },
        );
        assert!(!channels.updates.has_changed().unwrap_or(false));
    }

    #[tokio::test]
    async fn a_newer_diff_overwrites_one_the_reader_has_not_consumed_yet() {
        let registry = SessionRegistry::new();
        let mut channels = registry.register(PlayerId(1), SessionId(1), LandId::new("demo", "a"), None);
        let stale = StateUpdate {
            kind: crate::sync::UpdateKind::Diff,
            patches: vec![],
        };
        let fresh = StateUpdate {
            kind: crate::sync::UpdateKind::FirstSync,
            patches: vec![],
        };
        registry.push_update(PlayerId(1), stale);
        registry.push_update(PlayerId(1), fresh);

        channels.updates.changed().await.unwrap();
        let latest = channels.updates.borrow_and_update().clone().unwrap();
        assert_eq!(latest.kind, crate::sync::UpdateKind::FirstSync);
        assert!(!channels.updates.has_changed().unwrap_or(false));
    }

    #[tokio::test]
    async fn dispatch_event_by_session_id_resolves_the_owning_player() {
        let registry = SessionRegistry::new();
        let mut channels = registry.register(PlayerId(9), SessionId(42), LandId::new("demo", "a"), None);
        registry.dispatch_event(EventTarget::Session(SessionId(42)), "ping", b"{}".to_vec());
        let frame = channels.frames.recv().await.unwrap();
        assert!(matches!(frame, OutboundEnvelope::Event { .. }));
    }
}
