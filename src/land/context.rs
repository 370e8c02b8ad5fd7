//! The handle a [`super::hooks::Hooks`] implementation is given on every
//! callback: identity, current tick, the land's RNG, and a way to push
//! events/snapshots back out without knowing which transport a player is
//! actually connected over.

use std::time::Duration;

use serde_json::Value;

use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::rng::RngService;
use crate::sync::{StateSnapshot, StateUpdate};

/// A pending callback the keeper fires once `delay` has elapsed, surfaced
/// to hooks as [`super::hooks::Hooks::dispatch_event`] with `type_ident`
/// equal to `label` and an empty payload. Coarser than a full task
/// scheduler by design: a land only ever needs "fire this named timer
/// later", never arbitrary closures crossing the mailbox boundary.
#[derive(Debug, Clone)]
pub struct PendingTimer {
    pub label: &'static str,
    pub due_tick: u64,
}

/// Who a server event (or a forced close) fans out to.
pub enum EventTarget {
    /// Every attached session.
    All,
    /// The session with this id, if it's still attached.
    Session(SessionId),
    /// The player with this id, if it's still attached.
    Player(PlayerId),
    /// Every attached player for which the predicate returns `true`.
    Filter(Box<dyn Fn(PlayerId) -> bool + Send + Sync>),
}

/// Decouples a land from the concrete transport a player's session lives
/// on. [`crate::realm::LandRouter`] hands each land keeper an `Outbox`
/// backed by the real session registry; tests can hand in a recording
/// stub instead.
pub trait Outbox: Send + Sync {
    fn dispatch_event(&self, target: EventTarget, type_ident: &'static str, payload: Vec<u8>);
    fn push_snapshot(&self, player: PlayerId, snapshot: StateSnapshot);
    fn push_update(&self, player: PlayerId, update: StateUpdate);
    fn close(&self, player: PlayerId, code: u16, reason: &'static str);
}

pub struct LandContext<'a> {
    pub land_id: &'a LandId,
    pub tick: u64,
    pub tick_interval: Duration,
    rng: &'a mut RngService,
    outbox: &'a dyn Outbox,
    timers: &'a mut Vec<PendingTimer>,
    sync_requested: &'a mut bool,
}

impl<'a> LandContext<'a> {
    pub fn new(
        land_id: &'a LandId,
        tick: u64,
        tick_interval: Duration,
        rng: &'a mut RngService,
        outbox: &'a dyn Outbox,
        timers: &'a mut Vec<PendingTimer>,
        sync_requested: &'a mut bool,
    ) -> Self {
        Self {
            land_id,
            tick,
            tick_interval,
            rng,
            outbox,
            timers,
            sync_requested,
        }
    }

    pub fn rng(&mut self) -> &mut RngService {
        self.rng
    }

    pub fn send_event(&self, player: PlayerId, type_ident: &'static str, payload: Value) {
        self.send_server_event(EventTarget::Player(player), type_ident, payload);
    }

    pub fn broadcast_event(&self, type_ident: &'static str, payload: Value) {
        self.send_server_event(EventTarget::All, type_ident, payload);
    }

    /// General form of [`Self::send_event`]/[`Self::broadcast_event`]: fans
    /// out to whichever sessions `target` selects.
    pub fn send_server_event(&self, target: EventTarget, type_ident: &'static str, payload: Value) {
        self.outbox
            .dispatch_event(target, type_ident, serde_json::to_vec(&payload).unwrap_or_default());
    }

    pub fn kick(&self, player: PlayerId, code: u16, reason: &'static str) {
        self.outbox.close(player, code, reason);
    }

    /// Arms a named timer to fire after `after_ticks` more ticks. The
    /// keeper loop checks due timers once per tick and delivers them as a
    /// zero-payload event ahead of that tick's action batch.
    pub fn schedule_after(&mut self, label: &'static str, after_ticks: u64) {
        self.timers.push(PendingTimer {
            label,
            due_tick: self.tick + after_ticks.max(1),
        });
    }

    /// Forces a sync cycle for every attached session right after the
    /// current handler returns, instead of waiting for the next scheduled
    /// tick to pick the change up.
    pub fn sync_now(&mut self) {
        *self.sync_requested = true;
    }
}
