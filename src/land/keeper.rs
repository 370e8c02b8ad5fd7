//! The tick scheduler. One [`LandKeeper`] per land instance, each its own
//! OS thread with an exclusive mailbox — no locking inside a land, ever,
//! because nothing outside its thread can touch its state directly.
//!
//! The tick loop reschedules off `prev_fire + interval` rather than
//! `now + interval` after each tick, so a slow tick (GC pause, a burst of
//! actions) doesn't push every later tick back by the same amount; ticks
//! are simply skipped to catch back up, never queued.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures::channel::oneshot;

use crate::api::error::{DispatchError, JoinError};
use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::context::{LandContext, Outbox, PendingTimer};
use crate::land::hooks::{Hooks, JoinResult};
use crate::land::rng::RngService;
use crate::land::session::Session;
use crate::sync::{Encoding, SyncEngine};

enum Mailbox<H: Hooks> {
    Join {
        player: PlayerId,
        session: SessionId,
        encoding: Encoding,
        reply: oneshot::Sender<JoinResult>,
    },
    Leave {
        player: PlayerId,
    },
    Action {
        player: PlayerId,
        type_ident: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, DispatchError>>,
    },
    Event {
        player: PlayerId,
        type_ident: String,
        payload: Vec<u8>,
    },
    Retire {
        reply: oneshot::Sender<()>,
    },
    _Marker(std::marker::PhantomData<H>),
}

/// Tuning knobs for a running land instance. `tick_interval` drives
/// [`Hooks::tick`]; `known_patterns` seeds the land's [`SyncEngine`] path
/// trie with every dynamic field path the state tree can emit.
pub struct KeeperSettings {
    pub tick_interval: Duration,
    pub known_patterns: Vec<&'static str>,
    pub rng_seed: u64,
}

/// A cheaply cloneable reference to a running land's mailbox. Dropping
/// every handle does not stop the land — only an explicit [`LandHandle::retire`]
/// (or the process exiting) does, matching the "explicit retirement" model
/// a multi-room router needs to avoid tearing down a land mid-action.
pub struct LandHandle<H: Hooks> {
    land_id: LandId,
    tx: Sender<Mailbox<H>>,
    _thread: Arc<JoinHandle<()>>,
}

impl<H: Hooks> Clone for LandHandle<H> {
    fn clone(&self) -> Self {
        Self {
            land_id: self.land_id.clone(),
            tx: self.tx.clone(),
            _thread: Arc::clone(&self._thread),
        }
    }
}

impl<H: Hooks> LandHandle<H> {
    pub fn land_id(&self) -> &LandId {
        &self.land_id
    }

    /// `candidate` is the id the transport minted for the connection; the
    /// `Ok` id returned is whatever [`Hooks::can_join`] actually installed,
    /// which callers must use for every subsequent call on this session.
    pub async fn join(&self, candidate: PlayerId, session: SessionId, encoding: Encoding) -> JoinResult {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Mailbox::Join {
                player: candidate,
                session,
                encoding,
                reply,
            })
            .is_err()
        {
            return Err(JoinError::LandNotFound);
        }
        rx.await.unwrap_or(Err(JoinError::LandNotFound))
    }

    pub fn leave(&self, player: PlayerId) {
        let _ = self.tx.send(Mailbox::Leave { player });
    }

    pub async fn action(
        &self,
        player: PlayerId,
        type_ident: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Mailbox::Action {
                player,
                type_ident: type_ident.into(),
                payload,
                reply,
            })
            .is_err()
        {
            return Err(DispatchError::HandlerError("land stopped".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(DispatchError::HandlerError("land stopped".to_string())))
    }

    pub fn event(&self, player: PlayerId, type_ident: impl Into<String>, payload: Vec<u8>) {
        let _ = self.tx.send(Mailbox::Event {
            player,
            type_ident: type_ident.into(),
            payload,
        });
    }

    pub async fn retire(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Mailbox::Retire { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct LandKeeper;

impl LandKeeper {
    /// Spawns the actor thread and returns a handle to it. `hooks` is the
    /// already-built per-instance state (its `Options` were consumed by the
    /// caller via [`Hooks::build`]); this function only owns scheduling.
    pub fn spawn<H: Hooks>(
        land_id: LandId,
        mut hooks: H,
        outbox: Arc<dyn Outbox>,
        settings: KeeperSettings,
    ) -> LandHandle<H> {
        let (tx, rx) = mpsc::channel::<Mailbox<H>>();
        let spawned_land_id = land_id.clone();

        let thread = thread::spawn(move || {
            let mut sessions: std::collections::HashMap<PlayerId, (Session, Encoding)> =
                Default::default();
            let mut rng = RngService::new(settings.rng_seed);
            let mut timers: Vec<PendingTimer> = Vec::new();
            let sync_engine = SyncEngine::new(spawned_land_id.land_type, settings.known_patterns.clone());
            let mut tick: u64 = 0;
            let mut next_fire = Instant::now() + settings.tick_interval;

            loop {
                let now = Instant::now();
                let wait = next_fire.saturating_duration_since(now);
                match rx.recv_timeout(wait) {
                    Ok(Mailbox::Join {
                        player,
                        session,
                        encoding,
                        reply,
                    }) => {
                        let mut sync_requested = false;
                        let mut ctx = LandContext::new(
                            &spawned_land_id,
                            tick,
                            settings.tick_interval,
                            &mut rng,
                            outbox.as_ref(),
                            &mut timers,
                            &mut sync_requested,
                        );
                        let result = hooks.can_join(&ctx, player);
                        if let Ok(assigned) = result {
                            sessions.insert(assigned, (Session::new(assigned, session, tick), encoding));
                            hooks.on_join(&ctx, assigned);
                            drop(ctx);
                            let snapshot = sync_engine.snapshot(&hooks, Some(assigned), encoding);
                            outbox.push_snapshot(assigned, snapshot);
                        }
                        let _ = reply.send(result);
                        if sync_requested {
                            run_sync_cycle(&hooks, &sessions, &sync_engine, outbox.as_ref());
                        }
                    }
                    Ok(Mailbox::Leave { player }) => {
                        if sessions.remove(&player).is_some() {
                            let mut sync_requested = false;
                            let ctx = LandContext::new(
                                &spawned_land_id,
                                tick,
                                settings.tick_interval,
                                &mut rng,
                                outbox.as_ref(),
                                &mut timers,
                                &mut sync_requested,
                            );
                            hooks.on_leave(&ctx, player);
                            sync_engine.forget(player);
                            if sync_requested {
                                run_sync_cycle(&hooks, &sessions, &sync_engine, outbox.as_ref());
                            }
                        }
                    }
                    Ok(Mailbox::Action {
                        player,
                        type_ident,
                        payload,
                        reply,
                    }) => {
                        let mut sync_requested = false;
                        let ctx = LandContext::new(
                            &spawned_land_id,
                            tick,
                            settings.tick_interval,
                            &mut rng,
                            outbox.as_ref(),
                            &mut timers,
                            &mut sync_requested,
                        );
                        let result = hooks.dispatch_action(&ctx, player, &type_ident, &payload);
                        let _ = reply.send(result);
                        if sync_requested {
                            run_sync_cycle(&hooks, &sessions, &sync_engine, outbox.as_ref());
                        }
                    }
                    Ok(Mailbox::Event {
                        player,
                        type_ident,
                        payload,
                    }) => {
                        let mut sync_requested = false;
                        let ctx = LandContext::new(
                            &spawned_land_id,
                            tick,
                            settings.tick_interval,
                            &mut rng,
                            outbox.as_ref(),
                            &mut timers,
                            &mut sync_requested,
                        );
                        hooks.dispatch_event(&ctx, player, &type_ident, &payload);
                        if sync_requested {
                            run_sync_cycle(&hooks, &sessions, &sync_engine, outbox.as_ref());
                        }
                    }
                    Ok(Mailbox::Retire { reply }) => {
                        let _ = reply.send(());
                        return;
                    }
                    Ok(Mailbox::_Marker(_)) => unreachable!(),
                    Err(RecvTimeoutError::Timeout) => {
                        let mut sync_requested = false;
                        run_due_timers(
                            &mut hooks,
                            &spawned_land_id,
                            tick,
                            settings.tick_interval,
                            &mut rng,
                            outbox.as_ref(),
                            &mut timers,
                        );

                        let ctx = LandContext::new(
                            &spawned_land_id,
                            tick,
                            settings.tick_interval,
                            &mut rng,
                            outbox.as_ref(),
                            &mut timers,
                            &mut sync_requested,
                        );
                        hooks.tick(&ctx);

                        run_sync_cycle(&hooks, &sessions, &sync_engine, outbox.as_ref());

                        tick += 1;
                        next_fire += settings.tick_interval;
                        if next_fire < Instant::now() {
                            next_fire = Instant::now() + settings.tick_interval;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        LandHandle {
            land_id,
            tx,
            _thread: Arc::new(thread),
        }
    }
}

/// Pushes each attached session's diff (or first sync) through `outbox`.
/// Shared by the regular tick cadence and any handler that called
/// [`LandContext::sync_now`] to force an out-of-cycle cycle.
fn run_sync_cycle<H: Hooks>(
    hooks: &H,
    sessions: &std::collections::HashMap<PlayerId, (Session, Encoding)>,
    sync_engine: &SyncEngine,
    outbox: &dyn Outbox,
) {
    for (player, (_, encoding)) in sessions.iter() {
        let update = sync_engine.sync(hooks, *player);
        outbox.push_update(*player, update);
        let _ = encoding;
    }
}

fn run_due_timers<H: Hooks>(
    hooks: &mut H,
    land_id: &LandId,
    tick: u64,
    tick_interval: Duration,
    rng: &mut RngService,
    outbox: &dyn Outbox,
    timers: &mut Vec<PendingTimer>,
) {
    let (due, pending): (Vec<_>, Vec<_>) = timers.drain(..).partition(|t| t.due_tick <= tick);
    *timers = pending;
    for timer in due {
        let mut sync_requested = false;
        let ctx = LandContext::new(land_id, tick, tick_interval, rng, outbox, timers, &mut sync_requested);
        hooks.dispatch_event(&ctx, PlayerId(0), timer.label, &[]);
    }
}
