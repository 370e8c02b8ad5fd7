//! The handler contract a land type implements: who may join, what happens
//! on join/leave, what runs every tick, and how typed actions/events are
//! dispatched. One `HooksFactory` is registered per land type with
//! [`crate::realm::LandTypeRegistry`]; a fresh `Hooks` instance is built
//! per land instance.

use std::collections::HashMap;

use serde_json::Value;

use crate::api::error::{DispatchError, JoinError};
use crate::ids::{LandId, PlayerId};
use crate::land::context::LandContext;
use crate::sync::StateTree;

/// `Ok(playerId)` carries the id actually installed for this join, which
/// may differ from the candidate id the transport minted — a land's
/// `CanJoin` is the sole authority that assigns (or derives) a player's
/// identity within itself.
pub type JoinResult = Result<PlayerId, JoinError>;

/// Per-land-instance handler state. `Options` is the payload carried by the
/// join/create request that started this instance; `Action`/`Event` are the
/// typed identifiers a land's handler table dispatches on. A `Hooks` is
/// also a [`StateTree`]: the same object that mutates the land's state is
/// what the sync engine diffs every tick.
pub trait Hooks: StateTree + Send + 'static {
    type Options: Default + Send;

    fn build(land_id: &LandId, options: Self::Options) -> Self
    where
        Self: Sized;

    /// Authorization gate, called before a player is admitted. Runs with
    /// the land's exclusive mailbox access, so it may read/adjust state
    /// (e.g. reserve a seat) as part of the decision. `candidate` is the
    /// id the transport minted for the connection; the default accepts it
    /// unchanged, but an implementation may return a different (derived)
    /// id — the one actually installed in the state tree and used for the
    /// rest of the session's lifetime.
    fn can_join(&mut self, ctx: &LandContext, candidate: PlayerId) -> JoinResult {
        let _ = ctx;
        Ok(candidate)
    }

    fn on_join(&mut self, ctx: &LandContext, player: PlayerId) {
        let _ = (ctx, player);
    }

    fn on_leave(&mut self, ctx: &LandContext, player: PlayerId) {
        let _ = (ctx, player);
    }

    /// Runs once per tick, after every action queued since the previous
    /// tick has been dispatched.
    fn tick(&mut self, ctx: &LandContext) {
        let _ = ctx;
    }

    fn dispatch_action(
        &mut self,
        ctx: &LandContext,
        player: PlayerId,
        type_ident: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, DispatchError>;

    fn dispatch_event(&mut self, ctx: &LandContext, player: PlayerId, type_ident: &str, payload: &[u8]) {
        let _ = (ctx, player, type_ident, payload);
    }
}

/// A typed action handler, registered by name in a land's handler table.
/// `Req`/`Resp` are (de)serialized at the table boundary so individual
/// handlers work with plain Rust types instead of raw bytes.
pub type ActionHandler<S> = Box<
    dyn Fn(&mut S, &LandContext, PlayerId, Value) -> Result<Value, DispatchError> + Send + Sync,
>;

/// Maps action type identifiers to handlers, decoding/encoding the JSON
/// payload at the boundary so [`Hooks::dispatch_action`] implementations
/// can be a single table lookup instead of a hand-rolled match arm per
/// action.
pub struct ActionTable<S> {
    handlers: HashMap<&'static str, ActionHandler<S>>,
}

impl<S> Default for ActionTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> ActionTable<S> {
    pub fn register(
        &mut self,
        type_ident: &'static str,
        handler: impl Fn(&mut S, &LandContext, PlayerId, Value) -> Result<Value, DispatchError>
        + Send
        + Sync
        + 'static,
    ) {
        self.handlers.insert(type_ident, Box::new(handler));
    }

    pub fn dispatch(
        &self,
        state: &mut S,
        ctx: &LandContext,
        player: PlayerId,
        type_ident: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        let handler = self
            .handlers
            .get(type_ident)
            .ok_or(DispatchError::UnknownAction)?;
        let request: Value = serde_json::from_slice(payload).map_err(|_| DispatchError::DecodeFailed)?;
        let response = handler(state, ctx, player, request)?;
        serde_json::to_vec(&response).map_err(|_| DispatchError::DecodeFailed)
    }
}
