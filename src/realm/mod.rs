//! Multi-room routing: maps `(landType, instanceId)` to a running
//! [`crate::land::LandHandle`], creates instances on demand per land type's
//! auto-create policy, and retires an instance once it has been empty for
//! [`LandRouter`]'s configured grace period.

mod replay;

pub use replay::{RecordedAction, Recording, ReplayOutcome};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::api::error::{DispatchError, JoinError};
use crate::api::message::WireError;
use crate::ids::{LandId, PlayerId, SessionId};
use crate::land::context::Outbox;
use crate::land::hooks::Hooks;
use crate::land::keeper::{KeeperSettings, LandHandle, LandKeeper};
use crate::sync::Encoding;
use crate::transport::{InboundRouter, SessionRegistry};

/// A land instance's mailbox, erased of its concrete `Hooks` type so a
/// router can hold many land types in one map.
#[async_trait::async_trait]
pub trait ErasedLandHandle: Send + Sync {
    fn land_id(&self) -> &LandId;
    async fn join(&self, candidate: PlayerId, session: SessionId, encoding: Encoding) -> Result<PlayerId, JoinError>;
    fn leave(&self, player: PlayerId);
    async fn action(&self, player: PlayerId, type_ident: String, payload: Vec<u8>) -> Result<Vec<u8>, DispatchError>;
    fn event(&self, player: PlayerId, type_ident: String, payload: Vec<u8>);
    async fn retire(&self);
}

#[async_trait::async_trait]
impl<H: Hooks> ErasedLandHandle for LandHandle<H> {
    fn land_id(&self) -> &LandId {
        LandHandle::land_id(self)
    }

    async fn join(&self, candidate: PlayerId, session: SessionId, encoding: Encoding) -> Result<PlayerId, JoinError> {
        LandHandle::join(self, candidate, session, encoding).await
    }

    fn leave(&self, player: PlayerId) {
        LandHandle::leave(self, player);
    }

    async fn action(&self, player: PlayerId, type_ident: String, payload: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        LandHandle::action(self, player, type_ident, payload).await
    }

    fn event(&self, player: PlayerId, type_ident: String, payload: Vec<u8>) {
        LandHandle::event(self, player, type_ident, payload);
    }

    async fn retire(&self) {
        LandHandle::retire(self).await
    }
}

type LandFactory = Arc<
    dyn Fn(&LandId, Arc<dyn Outbox>, Option<Vec<u8>>) -> Result<Arc<dyn ErasedLandHandle>, JoinError>
        + Send
        + Sync,
>;

struct Registration {
    land_type: &'static str,
    auto_create: bool,
    /// The land type whose factory this registration actually runs.
    /// Equal to `land_type` for a primary registration; for a replay alias
    /// (see [`LandTypeRegistry::register_replay_alias`]) it names the
    /// primary type the alias was registered against, so a replay runner
    /// can confirm it is replaying the same definition a live land used.
    definition_id: &'static str,
    factory: LandFactory,
}

/// One registration per land type, made once at startup. Re-registering
/// the same type is rejected so a replayed startup script can't silently
/// swap a type's implementation out from under running instances.
#[derive(Default)]
pub struct LandTypeRegistry {
    registrations: RwLock<HashMap<&'static str, Registration>>,
}

impl LandTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `auto_create` controls whether a join naming an instance that
    /// doesn't exist yet creates one, versus failing with
    /// [`JoinError::LandNotFound`].
    pub fn register<H>(
        &self,
        land_type: &'static str,
        tick_interval: Duration,
        known_patterns: Vec<&'static str>,
        auto_create: bool,
    ) where
        H: Hooks,
        H::Options: DeserializeOwned,
    {
        let factory: LandFactory = Arc::new(move |land_id, outbox, payload| {
            let options: H::Options = match payload {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(|_| JoinError::Custom {
                    code: "badOptions".to_string(),
                    message: "join payload did not match this land type's options schema".to_string(),
                })?,
                None => H::Options::default(),
            };
            let hooks = H::build(land_id, options);
            let settings = KeeperSettings {
                tick_interval,
                known_patterns: known_patterns.clone(),
                rng_seed: rand::random(),
            };
            let handle = LandKeeper::spawn(land_id.clone(), hooks, outbox, settings);
            Ok(Arc::new(handle) as Arc<dyn ErasedLandHandle>)
        });

        let mut registrations = self.registrations.write().expect("registry poisoned");
        if registrations.contains_key(land_type) {
            panic!("land type `{land_type}` registered twice");
        }
        registrations.insert(
            land_type,
            Registration {
                land_type,
                auto_create,
                definition_id: land_type,
                factory,
            },
        );
    }

    /// Registers `alias` as a second name for `of`'s running factory, so a
    /// replay can be dispatched to `<landType>-replay` without re-running
    /// the join machinery against the live instance. `of` must already be
    /// registered; panics if `alias` is already taken, for the same reason
    /// [`Self::register`] panics on a duplicate land type.
    pub fn register_replay_alias(&self, alias: &'static str, of: &'static str) {
        let mut registrations = self.registrations.write().expect("registry poisoned");
        let Some(primary) = registrations.get(of) else {
            panic!("cannot register replay alias `{alias}`: `{of}` is not registered");
        };
        let definition_id = primary.definition_id;
        let factory = Arc::clone(&primary.factory);

        if registrations.contains_key(alias) {
            panic!("land type `{alias}` registered twice");
        }
        registrations.insert(
            alias,
            Registration {
                land_type: alias,
                auto_create: true,
                definition_id,
                factory,
            },
        );
    }

    fn resolve(&self, land_type: &str) -> Option<&'static str> {
        self.registrations
            .read()
            .expect("registry poisoned")
            .get(land_type)
            .map(|r| r.land_type)
    }

    fn allows_auto_create(&self, land_type: &'static str) -> bool {
        self.registrations
            .read()
            .expect("registry poisoned")
            .get(land_type)
            .map(|r| r.auto_create)
            .unwrap_or(false)
    }

    /// The primary land type `land_type`'s factory was registered under,
    /// or `None` if `land_type` isn't registered at all. A replay alias
    /// and its primary type share the same `definition_id`.
    pub fn definition_id(&self, land_type: &str) -> Option<&'static str> {
        self.registrations
            .read()
            .expect("registry poisoned")
            .get(land_type)
            .map(|r| r.definition_id)
    }

    pub fn create(
        &self,
        land_id: &LandId,
        outbox: Arc<dyn Outbox>,
        payload: Option<Vec<u8>>,
    ) -> Result<Arc<dyn ErasedLandHandle>, JoinError> {
        let registrations = self.registrations.read().expect("registry poisoned");
        let registration = registrations
            .get(land_id.land_type)
            .ok_or(JoinError::LandNotFound)?;
        (registration.factory)(land_id, outbox, payload)
    }
}

struct Instance {
    handle: Arc<dyn ErasedLandHandle>,
    members: AtomicUsize,
}

pub const DEFAULT_RETIREMENT_GRACE: Duration = Duration::from_secs(30);

/// Routes inbound envelopes to the right land instance, auto-creating or
/// rejecting per type policy, and sweeps empty instances after
/// `retirement_grace` of sitting idle.
pub struct LandRouter {
    types: LandTypeRegistry,
    instances: RwLock<HashMap<LandId, Arc<Instance>>>,
    retirement_grace: Duration,
    self_ref: Weak<LandRouter>,
}

impl LandRouter {
    pub fn new(types: LandTypeRegistry) -> Arc<Self> {
        Self::with_retirement_grace(types, DEFAULT_RETIREMENT_GRACE)
    }

    pub fn with_retirement_grace(types: LandTypeRegistry, grace: Duration) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            types,
            instances: RwLock::new(HashMap::new()),
            retirement_grace: grace,
            self_ref: self_ref.clone(),
        })
    }

    fn schedule_retirement_check(&self, land_id: LandId) {
        let Some(router) = self.self_ref.upgrade() else {
            return;
        };
        let grace = self.retirement_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let instance = {
                let instances = router.instances.read().expect("router poisoned");
                instances.get(&land_id).cloned()
            };
            let Some(instance) = instance else { return };
            if instance.members.load(Ordering::SeqCst) == 0 {
                instance.handle.retire().await;
                router.instances.write().expect("router poisoned").remove(&land_id);
            }
        });
    }
}

#[async_trait::async_trait]
impl InboundRouter for LandRouter {
    async fn join(
        &self,
        candidate: PlayerId,
        session: SessionId,
        land_type: String,
        instance_id: Option<String>,
        payload: Option<Vec<u8>>,
        encoding: Encoding,
        outbox: Arc<SessionRegistry>,
    ) -> Result<(LandId, PlayerId), WireError> {
        let static_type = self
            .types
            .resolve(&land_type)
            .ok_or_else(|| WireError::new("landNotFound", "unknown land type", false))?;
        let land_id = LandId::new(static_type, instance_id.clone().unwrap_or_else(new_instance_id));

        let instance = {
            let instances = self.instances.read().expect("router poisoned");
            instances.get(&land_id).cloned()
        };

        let instance = match instance {
            Some(instance) => instance,
            None => {
                if instance_id.is_some() && !self.types.allows_auto_create(static_type) {
                    return Err(WireError::new("landNotFound", "no instance with that id", false));
                }
                let outbox_dyn: Arc<dyn Outbox> = outbox.clone();
                let handle = self
                    .types
                    .create(&land_id, outbox_dyn, payload)
                    .map_err(|err| WireError::new(err.code(), err.message(), false))?;
                let instance = Arc::new(Instance {
                    handle,
                    members: AtomicUsize::new(0),
                });
                self.instances
                    .write()
                    .expect("router poisoned")
                    .insert(land_id.clone(), Arc::clone(&instance));
                instance
            }
        };

        let assigned = instance
            .handle
            .join(candidate, session, encoding)
            .await
            .map_err(|err| WireError::new(err.code(), err.message(), false))?;
        instance.members.fetch_add(1, Ordering::SeqCst);

        Ok((land_id, assigned))
    }

    async fn action(
        &self,
        land_id: &LandId,
        player: PlayerId,
        type_ident: String,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, WireError> {
        let instance = {
            let instances = self.instances.read().expect("router poisoned");
            instances.get(land_id).cloned()
        };
        let Some(instance) = instance else {
            return Err(WireError::new("landNotFound", "land no longer running", false));
        };
        instance
            .handle
            .action(player, type_ident, payload)
            .await
            .map_err(WireError::from)
    }

    fn event(&self, land_id: &LandId, player: PlayerId, type_ident: String, payload: Vec<u8>) {
        let instances = self.instances.read().expect("router poisoned");
        if let Some(instance) = instances.get(land_id) {
            instance.handle.event(player, type_ident, payload);
        }
    }

    fn leave(&self, land_id: &LandId, player: PlayerId) {
        let instance = {
            let instances = self.instances.read().expect("router poisoned");
            instances.get(land_id).cloned()
        };
        let Some(instance) = instance else { return };
        instance.handle.leave(player);
        if instance.members.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.schedule_retirement_check(land_id.clone());
        }
    }
}

impl LandRouter {
    /// Resolves `land_type`'s `<landType>-replay` alias and replays
    /// `recording` against a fresh instance of it, returning the hash
    /// stream it produced. Fails with [`JoinError::LandNotFound`] if no
    /// such alias is registered, and with [`JoinError::Custom`] if the
    /// alias exists but was registered against a different definition than
    /// `land_type` itself — a sign the alias is stale after a redeploy.
    pub async fn replay(
        &self,
        land_type: &str,
        instance_id: String,
        recording: Recording,
    ) -> Result<ReplayOutcome, JoinError> {
        let alias = format!("{land_type}-replay");
        let primary_definition = self.types.definition_id(land_type).ok_or(JoinError::LandNotFound)?;
        let alias_type = self.types.resolve(&alias).ok_or(JoinError::LandNotFound)?;
        let alias_definition = self.types.definition_id(alias_type).ok_or(JoinError::LandNotFound)?;
        if alias_definition != primary_definition {
            return Err(JoinError::Custom {
                code: "staleReplayAlias".to_string(),
                message: format!("replay alias for `{land_type}` points at a different definition"),
            });
        }

        let land_id = LandId::new(alias_type, instance_id);
        replay::run_replay(&self.types, land_id, recording).await
    }
}

/// A snapshot of one running instance, for the admin surface.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LandSummary {
    pub land_type: &'static str,
    pub instance_id: String,
    pub member_count: usize,
}

impl LandRouter {
    pub fn list_lands(&self) -> Vec<LandSummary> {
        self.instances
            .read()
            .expect("router poisoned")
            .iter()
            .map(|(land_id, instance)| LandSummary {
                land_type: land_id.land_type,
                instance_id: land_id.instance_id.clone(),
                member_count: instance.members.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Forcibly retires a running instance regardless of member count,
    /// for operator-initiated shutdowns. Returns `false` if no such
    /// instance is running.
    pub async fn force_retire(&self, land_id: &LandId) -> bool {
        let instance = self.instances.write().expect("router poisoned").remove(land_id);
        let Some(instance) = instance else { return false };
        instance.handle.retire().await;
        true
    }

    /// Same as [`Self::force_retire`], but for callers (e.g. the admin
    /// REST surface) that only have the land type and instance id as
    /// plain strings rather than an already-resolved [`LandId`].
    pub async fn force_retire_by_ids(&self, land_type: &str, instance_id: &str) -> bool {
        let land_id = {
            let instances = self.instances.read().expect("router poisoned");
            instances
                .keys()
                .find(|id| id.land_type == land_type && id.instance_id == instance_id)
                .cloned()
        };
        match land_id {
            Some(land_id) => self.force_retire(&land_id).await,
            None => false,
        }
    }
}

fn new_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::DispatchError;
    use crate::land::context::LandContext;
    use crate::sync::{FieldMeta, StateTree};
    use std::time::Duration as StdDuration;

    #[derive(Default)]
    struct EchoLand {
        members: u32,
    }

    impl StateTree for EchoLand {
        fn field_metas(&self) -> &[FieldMeta] {
            &[]
        }
        fn raw_value(&self, _field: &str) -> serde_json::Value {
            serde_json::Value::Null
        }
    }

    impl Hooks for EchoLand {
        type Options = ();

        fn build(_land_id: &LandId, _options: Self::Options) -> Self {
            Self::default()
        }

        fn can_join(&mut self, _ctx: &LandContext, candidate: PlayerId) -> JoinResultAlias {
            if self.members >= 2 {
                return Err(JoinError::RoomFull);
            }
            self.members += 1;
            Ok(candidate)
        }

        fn dispatch_action(
            &mut self,
            _ctx: &LandContext,
            _player: PlayerId,
            _type_ident: &str,
            payload: &[u8],
        ) -> Result<Vec<u8>, DispatchError> {
            Ok(payload.to_vec())
        }
    }

    type JoinResultAlias = crate::land::hooks::JoinResult;

    fn make_router(auto_create: bool) -> Arc<LandRouter> {
        let types = LandTypeRegistry::new();
        types.register::<EchoLand>("echo", StdDuration::from_millis(20), vec![], auto_create);
        LandRouter::new(types)
    }

    fn session_outbox() -> Arc<SessionRegistry> {
        SessionRegistry::new()
    }

    #[tokio::test]
    async fn join_unknown_land_type_is_rejected() {
        let router = make_router(true);
        let outbox = session_outbox();
        let result = router
            .join(
                PlayerId(1),
                SessionId(1),
                "not-registered".to_string(),
                None,
                None,
                Encoding::Json,
                outbox,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn join_with_explicit_instance_and_auto_create_disabled_fails_when_missing() {
        let router = make_router(false);
        let outbox = session_outbox();
        let result = router
            .join(
                PlayerId(1),
                SessionId(1),
                "echo".to_string(),
                Some("missing-instance".to_string()),
                None,
                Encoding::Json,
                outbox,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn join_creates_instance_on_demand_when_auto_create_enabled() {
        let router = make_router(true);
        let outbox = session_outbox();
        let (land_id, player_id) = router
            .join(
                PlayerId(7),
                SessionId(1),
                "echo".to_string(),
                None,
                None,
                Encoding::Json,
                outbox,
            )
            .await
            .expect("join should succeed for a fresh instance");
        assert_eq!(land_id.land_type, "echo");
        assert_eq!(player_id, PlayerId(7));
        assert!(router.list_lands().iter().any(|l| l.instance_id == land_id.instance_id));
    }

    #[tokio::test]
    async fn force_retire_by_ids_removes_a_running_instance() {
        let router = make_router(true);
        let outbox = session_outbox();
        let (land_id, _) = router
            .join(
                PlayerId(1),
                SessionId(1),
                "echo".to_string(),
                None,
                None,
                Encoding::Json,
                outbox,
            )
            .await
            .unwrap();

        let removed = router.force_retire_by_ids("echo", &land_id.instance_id).await;
        assert!(removed);
        assert!(router.list_lands().is_empty());

        let removed_again = router.force_retire_by_ids("echo", &land_id.instance_id).await;
        assert!(!removed_again);
    }
}
