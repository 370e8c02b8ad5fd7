//! An authoritative, tick-driven runtime for realtime multiplayer rooms
//! ("lands"). Each land runs its own tick loop on a dedicated thread
//! ([`land::LandKeeper`]), drives declarative per-field sync policies down
//! to connected players ([`sync::SyncEngine`]), and is reachable through a
//! transport-agnostic router ([`realm::LandRouter`]) that can host many
//! land types and instances behind one process. The `control-plane`
//! feature adds a standalone matchmaking and admin surface
//! ([`matchmaking`], [`admin`]) for clustered deployments.

#[cfg(feature = "control-plane")]
pub mod admin;
pub mod api;
pub mod ids;
pub mod land;
#[cfg(feature = "control-plane")]
pub mod matchmaking;
pub mod realm;
pub mod sync;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::land::Hooks;
use crate::realm::{LandRouter, LandTypeRegistry};
use crate::transport::SessionRegistry;

/// Fluent entry point for wiring land types into a runnable server:
/// `LandKeeperServer::new().register::<MyLand>(...).register::<OtherLand>(...).run(addr)`.
pub struct LandKeeperServer {
    types: LandTypeRegistry,
    #[cfg(all(feature = "ws", feature = "control-plane"))]
    cluster: Option<transport::ws::ClusterConfig>,
}

impl Default for LandKeeperServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LandKeeperServer {
    pub fn new() -> Self {
        Self {
            types: LandTypeRegistry::new(),
            #[cfg(all(feature = "ws", feature = "control-plane"))]
            cluster: None,
        }
    }

    /// Enables single-login enforcement for [`Self::run`]'s transport: joins
    /// carrying a `userId` acquire a cluster-wide lease before being handed
    /// to the router, per `cd:user:<userId>` in a Redis-backed cluster.
    #[cfg(all(feature = "ws", feature = "control-plane"))]
    pub fn with_cluster(mut self, cluster: transport::ws::ClusterConfig) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Registers a land type under `land_type`, ticking at `tick_interval`.
    /// `known_patterns` primes the sync engine's path trie with every field
    /// path this type's state tree can ever produce, so the very first
    /// diff after a schema change doesn't have to grow it lazily.
    /// `auto_create` controls whether joining a never-seen instance id
    /// spins one up versus failing the join.
    pub fn register<H>(
        self,
        land_type: &'static str,
        tick_interval: Duration,
        known_patterns: Vec<&'static str>,
        auto_create: bool,
    ) -> Self
    where
        H: Hooks,
        H::Options: DeserializeOwned,
    {
        self.types
            .register::<H>(land_type, tick_interval, known_patterns, auto_create);
        self
    }

    /// Builds the router but does not start listening; useful when the
    /// caller wants to mount [`realm::LandRouter`] behind its own
    /// transport instead of [`transport::ws::WebSocketTransport`].
    pub fn build_router(self) -> Arc<LandRouter> {
        LandRouter::new(self.types)
    }

    #[cfg(feature = "ws")]
    pub async fn run(self, addr: impl Into<String>) -> std::io::Result<()> {
        #[cfg(feature = "control-plane")]
        let cluster = self.cluster;
        let router = LandRouter::new(self.types);
        let registry = SessionRegistry::new();
        let mut transport = transport::ws::WebSocketTransport::new(addr);
        #[cfg(feature = "control-plane")]
        if let Some(cluster) = cluster {
            transport = transport.with_cluster(cluster);
        }
        transport.run(router, registry).await
    }
}
