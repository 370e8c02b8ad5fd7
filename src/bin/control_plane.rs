//! Standalone matchmaking + admin control plane binary. Wires the ticket
//! store, match worker, provisioning registry, and REST surfaces together
//! and serves them over one `axum` listener. Configuration is entirely
//! environment-driven (see `recognized_env` below) — no config file or CLI
//! parser, matching how small the surface is.

use std::sync::Arc;
use std::time::Duration;

use landkeeper::admin::{AdminAuth, AdminState, Role};
use landkeeper::matchmaking::api::MatchmakingState;
use landkeeper::matchmaking::store::TicketStore;
use landkeeper::matchmaking::{DefaultStrategy, InMemoryStore, MatchWorker, ProvisioningRegistry, QueueConfig};
use landkeeper::realm::{LandRouter, LandTypeRegistry};
use landkeeper::sync::Encoding;

const DEFAULT_PORT: u16 = 8090;
const DEFAULT_REDIS_PORT: u16 = 6379;
const MATCH_TICK_INTERVAL: Duration = Duration::from_millis(500);
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MIN_WAIT_MS: u64 = 0;
const DEFAULT_RELAX_AFTER_MS: u64 = 10_000;
const DEFAULT_CLUSTER_DIRECTORY_TTL_SECS: u64 = 8;

/// Which half of the control plane this process runs: `api` serves the
/// REST surface only, `queue-worker` only runs the matching tick, `all`
/// (the default) runs both in the same process.
#[derive(Clone, Copy, PartialEq, Eq)]
enum MatchmakingRole {
    Api,
    QueueWorker,
    All,
}

impl MatchmakingRole {
    fn from_env() -> Self {
        match std::env::var("MATCHMAKING_ROLE").as_deref() {
            Ok("api") => Self::Api,
            Ok("queue-worker") => Self::QueueWorker,
            _ => Self::All,
        }
    }

    fn runs_api(self) -> bool {
        matches!(self, Self::Api | Self::All)
    }

    fn runs_queue_worker(self) -> bool {
        matches!(self, Self::QueueWorker | Self::All)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn transport_encoding_from_env() -> Encoding {
    match std::env::var("TRANSPORT_ENCODING").as_deref() {
        Ok("opcodeArray") => Encoding::OpcodeArray,
        _ => Encoding::Json,
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port: u16 = env_parsed("PORT", DEFAULT_PORT);
    let addr = format!("0.0.0.0:{port}");
    let redis_host = std::env::var("REDIS_HOST").ok();
    let redis_port: u16 = env_parsed("REDIS_PORT", DEFAULT_REDIS_PORT);
    let provisioning_base_url = std::env::var("PROVISIONING_BASE_URL").ok();
    let role = MatchmakingRole::from_env();
    let min_wait_ms: u64 = env_parsed("MATCHMAKING_MIN_WAIT_MS", DEFAULT_MIN_WAIT_MS);
    let relax_after_ms: u64 = env_parsed("MATCHMAKING_RELAX_AFTER_MS", DEFAULT_RELAX_AFTER_MS);
    let cluster_directory_ttl =
        Duration::from_secs(env_parsed("CLUSTER_DIRECTORY_TTL_SECONDS", DEFAULT_CLUSTER_DIRECTORY_TTL_SECS));
    let node_id: Arc<str> = std::env::var("NODE_ID")
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
        .into();
    let use_node_inbox_for_match_assigned = env_bool("USE_NODE_INBOX_FOR_MATCH_ASSIGNED", false);
    let transport_encoding = transport_encoding_from_env();

    tracing::info!(
        %node_id,
        ?cluster_directory_ttl,
        use_node_inbox_for_match_assigned,
        ?transport_encoding,
        ?provisioning_base_url,
        "control plane configuration"
    );

    let admin_api_key = std::env::var("LANDKEEPER_ADMIN_API_KEY").unwrap_or_else(|_| "dev-admin-key".to_string());
    let public_key_pem: Arc<str> = std::env::var("LANDKEEPER_MATCH_TOKEN_PUBLIC_KEY")
        .unwrap_or_default()
        .into();

    let store: Arc<dyn TicketStore> = match &redis_host {
        Some(host) => {
            let redis_url = format!("redis://{host}:{redis_port}");
            let redis_store = landkeeper::matchmaking::store::redis_store::RedisStore::connect(&redis_url)
                .await
                .expect("failed to connect to redis");
            Arc::new(redis_store)
        }
        None => Arc::new(InMemoryStore::new()),
    };
    let provisioning = Arc::new(ProvisioningRegistry::new());
    // The single-login lease itself lives on whichever game-server nodes host
    // live sessions (`WebSocketTransport::with_cluster`/`LandKeeperServer::
    // with_cluster`), not here — this process only serves matchmaking/admin
    // REST, so `cluster_directory_ttl`/`node_id` are read for operator
    // visibility (logged above) rather than used directly.

    if role.runs_queue_worker() {
        let worker_store = store.clone();
        tokio::spawn(async move {
            let mut worker = MatchWorker::new(
                worker_store,
                vec![QueueConfig {
                    queue_key: "default".to_string(),
                    strategy: Arc::new(DefaultStrategy),
                    min_wait_ms,
                    relax_after_ms,
                }],
            );
            let mut ticker = tokio::time::interval(MATCH_TICK_INTERVAL);
            loop {
                ticker.tick().await;
                let formed = worker.tick(unix_millis()).await;
                for (queue_key, parties) in formed {
                    tracing::info!(queue = %queue_key, count = parties.len(), "formed parties");
                }
            }
        });

        let sweep_provisioning = provisioning.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STALE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = sweep_provisioning.sweep_stale(landkeeper::matchmaking::provisioning::HEARTBEAT_TTL);
                if !removed.is_empty() {
                    tracing::warn!(?removed, "dropped stale game servers");
                }
            }
        });
    }

    if !role.runs_api() {
        tracing::info!("queue-worker-only role: not serving the matchmaking/admin REST surface");
        tokio::signal::ctrl_c().await.ok();
        return;
    }

    let matchmaking_state = MatchmakingState {
        store,
        provisioning,
        public_key_pem,
    };
    let admin_state = AdminState {
        router: LandRouter::new(LandTypeRegistry::new()),
    };
    let auth = AdminAuth::new().with_key(admin_api_key, Role::Admin);

    let app = landkeeper::matchmaking::api::router(matchmaking_state)
        .merge(landkeeper::admin::api::router(admin_state, auth));

    tracing::info!(%addr, "control plane listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind control plane listener");
    axum::serve(listener, app).await.expect("control plane server exited");
}
