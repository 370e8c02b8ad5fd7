//! Cluster-wide session leases. A user may hold exactly one active lease
//! across the whole cluster; acquiring a new one for the same user kicks
//! whichever node held the previous lease so a user can never be
//! connected to two lands at once from two different processes.
//!
//! [`ClusterDirectory`] is the in-process backend (single-node deployments,
//! tests); `redis_cluster::RedisClusterDirectory` is the `cd:user:<userId>`
//! backed implementation an actual multi-node cluster runs. Both implement
//! [`ClusterLeases`] so a transport only ever depends on the trait.
//! [`NodeInbox`] is the matching piece for delivering a kick to whichever
//! node the evicted session actually lives on, over `cd:inbox:<nodeId>`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(8);

/// Close code a session is closed with when a newer login for the same
/// user displaces it elsewhere in the cluster.
pub const DUPLICATE_LOGIN_CLOSE_CODE: u16 = 4002;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LeaseHolder {
    pub server_id: String,
    pub session_id: u64,
}

struct Lease {
    holder: LeaseHolder,
    expires_at: Instant,
}

/// What happened to any prior holder when a lease was (re)acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Fresh,
    Kicked(LeaseHolder),
}

/// A notice that a user's lease moved off `evicted.server_id`; published to
/// that server's own `cd:inbox:<nodeId>` channel so it can close the
/// session it's still holding.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KickNotice {
    pub user_id: u64,
    pub evicted: LeaseHolder,
}

/// Backend-agnostic cluster-wide lease operations. A transport only ever
/// holds an `Arc<dyn ClusterLeases>`, so a single-node embedder can use
/// [`ClusterDirectory`] and a clustered one can swap in
/// `redis_cluster::RedisClusterDirectory` without the transport caring.
#[async_trait::async_trait]
pub trait ClusterLeases: Send + Sync {
    /// Grants `holder` the lease for `user_id`. If another holder already
    /// held it (and hasn't expired), that holder is evicted and returned so
    /// the caller can push a disconnect to it.
    async fn acquire(&self, user_id: u64, holder: LeaseHolder) -> AcquireOutcome;
    /// Extends an existing lease's expiry. No-op (caller should re-acquire)
    /// if the lease has already expired or belongs to a different holder.
    async fn renew(&self, user_id: u64, holder: &LeaseHolder) -> bool;
    async fn release(&self, user_id: u64, holder: &LeaseHolder);
    async fn current_holder(&self, user_id: u64) -> Option<LeaseHolder>;
}

#[derive(Default)]
pub struct ClusterDirectory {
    leases: RwLock<HashMap<u64, Lease>>,
    ttl: Option<Duration>,
}

impl ClusterDirectory {
    pub fn new() -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            ttl: Some(DEFAULT_LEASE_TTL),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub fn acquire(&self, user_id: u64, holder: LeaseHolder) -> AcquireOutcome {
        let ttl = self.ttl.unwrap_or(DEFAULT_LEASE_TTL);
        let mut leases = self.leases.write().expect("cluster directory poisoned");
        let now = Instant::now();
        let prior = leases.insert(
            user_id,
            Lease {
                holder: holder.clone(),
                expires_at: now + ttl,
            },
        );
        match prior {
            Some(lease) if lease.expires_at > now && lease.holder != holder => AcquireOutcome::Kicked(lease.holder),
            _ => AcquireOutcome::Fresh,
        }
    }

    pub fn renew(&self, user_id: u64, holder: &LeaseHolder) -> bool {
        let ttl = self.ttl.unwrap_or(DEFAULT_LEASE_TTL);
        let mut leases = self.leases.write().expect("cluster directory poisoned");
        match leases.get_mut(&user_id) {
            Some(lease) if &lease.holder == holder => {
                lease.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }

    pub fn release(&self, user_id: u64, holder: &LeaseHolder) {
        let mut leases = self.leases.write().expect("cluster directory poisoned");
        if leases.get(&user_id).is_some_and(|lease| &lease.holder == holder) {
            leases.remove(&user_id);
        }
    }

    pub fn current_holder(&self, user_id: u64) -> Option<LeaseHolder> {
        let leases = self.leases.read().expect("cluster directory poisoned");
        let lease = leases.get(&user_id)?;
        (lease.expires_at > Instant::now()).then(|| lease.holder.clone())
    }
}

#[async_trait::async_trait]
impl ClusterLeases for ClusterDirectory {
    async fn acquire(&self, user_id: u64, holder: LeaseHolder) -> AcquireOutcome {
        ClusterDirectory::acquire(self, user_id, holder)
    }

    async fn renew(&self, user_id: u64, holder: &LeaseHolder) -> bool {
        ClusterDirectory::renew(self, user_id, holder)
    }

    async fn release(&self, user_id: u64, holder: &LeaseHolder) {
        ClusterDirectory::release(self, user_id, holder)
    }

    async fn current_holder(&self, user_id: u64) -> Option<LeaseHolder> {
        ClusterDirectory::current_holder(self, user_id)
    }
}

/// Delivers a [`KickNotice`] to whichever node currently hosts the evicted
/// session. [`LocalNodeInbox`] is the single-node no-op; `redis_cluster::
/// RedisNodeInbox` publishes to `cd:inbox:<nodeId>` for a real cluster.
#[async_trait::async_trait]
pub trait NodeInbox: Send + Sync {
    async fn publish_kick(&self, target_node: &str, notice: KickNotice);

    /// Subscribes to `node_id`'s own inbox, if this backend has one to
    /// subscribe to. `None` means every kick this node could ever receive
    /// is handled some other way (a single-node deployment resolves a kick
    /// against its own node id directly at the acquiring call site, without
    /// ever publishing through here).
    async fn subscribe_self(&self, node_id: &str) -> Option<tokio::sync::mpsc::Receiver<KickNotice>> {
        let _ = node_id;
        None
    }
}

/// There is only ever one node in a single-process deployment, so a kick
/// never needs to travel anywhere; the acquiring node already knows it
/// holds the only session that could have existed.
#[derive(Default)]
pub struct LocalNodeInbox;

#[async_trait::async_trait]
impl NodeInbox for LocalNodeInbox {
    async fn publish_kick(&self, _target_node: &str, _notice: KickNotice) {}
}

#[cfg(feature = "control-plane")]
pub mod redis_cluster {
    use super::*;
    use futures::StreamExt;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    const LEASE_KEY_PREFIX: &str = "cd:user:";
    const INBOX_CHANNEL_PREFIX: &str = "cd:inbox:";

    #[derive(serde::Serialize, serde::Deserialize)]
    struct LeaseRecord {
        holder: LeaseHolder,
    }

    /// `cd:user:<userId>` holds a JSON-encoded [`LeaseHolder`] with a TTL;
    /// the swap isn't atomic (read the prior holder, then overwrite), which
    /// mirrors the informal get-then-set pattern `store::redis_store`
    /// already uses for its own duplicate-group check.
    pub struct RedisClusterDirectory {
        conn: ConnectionManager,
        ttl: Duration,
    }

    impl RedisClusterDirectory {
        pub async fn connect(redis_url: &str, ttl: Duration) -> redis::RedisResult<Self> {
            let client = redis::Client::open(redis_url)?;
            let conn = client.get_connection_manager().await?;
            Ok(Self { conn, ttl })
        }

        fn ttl_secs(&self) -> i64 {
            self.ttl.as_secs().max(1) as i64
        }
    }

    #[async_trait::async_trait]
    impl ClusterLeases for RedisClusterDirectory {
        async fn acquire(&self, user_id: u64, holder: LeaseHolder) -> AcquireOutcome {
            let mut conn = self.conn.clone();
            let key = format!("{LEASE_KEY_PREFIX}{user_id}");
            let prior: Option<String> = conn.get(&key).await.ok().flatten();
            let payload = serde_json::to_string(&LeaseRecord { holder: holder.clone() }).unwrap_or_default();
            let _: Result<(), _> = conn.set_ex(&key, payload, self.ttl_secs() as u64).await;

            match prior.and_then(|p| serde_json::from_str::<LeaseRecord>(&p).ok()) {
                Some(record) if record.holder != holder => AcquireOutcome::Kicked(record.holder),
                _ => AcquireOutcome::Fresh,
            }
        }

        async fn renew(&self, user_id: u64, holder: &LeaseHolder) -> bool {
            if self.current_holder(user_id).await.as_ref() != Some(holder) {
                return false;
            }
            let mut conn = self.conn.clone();
            let _: Result<(), _> = conn.expire(format!("{LEASE_KEY_PREFIX}{user_id}"), self.ttl_secs()).await;
            true
        }

        async fn release(&self, user_id: u64, holder: &LeaseHolder) {
            if self.current_holder(user_id).await.as_ref() == Some(holder) {
                let mut conn = self.conn.clone();
                let _: Result<(), _> = conn.del(format!("{LEASE_KEY_PREFIX}{user_id}")).await;
            }
        }

        async fn current_holder(&self, user_id: u64) -> Option<LeaseHolder> {
            let mut conn = self.conn.clone();
            let payload: Option<String> = conn.get(format!("{LEASE_KEY_PREFIX}{user_id}")).await.ok().flatten();
            let record: LeaseRecord = serde_json::from_str(&payload?).ok()?;
            Some(record.holder)
        }
    }

    /// Publishes to, and subscribes on, Redis pub/sub channels named
    /// `cd:inbox:<nodeId>`.
    pub struct RedisNodeInbox {
        client: redis::Client,
    }

    impl RedisNodeInbox {
        pub fn new(redis_url: &str) -> redis::RedisResult<Self> {
            Ok(Self {
                client: redis::Client::open(redis_url)?,
            })
        }

        /// Subscribes to this node's own inbox channel, returning a receiver
        /// fed by a background task for as long as the connection holds.
        /// Callers close the evicted session for every notice that names a
        /// user they're currently hosting.
        pub async fn subscribe(&self, node_id: &str) -> redis::RedisResult<tokio::sync::mpsc::Receiver<KickNotice>> {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(format!("{INBOX_CHANNEL_PREFIX}{node_id}")).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(64);
            tokio::spawn(async move {
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let Ok(payload) = msg.get_payload::<String>() else {
                        continue;
                    };
                    let Ok(notice) = serde_json::from_str::<KickNotice>(&payload) else {
                        continue;
                    };
                    if tx.send(notice).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    #[async_trait::async_trait]
    impl NodeInbox for RedisNodeInbox {
        async fn publish_kick(&self, target_node: &str, notice: KickNotice) {
            let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
                return;
            };
            let payload = serde_json::to_string(&notice).unwrap_or_default();
            let _: Result<(), _> = conn.publish(format!("{INBOX_CHANNEL_PREFIX}{target_node}"), payload).await;
        }

        async fn subscribe_self(&self, node_id: &str) -> Option<tokio::sync::mpsc::Receiver<KickNotice>> {
            self.subscribe(node_id).await.ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder(server: &str, session: u64) -> LeaseHolder {
        LeaseHolder {
            server_id: server.to_string(),
            session_id: session,
        }
    }

    #[test]
    fn second_login_kicks_the_first() {
        let directory = ClusterDirectory::new();
        assert_eq!(directory.acquire(1, holder("a", 1)), AcquireOutcome::Fresh);
        assert_eq!(
            directory.acquire(1, holder("b", 2)),
            AcquireOutcome::Kicked(holder("a", 1))
        );
        assert_eq!(directory.current_holder(1), Some(holder("b", 2)));
    }

    #[test]
    fn expired_lease_is_not_reported_as_a_kick() {
        let directory = ClusterDirectory::with_ttl(Duration::from_millis(0));
        directory.acquire(1, holder("a", 1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(directory.acquire(1, holder("b", 2)), AcquireOutcome::Fresh);
    }

    #[test]
    fn release_only_clears_a_matching_holder() {
        let directory = ClusterDirectory::new();
        directory.acquire(1, holder("a", 1));
        directory.release(1, &holder("b", 2));
        assert!(directory.current_holder(1).is_some());
        directory.release(1, &holder("a", 1));
        assert!(directory.current_holder(1).is_none());
    }

    #[tokio::test]
    async fn cluster_leases_trait_delegates_to_the_inherent_methods() {
        let directory: &dyn ClusterLeases = &ClusterDirectory::new();
        assert_eq!(directory.acquire(1, holder("a", 1)).await, AcquireOutcome::Fresh);
        assert_eq!(
            directory.acquire(1, holder("b", 2)).await,
            AcquireOutcome::Kicked(holder("a", 1))
        );
    }
}
