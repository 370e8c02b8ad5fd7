//! Tracks which game-server processes are alive and picks one to host a
//! newly matched party. A server's entry goes stale if it hasn't sent a
//! heartbeat within [`HEARTBEAT_TTL`]; stale servers are skipped by
//! [`ProvisioningRegistry::pick_server`] and reaped by
//! [`ProvisioningRegistry::sweep_stale`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub const HEARTBEAT_TTL: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub server_id: String,
    pub land_type: String,
    pub host: String,
    pub port: u16,
    /// Overrides for the address clients should actually dial, when it
    /// differs from `host`/`port` (a load balancer or NAT in front of the
    /// process the heartbeat came from).
    pub connect_host: Option<String>,
    pub connect_port: Option<u16>,
    pub connect_scheme: Option<String>,
    pub capacity: u32,
    pub lands_hosted: u32,
    pub registered_at: Instant,
    last_seen_at: Instant,
}

impl ServerEntry {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_seen_at) > ttl
    }

    pub fn has_room(&self) -> bool {
        self.lands_hosted < self.capacity
    }
}

/// What a caller registering/heartbeating a server sends.
pub struct ServerRegistration<'a> {
    pub server_id: &'a str,
    pub land_type: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub connect_host: Option<&'a str>,
    pub connect_port: Option<u16>,
    pub connect_scheme: Option<&'a str>,
    pub capacity: u32,
    pub lands_hosted: u32,
}

#[derive(Default)]
pub struct ProvisioningRegistry {
    servers: RwLock<HashMap<String, ServerEntry>>,
}

impl ProvisioningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: a repeat call for the same `server_id` refreshes its
    /// liveness and counters but keeps its original `registered_at`.
    pub fn heartbeat(&self, registration: ServerRegistration<'_>) {
        let mut servers = self.servers.write().expect("provisioning registry poisoned");
        let now = Instant::now();
        let registered_at = servers
            .get(registration.server_id)
            .map(|existing| existing.registered_at)
            .unwrap_or(now);
        servers.insert(
            registration.server_id.to_string(),
            ServerEntry {
                server_id: registration.server_id.to_string(),
                land_type: registration.land_type.to_string(),
                host: registration.host.to_string(),
                port: registration.port,
                connect_host: registration.connect_host.map(str::to_string),
                connect_port: registration.connect_port,
                connect_scheme: registration.connect_scheme.map(str::to_string),
                capacity: registration.capacity,
                lands_hosted: registration.lands_hosted,
                registered_at,
                last_seen_at: now,
            },
        );
    }

    pub fn deregister(&self, server_id: &str) {
        self.servers.write().expect("provisioning registry poisoned").remove(server_id);
    }

    /// Round-robins among healthy, under-capacity servers hosting
    /// `land_type`: least loaded first, ties broken by whichever has gone
    /// longest since its last heartbeat.
    pub fn pick_server(&self, land_type: &str) -> Option<ServerEntry> {
        let now = Instant::now();
        self.servers
            .read()
            .expect("provisioning registry poisoned")
            .values()
            .filter(|entry| entry.land_type == land_type && !entry.is_stale(now, HEARTBEAT_TTL) && entry.has_room())
            .min_by_key(|entry| (entry.lands_hosted, entry.last_seen_at))
            .cloned()
    }

    /// Drops every server whose heartbeat is older than `ttl`. Returns the
    /// ids removed, so a caller can log or alert on churn.
    pub fn sweep_stale(&self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut servers = self.servers.write().expect("provisioning registry poisoned");
        let stale: Vec<String> = servers
            .values()
            .filter(|entry| entry.is_stale(now, ttl))
            .map(|entry| entry.server_id.clone())
            .collect();
        for id in &stale {
            servers.remove(id);
        }
        stale
    }

    /// `<scheme>://<connectHost|host>:<connectPort|port>/game/<landType>?landId=<landId>`.
    /// Scheme defaults to `wss` when the connect port is 443, `ws` otherwise,
    /// unless the registration pinned one explicitly.
    pub fn connect_url(server: &ServerEntry, land_id: &str) -> String {
        let host = server.connect_host.as_deref().unwrap_or(&server.host);
        let port = server.connect_port.unwrap_or(server.port);
        let scheme = server
            .connect_scheme
            .clone()
            .unwrap_or_else(|| if port == 443 { "wss".to_string() } else { "ws".to_string() });
        format!("{scheme}://{host}:{port}/game/{}?landId={land_id}", server.land_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration<'a>(server_id: &'a str, land_type: &'a str, lands_hosted: u32) -> ServerRegistration<'a> {
        ServerRegistration {
            server_id,
            land_type,
            host: "10.0.0.1",
            port: 7000,
            connect_host: None,
            connect_port: None,
            connect_scheme: None,
            capacity: 10,
            lands_hosted,
        }
    }

    #[test]
    fn picks_the_least_loaded_server_with_room() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(registration("a", "arena", 8));
        registry.heartbeat(registration("b", "arena", 2));

        let picked = registry.pick_server("arena").unwrap();
        assert_eq!(picked.server_id, "b");
    }

    #[test]
    fn a_different_land_type_is_not_picked() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(registration("a", "lobby", 0));

        assert!(registry.pick_server("arena").is_none());
    }

    #[test]
    fn full_servers_are_not_picked() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(ServerRegistration {
            capacity: 1,
            lands_hosted: 1,
            ..registration("a", "arena", 1)
        });

        assert!(registry.pick_server("arena").is_none());
    }

    #[test]
    fn sweep_stale_removes_entries_past_the_ttl() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(registration("a", "arena", 0));

        let removed = registry.sweep_stale(Duration::from_secs(0));
        assert_eq!(removed, vec!["a".to_string()]);
        assert!(registry.pick_server("arena").is_none());
    }

    #[test]
    fn connect_url_defaults_to_wss_on_port_443() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(ServerRegistration {
            connect_port: Some(443),
            ..registration("a", "arena", 0)
        });
        let server = registry.pick_server("arena").unwrap();
        assert_eq!(
            ProvisioningRegistry::connect_url(&server, "instance-1"),
            "wss://10.0.0.1:443/game/arena?landId=instance-1"
        );
    }

    #[test]
    fn connect_url_prefers_connect_host_and_defaults_to_ws() {
        let registry = ProvisioningRegistry::new();
        registry.heartbeat(ServerRegistration {
            connect_host: Some("public.example.com"),
            ..registration("a", "arena", 0)
        });
        let server = registry.pick_server("arena").unwrap();
        assert_eq!(
            ProvisioningRegistry::connect_url(&server, "instance-1"),
            "ws://public.example.com:7000/game/arena?landId=instance-1"
        );
    }
}
