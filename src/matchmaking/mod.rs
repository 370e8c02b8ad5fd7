//! Matchmaking control plane: a Redis-backed ticket queue, pluggable
//! match strategies, game-server provisioning, cluster-wide session
//! leases, and the RS256 tokens that let a matched client prove it came
//! through matchmaking. Gated on the `control-plane` feature.

pub mod api;
pub mod cluster;
pub mod provisioning;
pub mod realtime;
pub mod store;
pub mod strategy;
pub mod ticket;
pub mod token;
pub mod worker;

pub use cluster::{AcquireOutcome, ClusterDirectory, ClusterLeases, DUPLICATE_LOGIN_CLOSE_CODE, KickNotice, LeaseHolder, LocalNodeInbox, NodeInbox};
pub use provisioning::ProvisioningRegistry;
pub use realtime::{RealtimeGateway, TicketEvent};
pub use store::{InMemoryStore, StoreError, TicketStore};
pub use strategy::{DefaultStrategy, FillGroupStrategy, MatchStrategy, Party};
pub use ticket::{Assignment, Ticket, TicketStatus};
pub use token::{MatchTokenClaims, TokenError, TokenIssuer, TokenVerifier};
pub use worker::{MatchWorker, QueueConfig};
