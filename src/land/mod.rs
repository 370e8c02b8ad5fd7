//! One land instance: a dedicated single-threaded actor running a land
//! type's [`hooks::Hooks`] at a fixed tick cadence, reachable only through
//! its [`keeper::LandHandle`] mailbox. [`crate::realm`] owns the map from
//! `(land_type, instance_id)` to a running keeper; this module knows
//! nothing about routing or transports, only about running one instance.

pub mod context;
pub mod hooks;
pub mod keeper;
pub mod rng;
pub mod session;

pub use context::{EventTarget, LandContext, Outbox, PendingTimer};
pub use hooks::{Hooks, JoinResult};
pub use keeper::{LandHandle, LandKeeper};
pub use rng::RngService;
pub use session::Session;
