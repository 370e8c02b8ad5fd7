//! Ticket and assignment shapes exchanged with matchmaking clients.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    Queued,
    Assigned,
    Cancelled,
    /// Aged out of the queue without ever reaching its group's size floor.
    Expired,
}

/// One player's (or pre-formed group's) request for a match. `group_id`
/// lets several tickets be deduplicated into a single matched party by a
/// `fillGroup` strategy; `group_size` is how many seats this ticket alone
/// accounts for toward that party (a pre-formed duo enqueues once with
/// `group_size: 2`, not as two separate tickets).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub group_id: String,
    pub queue_key: String,
    pub members: Vec<u64>,
    pub group_size: u32,
    pub region: Option<String>,
    pub status: TicketStatus,
    pub created_at_unix_ms: u64,
    pub assignment: Option<Assignment>,
}

/// What a ticket resolves to once matched: a land to connect to and the
/// short-lived token that authorizes the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub ticket_id: String,
    pub land_type: &'static str,
    pub instance_id: String,
    pub connect_url: String,
    pub match_token: String,
}
