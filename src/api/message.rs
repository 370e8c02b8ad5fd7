//! Wire envelope shapes exchanged between a [`crate::transport`] session and
//! the rest of the runtime: inbound join/action/event frames, and every
//! outbound frame kind a session can be pushed, each carrying an
//! [`ENVELOPE_VERSION`] for forward-compatible clients.

use crate::sync::{Encoding, StateSnapshot, StateUpdate};

pub const ENVELOPE_VERSION: u32 = 1;

/// Direction tag carried by `event` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventDirection {
    FromClient,
    FromServer,
}

/// A typed, opaque-payload action or event error surfaced to a client.
/// `code` and `retryable` are stable across releases; `message` is
/// human-readable and not matched on by clients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl WireError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

/// Inbound envelope, as received from a session after decoding.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundEnvelope {
    Join {
        land_type: String,
        instance_id: Option<String>,
        payload: Option<Vec<u8>>,
        /// Cluster-wide identity, distinct from the per-land [`crate::ids::PlayerId`]
        /// a land's `CanJoin` assigns. Absent for deployments with no cluster
        /// directory configured, in which case no single-login lease is acquired.
        #[serde(default)]
        user_id: Option<u64>,
    },
    Action {
        request_id: String,
        type_ident: String,
        payload: Vec<u8>,
    },
    Event {
        type_ident: String,
        payload: Vec<u8>,
    },
}

/// Outbound envelope, pushed to a session.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundEnvelope {
    JoinResponse {
        v: u32,
        success: bool,
        land_type: String,
        instance_id: String,
        player_id: Option<u64>,
        encoding: Encoding,
        reason: Option<String>,
    },
    ActionResponse {
        v: u32,
        request_id: String,
        result: Result<Vec<u8>, WireError>,
    },
    Event {
        v: u32,
        direction: EventDirection,
        type_ident: String,
        payload: Vec<u8>,
    },
    Snapshot {
        v: u32,
        snapshot: StateSnapshot,
    },
    Update {
        v: u32,
        update: StateUpdate,
    },
    Error {
        v: u32,
        error: WireError,
    },
    /// Out-of-band close notification (single-login kick, slow consumer,
    /// retirement). Queued like any other outbound frame; the transport's
    /// connection loop special-cases it, flushing it and then closing the
    /// socket with the paired code instead of looping for more frames.
    Close {
        v: u32,
        code: u16,
        reason: &'static str,
    },
}

impl OutboundEnvelope {
    pub fn error(err: WireError) -> Self {
        Self::Error {
            v: ENVELOPE_VERSION,
            error: err,
        }
    }

    pub fn close(code: u16, reason: &'static str) -> Self {
        Self::Close {
            v: ENVELOPE_VERSION,
            code,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_outbound_envelope_carries_the_current_version() {
        let err = OutboundEnvelope::error(WireError::new("internal", "boom", false));
        match err {
            OutboundEnvelope::Error { v, .. } => assert_eq!(v, ENVELOPE_VERSION),
            _ => unreachable!(),
        }
    }
}
