//! A player's membership record within one land instance.

use crate::ids::{PlayerId, SessionId};

#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    pub session_id: SessionId,
    pub joined_at_tick: u64,
}

impl Session {
    pub fn new(player_id: PlayerId, session_id: SessionId, joined_at_tick: u64) -> Self {
        Self {
            player_id,
            session_id,
            joined_at_tick,
        }
    }
}
