//! Shared identifier newtypes used across the sync, land, transport, realm
//! and matchmaking modules.

use std::fmt;

/// Stable identity of a player within a single land. Assigned by the
/// land's `CanJoin` handler; unique per land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a WebSocket session. Lifetime equals the socket's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `landType ":" instanceId`. `land_type` is registered; `instance_id` is
/// opaque per type, often a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LandId {
    pub land_type: &'static str,
    pub instance_id: String,
}

impl LandId {
    pub fn new(land_type: &'static str, instance_id: impl Into<String>) -> Self {
        Self {
            land_type,
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.land_type, self.instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn land_id_displays_as_type_colon_instance() {
        let id = LandId::new("duel", "abc-123");
        assert_eq!(id.to_string(), "duel:abc-123");
    }
}
