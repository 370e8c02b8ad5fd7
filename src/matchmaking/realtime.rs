//! Pushes ticket status changes to whichever node a player's matchmaking
//! websocket is attached to. Mirrors [`crate::transport::SessionRegistry`]'s
//! per-player inbox shape, but for matchmaking events instead of land sync
//! traffic: a ticket assigned on one node still needs to reach a player
//! whose socket happens to be open on another.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::matchmaking::ticket::Assignment;

const PUSH_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub enum TicketEvent {
    Queued { ticket_id: String, position: usize },
    Assigned(Assignment),
    Cancelled { ticket_id: String },
}

#[derive(Default)]
pub struct RealtimeGateway {
    inboxes: RwLock<HashMap<u64, mpsc::Sender<TicketEvent>>>,
}

impl RealtimeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, player_id: u64) -> mpsc::Receiver<TicketEvent> {
        let (tx, rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        self.inboxes.write().expect("gateway poisoned").insert(player_id, tx);
        rx
    }

    pub fn detach(&self, player_id: u64) {
        self.inboxes.write().expect("gateway poisoned").remove(&player_id);
    }

    /// Best-effort push; a player with no attached socket, or whose inbox
    /// is saturated, silently misses the event. A client that reconnects
    /// always gets the ticket's current status from a direct lookup, so a
    /// missed push is never the only way to learn an outcome.
    pub fn push(&self, player_id: u64, event: TicketEvent) {
        let inboxes = self.inboxes.read().expect("gateway poisoned");
        if let Some(tx) = inboxes.get(&player_id) {
            let _ = tx.try_send(event);
        }
    }

    pub fn broadcast_assigned(&self, assignment: &Assignment, player_ids: &[u64]) {
        for player_id in player_ids {
            self.push(*player_id, TicketEvent::Assigned(assignment.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attached_player_receives_pushed_events() {
        let gateway = RealtimeGateway::new();
        let mut rx = gateway.attach(1);

        gateway.push(1, TicketEvent::Cancelled { ticket_id: "a".to_string() });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TicketEvent::Cancelled { ticket_id } if ticket_id == "a"));
    }

    #[test]
    fn pushing_to_an_unattached_player_is_a_no_op() {
        let gateway = RealtimeGateway::new();
        gateway.push(1, TicketEvent::Cancelled { ticket_id: "a".to_string() });
    }
}
