//! Ticket storage. [`InMemoryStore`] backs single-process deployments and
//! tests; [`RedisStore`] (feature `control-plane`) is what a multi-node
//! control plane actually runs so every node sees the same queue.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::matchmaking::ticket::{Ticket, TicketStatus};

#[async_trait::async_trait]
pub trait TicketStore: Send + Sync {
    /// Rejected with [`StoreError::Backend`] if another queued ticket
    /// already shares this one's `group_id` — a party forms from at most
    /// one ticket per group.
    async fn enqueue(&self, ticket: Ticket) -> Result<(), StoreError>;
    async fn get(&self, ticket_id: &str) -> Option<Ticket>;
    async fn cancel(&self, ticket_id: &str) -> Result<(), StoreError>;
    /// Tickets currently queued for `queue_key`, oldest first.
    async fn queued(&self, queue_key: &str) -> Vec<Ticket>;
    async fn mark_assigned(&self, ticket_ids: &[String]) -> Result<(), StoreError>;
    /// The queued ticket (if any) already registered under `group_id`, used
    /// by `enqueue` callers to return the existing ticket instead of
    /// creating a duplicate for an already-queued group.
    async fn find_by_group(&self, group_id: &str) -> Option<Ticket>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    DuplicateGroup,
    Backend,
}

#[derive(Default)]
pub struct InMemoryStore {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TicketStore for InMemoryStore {
    async fn enqueue(&self, ticket: Ticket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend)?;
        let duplicate = tickets.values().any(|t| {
            t.ticket_id != ticket.ticket_id && t.group_id == ticket.group_id && t.status == TicketStatus::Queued
        });
        if duplicate && ticket.status == TicketStatus::Queued {
            return Err(StoreError::DuplicateGroup);
        }
        tickets.insert(ticket.ticket_id.clone(), ticket);
        Ok(())
    }

    async fn get(&self, ticket_id: &str) -> Option<Ticket> {
        self.tickets.lock().ok()?.get(ticket_id).cloned()
    }

    async fn cancel(&self, ticket_id: &str) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend)?;
        let ticket = tickets.get_mut(ticket_id).ok_or(StoreError::NotFound)?;
        ticket.status = TicketStatus::Cancelled;
        Ok(())
    }

    async fn queued(&self, queue_key: &str) -> Vec<Ticket> {
        let Ok(tickets) = self.tickets.lock() else {
            return Vec::new();
        };
        let mut out: Vec<Ticket> = tickets
            .values()
            .filter(|t| t.queue_key == queue_key && t.status == TicketStatus::Queued)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at_unix_ms);
        out
    }

    async fn mark_assigned(&self, ticket_ids: &[String]) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().map_err(|_| StoreError::Backend)?;
        for id in ticket_ids {
            if let Some(ticket) = tickets.get_mut(id) {
                ticket.status = TicketStatus::Assigned;
            }
        }
        Ok(())
    }

    async fn find_by_group(&self, group_id: &str) -> Option<Ticket> {
        let tickets = self.tickets.lock().ok()?;
        tickets
            .values()
            .find(|t| t.group_id == group_id && t.status == TicketStatus::Queued)
            .cloned()
    }
}

#[cfg(feature = "control-plane")]
pub mod redis_store {
    use super::*;
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    const TICKET_KEY_PREFIX: &str = "mm:ticket:";
    const QUEUE_KEY_PREFIX: &str = "mm:queue:";
    const GROUP_KEY_PREFIX: &str = "mm:group:";

    /// Tickets live as JSON blobs under `mm:ticket:<id>`; each queue is a
    /// Redis list of ticket ids under `mm:queue:<queueKey>` so `queued`
    /// preserves FIFO order without a separate index structure. `mm:group:
    /// <groupId>` holds the id of whichever ticket currently represents
    /// that group while queued, so a second enqueue for the same group can
    /// be rejected instead of silently duplicating the party.
    pub struct RedisStore {
        conn: ConnectionManager,
    }

    impl RedisStore {
        pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
            let client = redis::Client::open(redis_url)?;
            let conn = client.get_connection_manager().await?;
            Ok(Self { conn })
        }
    }

    #[async_trait::async_trait]
    impl TicketStore for RedisStore {
        async fn enqueue(&self, ticket: Ticket) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            let group_key = format!("{GROUP_KEY_PREFIX}{}", ticket.group_id);

            if ticket.status == TicketStatus::Queued {
                let existing: Option<String> = conn.get(&group_key).await.map_err(|_| StoreError::Backend)?;
                if let Some(existing_id) = existing
                    && existing_id != ticket.ticket_id
                    && let Some(existing_ticket) = self.get(&existing_id).await
                    && existing_ticket.status == TicketStatus::Queued
                {
                    return Err(StoreError::DuplicateGroup);
                }
            }

            let payload = serde_json::to_string(&ticket).map_err(|_| StoreError::Backend)?;
            let ticket_key = format!("{TICKET_KEY_PREFIX}{}", ticket.ticket_id);
            let queue_key = format!("{QUEUE_KEY_PREFIX}{}", ticket.queue_key);
            conn.set::<_, _, ()>(&ticket_key, payload)
                .await
                .map_err(|_| StoreError::Backend)?;
            if ticket.status == TicketStatus::Queued {
                conn.rpush::<_, _, ()>(&queue_key, &ticket.ticket_id)
                    .await
                    .map_err(|_| StoreError::Backend)?;
                conn.set::<_, _, ()>(&group_key, &ticket.ticket_id)
                    .await
                    .map_err(|_| StoreError::Backend)?;
            }
            Ok(())
        }

        async fn get(&self, ticket_id: &str) -> Option<Ticket> {
            let mut conn = self.conn.clone();
            let payload: Option<String> = conn.get(format!("{TICKET_KEY_PREFIX}{ticket_id}")).await.ok()?;
            payload.and_then(|p| serde_json::from_str(&p).ok())
        }

        async fn cancel(&self, ticket_id: &str) -> Result<(), StoreError> {
            let mut ticket = self.get(ticket_id).await.ok_or(StoreError::NotFound)?;
            ticket.status = TicketStatus::Cancelled;
            self.enqueue(ticket).await
        }

        async fn queued(&self, queue_key: &str) -> Vec<Ticket> {
            let mut conn = self.conn.clone();
            let ids: Vec<String> = conn
                .lrange(format!("{QUEUE_KEY_PREFIX}{queue_key}"), 0, -1)
                .await
                .unwrap_or_default();
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(ticket) = self.get(&id).await
                    && ticket.status == TicketStatus::Queued
                {
                    out.push(ticket);
                }
            }
            out
        }

        async fn mark_assigned(&self, ticket_ids: &[String]) -> Result<(), StoreError> {
            for id in ticket_ids {
                if let Some(mut ticket) = self.get(id).await {
                    ticket.status = TicketStatus::Assigned;
                    let mut conn = self.conn.clone();
                    let payload = serde_json::to_string(&ticket).map_err(|_| StoreError::Backend)?;
                    conn.set::<_, _, ()>(format!("{TICKET_KEY_PREFIX}{id}"), payload)
                        .await
                        .map_err(|_| StoreError::Backend)?;
                    let _: Result<(), _> = conn.del(format!("{GROUP_KEY_PREFIX}{}", ticket.group_id)).await;
                }
            }
            Ok(())
        }

        async fn find_by_group(&self, group_id: &str) -> Option<Ticket> {
            let mut conn = self.conn.clone();
            let ticket_id: Option<String> = conn.get(format!("{GROUP_KEY_PREFIX}{group_id}")).await.ok()?;
            let ticket = self.get(&ticket_id?).await?;
            (ticket.status == TicketStatus::Queued).then_some(ticket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(id: &str, queue_key: &str, group_id: &str, created: u64) -> Ticket {
        Ticket {
            ticket_id: id.to_string(),
            group_id: group_id.to_string(),
            queue_key: queue_key.to_string(),
            members: vec![1],
            group_size: 1,
            region: None,
            status: TicketStatus::Queued,
            created_at_unix_ms: created,
            assignment: None,
        }
    }

    #[tokio::test]
    async fn queued_returns_oldest_first() {
        let store = InMemoryStore::new();
        store.enqueue(ticket("b", "duel", "b", 200)).await.unwrap();
        store.enqueue(ticket("a", "duel", "a", 100)).await.unwrap();

        let queued = store.queued("duel").await;
        assert_eq!(queued.iter().map(|t| t.ticket_id.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[tokio::test]
    async fn cancelled_tickets_are_excluded_from_queue() {
        let store = InMemoryStore::new();
        store.enqueue(ticket("a", "duel", "a", 100)).await.unwrap();
        store.cancel("a").await.unwrap();

        assert!(store.queued("duel").await.is_empty());
    }

    #[tokio::test]
    async fn a_second_ticket_for_an_already_queued_group_is_rejected() {
        let store = InMemoryStore::new();
        store.enqueue(ticket("a", "duel", "party-1", 100)).await.unwrap();

        let err = store.enqueue(ticket("b", "duel", "party-1", 200)).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateGroup);
        assert_eq!(store.find_by_group("party-1").await.unwrap().ticket_id, "a");
    }
}
