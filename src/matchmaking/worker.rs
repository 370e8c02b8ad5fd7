//! The matching tick: pulls queued tickets, runs each queue's strategy, and
//! hands formed parties off to provisioning. Round-robins across queue
//! keys so one high-traffic queue can't starve a quieter one's turn.

use std::collections::HashMap;
use std::sync::Arc;

use crate::matchmaking::store::TicketStore;
use crate::matchmaking::strategy::{MatchStrategy, Party, StrategyConfig};

/// A `queueKey` of the form `<landType>:<qualifier>` derives its group size
/// from the qualifier: `NvN` (e.g. `"2v2"`) or a plain integer both yield
/// `groupSize = N`; anything else defaults to `1`.
pub fn derive_group_size(queue_key: &str) -> u32 {
    let Some(qualifier) = queue_key.split_once(':').map(|(_, q)| q) else {
        return 1;
    };
    if let Some((lhs, rhs)) = qualifier.split_once('v') {
        if let (Ok(n), Ok(_)) = (lhs.parse::<u32>(), rhs.parse::<u32>()) {
            return n;
        }
    }
    qualifier.parse().unwrap_or(1)
}

pub struct QueueConfig {
    pub queue_key: String,
    pub strategy: Arc<dyn MatchStrategy>,
    pub min_wait_ms: u64,
    pub relax_after_ms: u64,
}

impl QueueConfig {
    /// `minGroupSize`/`maxGroupSize` are both pinned to the queue key's
    /// derived group size, so a `fillGroup` strategy only ever forms exactly
    /// that many players' worth of party (modulo the relax-after rule).
    fn strategy_config(&self, now_unix_ms: u64) -> StrategyConfig {
        let _ = now_unix_ms;
        let group_size = derive_group_size(&self.queue_key);
        StrategyConfig {
            min_wait_ms: self.min_wait_ms,
            min_group_size: group_size,
            max_group_size: group_size,
            relax_after_ms: self.relax_after_ms,
        }
    }
}

pub struct MatchWorker {
    store: Arc<dyn TicketStore>,
    queues: Vec<QueueConfig>,
    cursor: usize,
}

impl MatchWorker {
    pub fn new(store: Arc<dyn TicketStore>, queues: Vec<QueueConfig>) -> Self {
        Self { store, queues, cursor: 0 }
    }

    /// Runs one matching pass over every configured queue, starting from
    /// wherever the previous pass left off, and marks each formed party's
    /// tickets as assigned. Returns the parties formed, keyed by queue.
    pub async fn tick(&mut self, now_unix_ms: u64) -> HashMap<String, Vec<Party>> {
        let mut formed: HashMap<String, Vec<Party>> = HashMap::new();
        if self.queues.is_empty() {
            return formed;
        }

        let len = self.queues.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let queue_key = self.queues[index].queue_key.clone();
            let strategy = Arc::clone(&self.queues[index].strategy);
            let config = self.queues[index].strategy_config(now_unix_ms);

            let queued = self.store.queued(&queue_key).await;
            let parties = strategy.find_parties(&queued, now_unix_ms, &config);
            for party in &parties {
                let _ = self.store.mark_assigned(&party.ticket_ids).await;
            }
            if !parties.is_empty() {
                formed.insert(queue_key, parties);
            }
        }
        self.cursor = (self.cursor + 1) % len;

        formed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::store::InMemoryStore;
    use crate::matchmaking::strategy::DefaultStrategy;
    use crate::matchmaking::ticket::{Ticket, TicketStatus};

    fn ticket(id: &str, queue_key: &str, player_id: u64) -> Ticket {
        Ticket {
            ticket_id: id.to_string(),
            group_id: id.to_string(),
            queue_key: queue_key.to_string(),
            members: vec![player_id],
            group_size: 1,
            region: None,
            status: TicketStatus::Queued,
            created_at_unix_ms: 0,
            assignment: None,
        }
    }

    #[test]
    fn group_size_derivation_handles_nvn_and_plain_qualifiers() {
        assert_eq!(derive_group_size("arena:2v2"), 2);
        assert_eq!(derive_group_size("arena:4"), 4);
        assert_eq!(derive_group_size("arena:ranked"), 1);
        assert_eq!(derive_group_size("arena"), 1);
    }

    #[tokio::test]
    async fn a_full_party_is_formed_and_marked_assigned() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue(ticket("a", "duel", 1)).await.unwrap();
        store.enqueue(ticket("b", "duel", 2)).await.unwrap();

        let mut worker = MatchWorker::new(
            store.clone(),
            vec![QueueConfig {
                queue_key: "duel".to_string(),
                strategy: Arc::new(DefaultStrategy),
                min_wait_ms: 0,
                relax_after_ms: 0,
            }],
        );

        let formed = worker.tick(1_000).await;
        assert_eq!(formed["duel"].len(), 2);
        assert!(store.queued("duel").await.is_empty());
    }

    #[tokio::test]
    async fn cursor_rotates_across_queues_between_ticks() {
        let store = Arc::new(InMemoryStore::new());
        let mut worker = MatchWorker::new(
            store,
            vec![
                QueueConfig {
                    queue_key: "duel".to_string(),
                    strategy: Arc::new(DefaultStrategy),
                    min_wait_ms: 0,
                    relax_after_ms: 0,
                },
                QueueConfig {
                    queue_key: "arena".to_string(),
                    strategy: Arc::new(DefaultStrategy),
                    min_wait_ms: 0,
                    relax_after_ms: 0,
                },
            ],
        );

        assert_eq!(worker.cursor, 0);
        worker.tick(0).await;
        assert_eq!(worker.cursor, 1);
        worker.tick(0).await;
        assert_eq!(worker.cursor, 0);
    }
}
