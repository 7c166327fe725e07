use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// Unpublished Ledger
// ============================================================================
//
// Failed publication attempts seen by this process: attempt counts, the
// last error and the age of the backlog for metrics and health. Whether an
// order still needs its event is decided by the stored `published_at`
// marker, so losing this ledger on restart loses statistics only.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpublishedEntry {
    pub order_id: Uuid,
    pub first_failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Default)]
pub struct UnpublishedLedger {
    entries: RwLock<HashMap<Uuid, UnpublishedEntry>>,
}

impl UnpublishedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed publication attempt
    pub async fn record(&self, order_id: Uuid, error: &str) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(order_id).or_insert_with(|| UnpublishedEntry {
            order_id,
            first_failed_at: Utc::now(),
            attempts: 0,
            last_error: String::new(),
        });
        entry.attempts += 1;
        entry.last_error = error.to_string();
    }

    pub async fn contains(&self, order_id: Uuid) -> bool {
        self.entries.read().await.contains_key(&order_id)
    }

    pub async fn get(&self, order_id: Uuid) -> Option<UnpublishedEntry> {
        self.entries.read().await.get(&order_id).cloned()
    }

    /// Returns whether the order was pending publication
    pub async fn remove(&self, order_id: Uuid) -> bool {
        self.entries.write().await.remove(&order_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Oldest failures first
    pub async fn pending(&self) -> Vec<UnpublishedEntry> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|entry| entry.first_failed_at);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_counts_attempts() {
        let ledger = UnpublishedLedger::new();
        let id = Uuid::new_v4();

        ledger.record(id, "broker down").await;
        ledger.record(id, "still down").await;

        let entry = ledger.get(id).await.unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error, "still down");
        assert_eq!(ledger.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let ledger = UnpublishedLedger::new();
        let id = Uuid::new_v4();
        ledger.record(id, "broker down").await;

        assert!(ledger.remove(id).await);
        assert!(!ledger.remove(id).await);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_pending_lists_oldest_first() {
        let ledger = UnpublishedLedger::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        ledger.record(first, "broker down").await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        ledger.record(second, "broker down").await;
        ledger.record(first, "still down").await;

        let pending = ledger.pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].order_id, first);
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[1].order_id, second);
    }
}
