use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{OrderRepository, RepositoryError};
use crate::domain::order::{Order, OrderStatus, StatusExtra};

// ============================================================================
// In-Memory Order Repository
// ============================================================================
//
// The map lock is held only for lookup and insert. Each order sits behind
// its own mutex, so two updates to the same ID never interleave while
// updates to different IDs run concurrently.
//
// ============================================================================

pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Arc<Mutex<Order>>>>,
    failing_writes: AtomicU32,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            failing_writes: AtomicU32::new(0),
        }
    }

    /// The next `count` writes fail with a storage error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn scripted_failure(&self) -> Result<(), RepositoryError> {
        let fail = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RepositoryError::Storage("scripted write failure".to_string()));
        }
        Ok(())
    }

    async fn entry(&self, order_id: Uuid) -> Result<Arc<Mutex<Order>>, RepositoryError> {
        self.orders
            .read()
            .await
            .get(&order_id)
            .cloned()
            .ok_or(RepositoryError::NotFound(order_id))
    }

    async fn mutate<F>(&self, order_id: Uuid, change: F) -> Result<Order, RepositoryError>
    where
        F: FnOnce(&mut Order) -> Result<bool, RepositoryError> + Send,
    {
        let entry = self.entry(order_id).await?;
        let mut order = entry.lock().await;

        // Work on a copy so a failed write leaves the record untouched
        let mut next = order.clone();
        if change(&mut next)? {
            self.scripted_failure()?;
            *order = next;
        }

        Ok(order.clone())
    }
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        self.scripted_failure()?;

        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Duplicate(order.id));
        }
        orders.insert(order.id, Arc::new(Mutex::new(order.clone())));

        tracing::debug!(order_id = %order.id, "Order stored");
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        let entry = self.entry(order_id).await?;
        let order = entry.lock().await.clone();
        Ok(order)
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extra: &StatusExtra,
    ) -> Result<Order, RepositoryError> {
        self.mutate(order_id, |order| Ok(order.apply(status, extra)?))
            .await
    }

    async fn attach_payment_link(&self, order_id: Uuid, link: &str) -> Result<Order, RepositoryError> {
        self.mutate(order_id, |order| Ok(order.attach_payment_link(link)?))
            .await
    }

    async fn mark_published(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        self.mutate(order_id, |order| Ok(order.mark_published(Utc::now())))
            .await
    }

    async fn delete(&self, order_id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.orders.write().await.remove(&order_id).is_some())
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        Ok(self.orders.read().await.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderItem;

    fn order() -> Order {
        Order::new(
            "c1",
            vec![OrderItem {
                id: "sku-1".to_string(),
                name: "Burger".to_string(),
                quantity: 2,
                price_id: "price_sku-1".to_string(),
                unit_price: 500,
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = InMemoryOrderRepository::new();
        let order = order();

        repo.create(&order).await.unwrap();

        assert_eq!(repo.get(order.id).await.unwrap(), order);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let repo = InMemoryOrderRepository::new();
        let order = order();

        repo.create(&order).await.unwrap();
        let err = repo.create(&order).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Duplicate(id) if id == order.id));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let id = Uuid::new_v4();

        assert!(matches!(repo.get(id).await, Err(RepositoryError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_fulfilled_rejects_every_other_status() {
        let repo = InMemoryOrderRepository::new();
        let order = order();
        repo.create(&order).await.unwrap();

        for status in [OrderStatus::AwaitingPayment, OrderStatus::Paid, OrderStatus::Fulfilled] {
            repo.update_status(order.id, status, &StatusExtra::default())
                .await
                .unwrap();
        }

        for status in [
            OrderStatus::Pending,
            OrderStatus::AwaitingPayment,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
        ] {
            let err = repo
                .update_status(order.id, status, &StatusExtra::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RepositoryError::InvalidTransition { from: OrderStatus::Fulfilled, .. }
            ));
        }

        assert_eq!(repo.get(order.id).await.unwrap().status, OrderStatus::Fulfilled);
    }

    #[tokio::test]
    async fn test_payment_link_is_idempotent() {
        let repo = InMemoryOrderRepository::new();
        let order = order();
        repo.create(&order).await.unwrap();

        let first = repo.attach_payment_link(order.id, "https://pay/abc").await.unwrap();
        let second = repo.attach_payment_link(order.id, "https://pay/abc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.payment_link.as_deref(), Some("https://pay/abc"));
        assert_eq!(second.status, OrderStatus::AwaitingPayment);

        let err = repo.attach_payment_link(order.id, "https://pay/other").await.unwrap_err();
        assert!(matches!(err, RepositoryError::PaymentLinkConflict));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_record_untouched() {
        let repo = InMemoryOrderRepository::new();
        let order = order();
        repo.create(&order).await.unwrap();

        repo.fail_next_writes(1);
        let err = repo
            .update_status(order.id, OrderStatus::Cancelled, &StatusExtra::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Storage(_)));
        assert_eq!(repo.get(order.id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_updates_to_one_order_are_serialized() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let order = order();
        repo.create(&order).await.unwrap();

        // Many callers race to attach different links; exactly one wins
        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.attach_payment_link(order.id, &format!("https://pay/{}", i))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(repo.get(order.id).await.unwrap().payment_link.is_some());
    }

    #[tokio::test]
    async fn test_mark_published_is_idempotent() {
        let repo = InMemoryOrderRepository::new();
        let order = order();
        repo.create(&order).await.unwrap();
        assert!(!repo.get(order.id).await.unwrap().is_published());

        let first = repo.mark_published(order.id).await.unwrap();
        let second = repo.mark_published(order.id).await.unwrap();

        assert!(first.is_published());
        assert_eq!(first.published_at, second.published_at);
        assert_eq!(first.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = InMemoryOrderRepository::new();
        let order = order();
        repo.create(&order).await.unwrap();

        assert!(repo.delete(order.id).await.unwrap());
        assert!(!repo.delete(order.id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
