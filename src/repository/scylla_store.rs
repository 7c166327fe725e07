use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::value::Row;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{OrderRepository, RepositoryError};
use crate::config::StorageConfig;
use crate::domain::order::{Order, OrderItem, OrderStatus, StatusExtra};

// ============================================================================
// ScyllaDB Order Repository
// ============================================================================
//
// One row per order, items kept as a JSON text column. Creation uses
// `IF NOT EXISTS`; every update is a lightweight transaction guarded by the
// row version, so writers in other processes cannot be lost. Writers in
// this process additionally queue on a per-order lock to avoid burning
// LWT rounds against each other. `published_at` is stored with the row so
// an order whose event never went out is visible to every instance.
//
// ============================================================================

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
    id uuid PRIMARY KEY,
    customer_id text,
    items text,
    status text,
    payment_link text,
    published_at timestamp,
    version bigint,
    created_at timestamp,
    updated_at timestamp
)";

type OrderRow = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Per-order locks for writers in this process. An entry lives only while
/// someone holds or waits for it.
#[derive(Default)]
struct OrderLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    async fn acquire(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Call once the guard is dropped. Removes the entry when the map and
    /// `lock` are the last two owners.
    async fn release(&self, order_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let last_user = locks
            .get(&order_id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock) && Arc::strong_count(&lock) == 2);
        if last_user {
            locks.remove(&order_id);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

pub struct ScyllaOrderRepository {
    session: Arc<Session>,
    locks: OrderLocks,
}

fn storage(err: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

impl ScyllaOrderRepository {
    /// Connect, then make sure the keyspace and table exist
    pub async fn connect(config: &StorageConfig) -> Result<Self, RepositoryError> {
        tracing::info!(nodes = ?config.nodes, keyspace = %config.keyspace, "Connecting to ScyllaDB...");

        let session: Session = SessionBuilder::new()
            .known_nodes(&config.nodes)
            .build()
            .await
            .map_err(storage)?;

        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                    config.keyspace, config.replication_factor
                ),
                &[],
            )
            .await
            .map_err(storage)?;

        session
            .use_keyspace(&config.keyspace, false)
            .await
            .map_err(storage)?;

        session.query_unpaged(CREATE_TABLE, &[]).await.map_err(storage)?;

        Ok(Self::new(Arc::new(session)))
    }

    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            locks: OrderLocks::default(),
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<(Order, i64), RepositoryError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT id, customer_id, items, status, payment_link, published_at, version, created_at, updated_at
                 FROM orders WHERE id = ?",
                (order_id,),
            )
            .await
            .map_err(storage)?;

        let rows = result.into_rows_result().map_err(storage)?;
        match rows.maybe_first_row::<OrderRow>().map_err(storage)? {
            Some(row) => decode_row(row),
            None => Err(RepositoryError::NotFound(order_id)),
        }
    }

    async fn mutate<F>(&self, order_id: Uuid, change: F) -> Result<Order, RepositoryError>
    where
        F: FnOnce(&mut Order) -> Result<bool, RepositoryError> + Send,
    {
        let lock = self.locks.acquire(order_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_change(order_id, change).await
        };
        self.locks.release(order_id, lock).await;
        result
    }

    async fn apply_change<F>(&self, order_id: Uuid, change: F) -> Result<Order, RepositoryError>
    where
        F: FnOnce(&mut Order) -> Result<bool, RepositoryError> + Send,
    {
        let (mut order, version) = self.load(order_id).await?;
        if !change(&mut order)? {
            return Ok(order);
        }

        let result = self
            .session
            .query_unpaged(
                "UPDATE orders SET status = ?, payment_link = ?, published_at = ?, version = ?, updated_at = ?
                 WHERE id = ? IF version = ?",
                (
                    order.status.as_str(),
                    order.payment_link.as_deref(),
                    order.published_at,
                    version + 1,
                    order.updated_at,
                    order_id,
                    version,
                ),
            )
            .await
            .map_err(storage)?;

        if !was_applied(result)? {
            tracing::warn!(order_id = %order_id, version, "Concurrent modification detected");
            return Err(RepositoryError::Storage(format!(
                "order {} was modified concurrently",
                order_id
            )));
        }

        Ok(order)
    }
}

fn decode_row(row: OrderRow) -> Result<(Order, i64), RepositoryError> {
    let (id, customer_id, items, status, payment_link, published_at, version, created_at, updated_at) = row;

    let items: Vec<OrderItem> = serde_json::from_str(&items)?;
    let status: OrderStatus = status.parse().map_err(RepositoryError::Storage)?;

    Ok((
        Order {
            id,
            customer_id,
            items,
            status,
            payment_link,
            published_at,
            created_at,
            updated_at,
        },
        version,
    ))
}

/// Reads the `[applied]` column every LWT response starts with
fn was_applied(result: QueryResult) -> Result<bool, RepositoryError> {
    let rows = result.into_rows_result().map_err(storage)?;
    let first = rows.maybe_first_row::<Row>().map_err(storage)?;

    Ok(first
        .and_then(|row| row.columns.into_iter().next().flatten())
        .and_then(|applied| applied.as_boolean())
        .unwrap_or(false))
}

#[async_trait]
impl OrderRepository for ScyllaOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        let items = serde_json::to_string(&order.items)?;

        let result = self
            .session
            .query_unpaged(
                "INSERT INTO orders (id, customer_id, items, status, payment_link, published_at, version, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                (
                    order.id,
                    order.customer_id.as_str(),
                    items,
                    order.status.as_str(),
                    order.payment_link.as_deref(),
                    order.published_at,
                    1_i64,
                    order.created_at,
                    order.updated_at,
                ),
            )
            .await
            .map_err(storage)?;

        if !was_applied(result)? {
            return Err(RepositoryError::Duplicate(order.id));
        }

        tracing::debug!(order_id = %order.id, "Order stored in ScyllaDB");
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Order, RepositoryError> {
        self.load(order_id).await.map(|(order, _)| order)
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
        let lock = self.locks.acquire(order_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self
                .session
                .query_unpaged("DELETE FROM orders WHERE id = ? IF EXISTS", (order_id,))
                .await
            {
                Ok(result) => was_applied(result),
                Err(e) => Err(storage(e)),
            }
        };
        self.locks.release(order_id, lock).await;
        result
    }

    async fn count(&self) -> Result<usize, RepositoryError> {
        let result = self
            .session
            .query_unpaged("SELECT COUNT(*) FROM orders", &[])
            .await
            .map_err(storage)?;

        let rows = result.into_rows_result().map_err(storage)?;
        let (count,) = rows
            .maybe_first_row::<(i64,)>()
            .map_err(storage)?
            .unwrap_or((0,));
        Ok(count.max(0) as usize)
    }

    fn name(&self) -> &'static str {
        "scylla"
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
