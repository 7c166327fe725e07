use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use opentelemetry::Context;
use tokio::sync::RwLock;

use super::gateway::{StockCheck, StockError, StockGateway};
use crate::domain::order::{OrderItem, RequestedItem};

// ============================================================================
// In-Memory Stock Validator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub price_id: String,
    pub unit_price: i64,
    pub available: u32,
}

impl CatalogEntry {
    pub fn new(id: &str, name: &str, unit_price: i64, available: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price_id: format!("price_{}", id),
            unit_price,
            available,
        }
    }
}

pub struct InMemoryStock {
    catalog: RwLock<HashMap<String, CatalogEntry>>,
    customers: RwLock<HashSet<String>>,
    /// Skip the customer check entirely
    open_customers: bool,
    failing_calls: AtomicU32,
    failing_transient: AtomicBool,
    calls: AtomicU32,
}

impl InMemoryStock {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            customers: RwLock::new(HashSet::new()),
            open_customers: false,
            failing_calls: AtomicU32::new(0),
            failing_transient: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        }
    }

    /// Small catalog that accepts any customer, for local runs
    pub fn demo() -> Self {
        let mut stock = Self::new().with_open_customers();
        for entry in [
            CatalogEntry::new("sku-1", "Burger", 500, 1_000),
            CatalogEntry::new("sku-2", "Fries", 250, 1_000),
            CatalogEntry::new("sku-3", "Soda", 150, 1_000),
        ] {
            stock.catalog.get_mut().insert(entry.id.clone(), entry);
        }
        stock
    }

    pub fn with_open_customers(mut self) -> Self {
        self.open_customers = true;
        self
    }

    pub fn with_item(mut self, entry: CatalogEntry) -> Self {
        self.catalog.get_mut().insert(entry.id.clone(), entry);
        self
    }

    pub fn with_customer(mut self, customer_id: &str) -> Self {
        self.customers.get_mut().insert(customer_id.to_string());
        self
    }

    /// The next `count` calls fail with a transport error
    pub fn fail_next_calls(&self, count: u32, transient: bool) {
        self.failing_transient.store(transient, Ordering::SeqCst);
        self.failing_calls.store(count, Ordering::SeqCst);
    }

    pub async fn set_available(&self, item_id: &str, available: u32) {
        if let Some(entry) = self.catalog.write().await.get_mut(item_id) {
            entry.available = available;
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StockGateway for InMemoryStock {
    async fn check_availability(
        &self,
        _cx: &Context,
        customer_id: &str,
        items: &[RequestedItem],
    ) -> Result<StockCheck, StockError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted {
            return Err(StockError::Transport {
                message: "scripted transport failure".to_string(),
                transient: self.failing_transient.load(Ordering::SeqCst),
            });
        }

        if !self.open_customers && !self.customers.read().await.contains(customer_id) {
            return Err(StockError::UnknownCustomer(customer_id.to_string()));
        }

        let catalog = self.catalog.read().await;
        let mut all_in_stock = true;
        let mut resolved = Vec::with_capacity(items.len());

        for requested in items {
            match catalog.get(&requested.id) {
                Some(entry) if entry.available >= requested.quantity => resolved.push(OrderItem {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    quantity: requested.quantity,
                    price_id: entry.price_id.clone(),
                    unit_price: entry.unit_price,
                }),
                _ => all_in_stock = false,
            }
        }

        Ok(StockCheck {
            all_in_stock,
            items: resolved,
        })
    }
}
