use serde::{Deserialize, Serialize};

use super::errors::OrderError;
use super::value_objects::RequestedItem;

// ============================================================================
// Order Commands - Represent caller intent
// ============================================================================

/// Inbound order creation request. Consumed once, never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub items: Vec<RequestedItem>,
}

impl CreateOrderRequest {
    pub fn new(customer_id: impl Into<String>, items: Vec<RequestedItem>) -> Self {
        Self {
            customer_id: customer_id.into(),
            items,
        }
    }

    /// Shape checks that need no collaborator: non-empty customer and items,
    /// item ids present, quantities strictly positive.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.customer_id.trim().is_empty() {
            return Err(OrderError::EmptyCustomer);
        }

        if self.items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for item in &self.items {
            if item.id.trim().is_empty() {
                return Err(OrderError::EmptyItemId);
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    item_id: item.id.clone(),
                    quantity: item.quantity,
                });
            }
        }

        Ok(())
    }

    /// Requested items with duplicates folded together, first-seen order kept.
    pub fn merged_items(&self) -> Vec<RequestedItem> {
        let mut merged: Vec<RequestedItem> = Vec::with_capacity(self.items.len());

        for item in &self.items {
            match merged.iter_mut().find(|m| m.id == item.id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
                None => merged.push(item.clone()),
            }
        }

        merged
    }
}

/// Optional data that travels with a status change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusExtra {
    pub payment_link: Option<String>,
}

impl StatusExtra {
    pub fn with_payment_link(link: impl Into<String>) -> Self {
        Self {
            payment_link: Some(link.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_customer() {
        let request = CreateOrderRequest::new("  ", vec![RequestedItem::new("sku-1", 1)]);
        assert_eq!(request.validate(), Err(OrderError::EmptyCustomer));
    }

    #[test]
    fn test_validate_rejects_empty_items() {
        let request = CreateOrderRequest::new("c1", vec![]);
        assert_eq!(request.validate(), Err(OrderError::EmptyItems));
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let request = CreateOrderRequest::new(
            "c1",
            vec![RequestedItem::new("sku-1", 2), RequestedItem::new("sku-2", 0)],
        );
        assert!(matches!(
            request.validate(),
            Err(OrderError::InvalidQuantity { ref item_id, quantity: 0 }) if item_id == "sku-2"
        ));
    }

    #[test]
    fn test_merged_items_sums_duplicates_in_order() {
        let request = CreateOrderRequest::new(
            "c1",
            vec![
                RequestedItem::new("sku-1", 2),
                RequestedItem::new("sku-2", 1),
                RequestedItem::new("sku-1", 3),
            ],
        );

        let merged = request.merged_items();
        assert_eq!(
            merged,
            vec![RequestedItem::new("sku-1", 5), RequestedItem::new("sku-2", 1)]
        );
    }
}
