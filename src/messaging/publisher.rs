use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::utils::{CircuitState, IsTransient};

// ============================================================================
// Event Publisher - durable hand-off to a named queue
// ============================================================================
//
// Success means the broker accepted the message, not that any consumer has
// processed it. Delivery is always durable: publishers only report success
// once the broker has persisted the message. Every failure is a value
// returned to the caller.
//
// ============================================================================

/// A message ready for the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub queue: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("failed to declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    #[error("failed to publish to '{queue}': {reason}")]
    Send { queue: String, reason: String },

    #[error("broker circuit open, refusing to publish to '{queue}'")]
    CircuitOpen { queue: String },

    #[error("publish to '{queue}' timed out after {timeout_ms}ms")]
    Timeout { queue: String, timeout_ms: u64 },
}

impl IsTransient for PublishError {
    fn is_transient(&self) -> bool {
        // An open circuit will not close within a retry window
        !matches!(self, PublishError::CircuitOpen { .. })
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Create the destination if it does not exist. Idempotent.
    async fn declare(&self, queue: &str) -> Result<(), PublishError>;

    /// Declare on first use, then publish with durable delivery
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;

    fn name(&self) -> &'static str;

    async fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }
}

/// Remembers which queues were declared by this process so publishers only
/// pay for the declaration round-trip once per queue.
#[derive(Debug, Default)]
pub struct DeclaredQueues {
    queues: RwLock<HashSet<String>>,
}

impl DeclaredQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, queue: &str) -> bool {
        self.queues.read().await.contains(queue)
    }

    pub async fn mark(&self, queue: &str) {
        self.queues.write().await.insert(queue.to_string());
    }

    /// Run `declare` unless the queue is already known. Concurrent first
    /// callers may both declare; declaration is idempotent so that is fine.
    pub async fn ensure<F, Fut>(&self, queue: &str, declare: F) -> Result<(), PublishError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), PublishError>>,
    {
        if self.contains(queue).await {
            return Ok(());
        }

        declare().await?;
        self.mark(queue).await;
        Ok(())
    }
}
