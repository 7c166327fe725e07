use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::publisher::{DeclaredQueues, EventPublisher, OutboundMessage, PublishError};

// ============================================================================
// In-Memory Broker
// ============================================================================
//
// Stand-in for Redpanda in tests and in local runs without a broker.
// Keeps every accepted message per queue and fans them out to subscribers.
// Failures can be scripted to exercise the orchestrator's error paths.
//
// ============================================================================

const SUBSCRIBER_CAPACITY: usize = 1024;

pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, Vec<OutboundMessage>>>,
    declared: DeclaredQueues,
    feed: broadcast::Sender<OutboundMessage>,
    failing_publishes: AtomicU32,
    failing_declares: AtomicU32,
    declare_calls: AtomicU32,
    latency: Option<Duration>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            queues: RwLock::new(HashMap::new()),
            declared: DeclaredQueues::new(),
            feed,
            failing_publishes: AtomicU32::new(0),
            failing_declares: AtomicU32::new(0),
            declare_calls: AtomicU32::new(0),
            latency: None,
        }
    }

    /// Delay every publish by `latency` (for timeout/cancellation tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `count` publishes fail with a send error
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// The next `count` declarations fail
    pub fn fail_next_declares(&self, count: u32) {
        self.failing_declares.store(count, Ordering::SeqCst);
    }

    pub fn declare_calls(&self) -> u32 {
        self.declare_calls.load(Ordering::SeqCst)
    }

    /// Messages accepted on `queue`, oldest first
    pub async fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        self.queues
            .read()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Live feed of every message accepted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.feed.subscribe()
    }

    fn take_scripted_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn declare(&self, queue: &str) -> Result<(), PublishError> {
        self.declare_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_scripted_failure(&self.failing_declares) {
            return Err(PublishError::Declare {
                queue: queue.to_string(),
                reason: "scripted declare failure".to_string(),
            });
        }

        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.declared
            .ensure(&message.queue, || self.declare(&message.queue))
            .await?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if Self::take_scripted_failure(&self.failing_publishes) {
            return Err(PublishError::Send {
                queue: message.queue.clone(),
                reason: "scripted publish failure".to_string(),
            });
        }

        tracing::debug!(
            queue = %message.queue,
            key = %message.key,
            bytes = message.payload.len(),
            "Message accepted by in-memory broker"
        );

        self.queues
            .write()
            .await
            .entry(message.queue.clone())
            .or_default()
            .push(message.clone());

        // No subscribers is fine
        let _ = self.feed.send(message);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
