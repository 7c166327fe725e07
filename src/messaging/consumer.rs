use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::{BorrowedMessage, Headers, Message},
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::publisher::OutboundMessage;
use crate::config::BrokerConfig;

// ============================================================================
// Consumers - the broker side of downstream services
// ============================================================================
//
// Both loops hand each message to a `MessageHandler` and keep going when the
// handler fails: a poisoned message must not stop the consumer. They exit
// when the shutdown token is cancelled.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            queue: message.queue,
            payload: message.payload,
            headers: message.headers,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> anyhow::Result<()>;
}

pub struct RedpandaConsumer {
    consumer: StreamConsumer,
    queue: String,
}

impl RedpandaConsumer {
    pub fn new(config: &BrokerConfig, group_id: &str, queue: &str) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(&[queue])?;

        Ok(Self {
            consumer,
            queue: queue.to_string(),
        })
    }

    fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
        let mut headers = HashMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        InboundMessage {
            queue: message.topic().to_string(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        }
    }

    pub async fn run(self, handler: Arc<dyn MessageHandler>, shutdown: CancellationToken) {
        tracing::info!(queue = %self.queue, "Consumer started");

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.consumer.recv() => received,
            };

            match received {
                Ok(message) => {
                    if let Err(e) = handler.handle(Self::to_inbound(&message)).await {
                        tracing::error!(
                            error = %e,
                            queue = %self.queue,
                            offset = message.offset(),
                            "Handler failed, skipping message"
                        );
                    }
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(error = %e, "Failed to commit offset");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, queue = %self.queue, "Consumer receive error");
                }
            }
        }

        tracing::info!(queue = %self.queue, "Consumer stopped");
    }
}

/// Consume from the in-memory broker feed, filtered to one queue
pub async fn run_memory_consumer(
    mut feed: broadcast::Receiver<OutboundMessage>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = feed.recv() => received,
        };

        match received {
            Ok(message) if message.queue == queue => {
                if let Err(e) = handler.handle(message.into()).await {
                    tracing::error!(error = %e, queue = %queue, "Handler failed, skipping message");
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, queue = %queue, "In-memory consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{EventPublisher, InMemoryBroker};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: InboundMessage) -> anyhow::Result<()> {
            let mut seen = self.seen.lock().await;
            seen.push(message);
            if seen.len() == 1 {
                anyhow::bail!("first message fails");
            }
            Ok(())
        }
    }

    fn outbound(queue: &str, body: &str) -> OutboundMessage {
        OutboundMessage {
            queue: queue.to_string(),
            key: "k".to_string(),
            payload: body.as_bytes().to_vec(),
            headers: HashMap::new(),
            content_type: "application/json".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_consumer_filters_queue_and_survives_handler_errors() {
        let broker = InMemoryBroker::new();
        let recorder = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_memory_consumer(
            broker.subscribe(),
            "order.created".to_string(),
            recorder.clone(),
            shutdown.clone(),
        ));

        broker.publish(outbound("order.created", "1")).await.unwrap();
        broker.publish(outbound("other", "x")).await.unwrap();
        broker.publish(outbound("order.created", "2")).await.unwrap();

        for _ in 0..50 {
            if recorder.seen.lock().await.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        task.await.unwrap();

        let seen = recorder.seen.lock().await;
        let bodies: Vec<&[u8]> = seen.iter().map(|m| m.payload.as_slice()).collect();
        assert_eq!(bodies, vec![b"1".as_slice(), b"2".as_slice()]);
    }
}
