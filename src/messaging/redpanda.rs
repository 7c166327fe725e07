use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::publisher::{DeclaredQueues, EventPublisher, OutboundMessage, PublishError};
use crate::config::BrokerConfig;
use crate::domain::order::events::headers;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Redpanda (Kafka API) Publisher
// ============================================================================
//
// Durability is a producer-level property on Kafka: `acks=all` plus the
// idempotent producer means an acknowledged message is on every in-sync
// replica. Queues map to topics, created through the admin API on first use.
//
// ============================================================================

pub struct RedpandaPublisher {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    declared: DeclaredQueues,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
    partitions: i32,
    replication: i32,
}

impl RedpandaPublisher {
    pub fn new(config: &BrokerConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = Self::producer_config(config).create()?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            admin,
            declared: DeclaredQueues::new(),
            circuit_breaker: CircuitBreaker::new("redpanda", cb_config),
            send_timeout: config.send_timeout,
            partitions: config.partitions,
            replication: config.replication_factor,
        })
    }

    /// Every send waits for all in-sync replicas; there is no fire-and-forget mode
    fn producer_config(config: &BrokerConfig) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.send_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true");
        client
    }

    fn owned_headers(message: &OutboundMessage) -> OwnedHeaders {
        let mut owned = OwnedHeaders::new_with_capacity(message.headers.len() + 1);

        if !message.headers.contains_key(headers::CONTENT_TYPE) {
            owned = owned.insert(Header {
                key: headers::CONTENT_TYPE,
                value: Some(message.content_type.as_str()),
            });
        }

        for (key, value) in &message.headers {
            owned = owned.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        owned
    }

    fn map_send_error(&self, queue: &str, error: KafkaError) -> PublishError {
        match error {
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => PublishError::Timeout {
                queue: queue.to_string(),
                timeout_ms: self.send_timeout.as_millis() as u64,
            },
            other => PublishError::Send {
                queue: queue.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl EventPublisher for RedpandaPublisher {
    async fn declare(&self, queue: &str) -> Result<(), PublishError> {
        let topic = NewTopic::new(queue, self.partitions, TopicReplication::Fixed(self.replication));
        let options = AdminOptions::new().operation_timeout(Some(self.send_timeout));

        let results = self
            .admin
            .create_topics(&[topic], &options)
            .await
            .map_err(|e| PublishError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(PublishError::Declare {
                        queue: name,
                        reason: code.to_string(),
                    })
                }
            }
        }

        tracing::info!(queue = %queue, "Declared topic");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.declared
            .ensure(&message.queue, || self.declare(&message.queue))
            .await?;

        let owned_headers = Self::owned_headers(&message);

        // Use circuit breaker to protect against Redpanda failures
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&message.queue)
                    .key(message.key.as_str())
                    .payload(message.payload.as_slice())
                    .headers(owned_headers);

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    queue = %message.queue,
                    key = %message.key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::Open(_)) => {
                tracing::error!(
                    queue = %message.queue,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(PublishError::CircuitOpen {
                    queue: message.queue.clone(),
                })
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(
                    error = %e,
                    queue = %message.queue,
                    "Failed to publish to Redpanda"
                );
                Err(self.map_send_error(&message.queue, e))
            }
        }
    }

    fn name(&self) -> &'static str {
        "redpanda"
    }

    async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;
    use std::collections::HashMap;

    fn message_with(headers: HashMap<String, String>) -> OutboundMessage {
        OutboundMessage {
            queue: "order.created".to_string(),
            key: "k".to_string(),
            payload: b"{}".to_vec(),
            headers,
            content_type: "application/json".to_string(),
        }
    }

    #[test]
    fn test_owned_headers_adds_content_type_when_missing() {
        let mut trace = HashMap::new();
        trace.insert("traceparent".to_string(), "00-abc-def-01".to_string());

        let owned = RedpandaPublisher::owned_headers(&message_with(trace));
        let keys: Vec<&str> = owned.iter().map(|h| h.key).collect();

        assert_eq!(owned.count(), 2);
        assert!(keys.contains(&"traceparent"));
        assert!(keys.contains(&headers::CONTENT_TYPE));
    }

    #[test]
    fn test_owned_headers_keeps_explicit_content_type() {
        let mut explicit = HashMap::new();
        explicit.insert(headers::CONTENT_TYPE.to_string(), "application/json".to_string());

        let owned = RedpandaPublisher::owned_headers(&message_with(explicit));
        assert_eq!(owned.count(), 1);
    }

    #[test]
    fn test_producer_always_waits_for_all_replicas() {
        let config = crate::config::Config::test().broker;
        let producer = RedpandaPublisher::producer_config(&config);

        assert_eq!(producer.get("acks"), Some("all"));
        assert_eq!(producer.get("enable.idempotence"), Some("true"));
        assert_eq!(producer.get("bootstrap.servers"), Some(config.brokers.as_str()));
    }
}
