// ============================================================================
// Messaging - broker hand-off and cross-process trace context
// ============================================================================

mod consumer;
mod memory;
mod publisher;
mod redpanda;
mod trace_context;

pub use consumer::{run_memory_consumer, InboundMessage, MessageHandler, RedpandaConsumer};
pub use memory::InMemoryBroker;
pub use publisher::{DeclaredQueues, EventPublisher, OutboundMessage, PublishError};
pub use redpanda::RedpandaPublisher;
pub use trace_context::TracePropagator;
