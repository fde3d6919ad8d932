// ============================================================================
// Queue - at-least-once channel from CreateOrder to the Worker
// ============================================================================
//
// A message carries only the order id. It is a wake-up signal; the Worker
// always re-reads the order from the Status Store.
//
// Implementations:
// - redpanda::{RedpandaPublisher, RedpandaConsumer}  (Kafka protocol)
// - in_memory::InMemoryQueue                          (tests, standalone)
//
// ============================================================================

mod in_memory;
mod redpanda;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actors::HealthStatus;
use crate::domain::order::OrderId;
use crate::utils::IsTransient;

pub use in_memory::{InMemoryConsumer, InMemoryQueue};
pub use redpanda::{RedpandaConsumer, RedpandaPublisher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub order_id: OrderId,
}

impl QueueMessage {
    pub fn new(order_id: OrderId) -> Self {
        Self { order_id }
    }

    pub fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    /// Unknown extra fields are ignored so older, fatter payloads still decode.
    pub fn decode(payload: &str) -> Result<Self, QueueError> {
        serde_json::from_str(payload).map_err(|e| QueueError::Malformed(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker open, broker considered unavailable")]
    CircuitOpen,

    #[error("broker error: {0}")]
    Broker(String),

    #[error("malformed queue message: {0}")]
    Malformed(String),

    #[error("queue closed")]
    Closed,
}

impl IsTransient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Timeout(_) | QueueError::CircuitOpen | QueueError::Broker(_)
        )
    }
}

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;

    async fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[async_trait]
pub trait QueueConsumer: Send {
    /// Wait for the next delivery.
    async fn receive(&mut self) -> Result<Delivery, QueueError>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}

/// A received message plus the handle that acknowledges it. Dropping a
/// delivery without acking leaves it eligible for redelivery.
pub struct Delivery {
    pub message: QueueMessage,
    /// 1 on first delivery; higher when the broker can tell it was redelivered
    pub attempt: u32,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: QueueMessage, attempt: u32, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
