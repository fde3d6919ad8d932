use std::time::Duration;

use async_trait::async_trait;

use crate::domain::order::Order;
use crate::utils::IsTransient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessingError {
    #[error("transient processing failure: {0}")]
    Transient(String),

    #[error("order rejected by fulfillment: {0}")]
    Permanent(String),
}

impl IsTransient for ProcessingError {
    fn is_transient(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }
}

/// The fulfillment step run between PROCESSING and a terminal status.
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    async fn process(&self, order: &Order) -> Result<(), ProcessingError>;
}

/// Stand-in for real fulfillment: waits a fixed delay and succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedFulfillment {
    delay: Duration,
}

impl SimulatedFulfillment {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl OrderProcessor for SimulatedFulfillment {
    async fn process(&self, order: &Order) -> Result<(), ProcessingError> {
        tracing::debug!(
            order_id = %order.id,
            delay_ms = self.delay.as_millis() as u64,
            "Simulating fulfillment"
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
