use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::commands::OrderDetails;
use super::errors::OrderError;
use super::value_objects::{OrderId, OrderStatus};

// ============================================================================
// Order Record - authoritative state kept in the Status Store
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: OrderId,

    // Contents, immutable after creation
    pub customer_name: String,
    pub items: Vec<String>,
    pub total: Decimal,

    // Lifecycle
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A freshly accepted order in `RECEIVED`.
    pub fn receive(id: OrderId, details: OrderDetails) -> Self {
        let now = Utc::now();
        Self {
            id,
            customer_name: details.customer_name,
            items: details.items,
            total: details.total,
            status: OrderStatus::Received,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_processing(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), OrderError> {
        self.transition(OrderStatus::Processed)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition(OrderStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }

        tracing::debug!(
            order_id = %self.id,
            from = %self.status,
            to = %next,
            "Order status transition"
        );

        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
