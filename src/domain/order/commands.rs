use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::errors::OrderError;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// Raw creation request as it arrives from the wire.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_name: String,
    pub items: Vec<String>,
    pub total: f64,
}

/// A creation request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub customer_name: String,
    pub items: Vec<String>,
    pub total: Decimal,
}

impl CreateOrder {
    pub fn validate(self) -> Result<OrderDetails, OrderError> {
        if self.customer_name.trim().is_empty() {
            return Err(OrderError::EmptyCustomerName);
        }

        if self.items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        if let Some(position) = self.items.iter().position(|item| item.trim().is_empty()) {
            return Err(OrderError::BlankItem(position));
        }

        if !self.total.is_finite() {
            return Err(OrderError::NonFiniteTotal(self.total));
        }

        if self.total < 0.0 {
            return Err(OrderError::NegativeTotal(self.total));
        }

        let total = Decimal::from_f64(self.total).ok_or(OrderError::NonFiniteTotal(self.total))?;

        Ok(OrderDetails {
            customer_name: self.customer_name,
            items: self.items,
            total,
        })
    }
}
