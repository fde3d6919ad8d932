use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("customer_name must not be empty")]
    EmptyCustomerName,

    #[error("order must contain at least one item")]
    EmptyItems,

    #[error("item at position {0} is empty")]
    BlankItem(usize),

    #[error("total must be a finite number, got {0}")]
    NonFiniteTotal(f64),

    #[error("total must not be negative, got {0}")]
    NegativeTotal(f64),

    #[error("cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },
}

impl OrderError {
    /// Validation errors are caused by the caller's input; the rest are defects.
    pub fn is_validation(&self) -> bool {
        !matches!(self, OrderError::InvalidStatusTransition { .. })
    }
}
