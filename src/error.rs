use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

use crate::domain::order::OrderError;

// ============================================================================
// Service Error Taxonomy
// ============================================================================
//
// InvalidArgument  malformed input, nothing was written
// NotFound         unknown order id
// Unavailable      store / queue / backend unreachable, safe to retry
// Internal         a defect, surfaced as-is
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<OrderError> for ServiceError {
    fn from(error: OrderError) -> Self {
        if error.is_validation() {
            ServiceError::InvalidArgument(error.to_string())
        } else {
            ServiceError::Internal(error.to_string())
        }
    }
}

/// Trailer set on every status the order service produces itself, so a
/// caller can tell an answered error from a transport failure with the same code.
pub const ERROR_ORIGIN_KEY: &str = "x-order-error-origin";
const ERROR_ORIGIN_SERVICE: &str = "order-service";

impl From<ServiceError> for Status {
    fn from(error: ServiceError) -> Self {
        let mut status = match error {
            ServiceError::InvalidArgument(msg) => Status::invalid_argument(msg),
            ServiceError::NotFound(msg) => Status::not_found(msg),
            ServiceError::Unavailable(msg) => Status::unavailable(msg),
            ServiceError::Internal(msg) => Status::internal(msg),
        };
        status
            .metadata_mut()
            .insert(ERROR_ORIGIN_KEY, MetadataValue::from_static(ERROR_ORIGIN_SERVICE));
        status
    }
}

/// True when `status` was produced by an order service handler.
pub fn answered_by_service(status: &Status) -> bool {
    status
        .metadata()
        .get(ERROR_ORIGIN_KEY)
        .is_some_and(|origin| origin == ERROR_ORIGIN_SERVICE)
}

impl From<Status> for ServiceError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument => ServiceError::InvalidArgument(message),
            Code::NotFound => ServiceError::NotFound(message),
            Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted => {
                ServiceError::Unavailable(message)
            }
            _ => ServiceError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;

    #[test]
    fn test_validation_errors_become_invalid_argument() {
        let error: ServiceError = OrderError::EmptyItems.into();
        assert!(matches!(error, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_service_statuses_carry_origin() {
        let status: Status = ServiceError::Unavailable("store down".into()).into();
        assert!(answered_by_service(&status));
        assert!(!answered_by_service(&Status::unavailable("connection refused")));
    }

    #[test]
    fn test_transition_errors_are_internal() {
        let error: ServiceError = OrderError::InvalidStatusTransition {
            from: OrderStatus::Processed,
            to: OrderStatus::Received,
        }
        .into();
        assert_eq!(error.kind(), "internal");
    }

    #[test]
    fn test_status_codes_round_trip() {
        let cases = [
            (ServiceError::InvalidArgument("x".into()), Code::InvalidArgument),
            (ServiceError::NotFound("x".into()), Code::NotFound),
            (ServiceError::Unavailable("x".into()), Code::Unavailable),
            (ServiceError::Internal("x".into()), Code::Internal),
        ];

        for (error, code) in cases {
            let status: Status = error.clone().into();
            assert_eq!(status.code(), code);
            assert_eq!(ServiceError::from(status), error);
        }
    }

    #[test]
    fn test_deadline_exceeded_is_unavailable() {
        let error = ServiceError::from(Status::deadline_exceeded("slow backend"));
        assert_eq!(error, ServiceError::Unavailable("slow backend".into()));
    }
}
