// ============================================================================
// Order Service - CreateOrder / GetOrderStatus
// ============================================================================
//
// orders: the business core (validate, write-then-publish, status reads)
// grpc:   tonic binding of the remote interface
//
// ============================================================================

mod grpc;
mod orders;

pub use grpc::OrderGrpc;
pub use orders::{OrderService, ServiceConfig};
