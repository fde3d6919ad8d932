// ============================================================================
// Order Domain
// ============================================================================
//
// - Value objects (OrderId, OrderStatus)
// - Commands (CreateOrder and its validated form)
// - Errors (OrderError)
// - Aggregate (Order record and its lifecycle rules)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod errors;
pub mod aggregate;

pub use value_objects::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
