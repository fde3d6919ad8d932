// ============================================================================
// Gateway - stateless front door for the Order Service
// ============================================================================
//
// backend: one Order Service instance reachable over gRPC
// pool:    round-robin selection, per-backend circuit breaker, failover
// server:  the gRPC interface, identical to the Order Service's
// rest:    HTTP/JSON facade over the same pool
//
// ============================================================================

mod backend;
mod pool;
mod rest;
mod server;

pub use backend::{GrpcBackend, OrderBackend};
pub use pool::{BackendPool, Method, PoolConfig, PoolError};
pub use rest::{configure_routes, start_rest_server};
pub use server::GatewayService;
