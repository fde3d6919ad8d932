// ============================================================================
// Actors Module
// ============================================================================
//
// Infrastructure actors built on tokio tasks and channels. Domain logic
// never runs inside an actor.
//
// ============================================================================

mod health;
mod health_monitor;
mod probes;

pub use health::{ComponentHealth, HealthCheckable, HealthStatus};
pub use health_monitor::{HealthMonitorActor, HealthMonitorHandle, SystemHealth};
pub use probes::{BackendPoolProbe, PublisherProbe, StoreProbe};
