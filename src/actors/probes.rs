use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::health::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::gateway::BackendPool;
use crate::messaging::QueuePublisher;
use crate::store::{with_timeout, StatusStore};
use crate::utils::CircuitState;

// ============================================================================
// Health Probes
// ============================================================================

/// Round-trips the Status Store.
pub struct StoreProbe {
    store: Arc<dyn StatusStore>,
    timeout: Duration,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn StatusStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl HealthCheckable for StoreProbe {
    fn component_name(&self) -> &str {
        "status_store"
    }

    async fn check_health(&self) -> ComponentHealth {
        let status = match with_timeout(self.timeout, self.store.ping()).await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        };
        ComponentHealth::new(self.component_name(), status)
    }
}

/// Reports the queue publisher's own view of the broker.
pub struct PublisherProbe {
    publisher: Arc<dyn QueuePublisher>,
}

impl PublisherProbe {
    pub fn new(publisher: Arc<dyn QueuePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl HealthCheckable for PublisherProbe {
    fn component_name(&self) -> &str {
        "queue_publisher"
    }

    async fn check_health(&self) -> ComponentHealth {
        ComponentHealth::new(self.component_name(), self.publisher.health().await)
    }
}

/// Degraded while some backend circuits are open, unhealthy when all are.
pub struct BackendPoolProbe {
    pool: Arc<BackendPool>,
}

impl BackendPoolProbe {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheckable for BackendPoolProbe {
    fn component_name(&self) -> &str {
        "backend_pool"
    }

    async fn check_health(&self) -> ComponentHealth {
        let states = self.pool.backend_states().await;
        let open: Vec<&str> = states
            .iter()
            .filter(|(_, state)| *state == CircuitState::Open)
            .map(|(address, _)| address.as_str())
            .collect();

        let status = if open.is_empty() {
            HealthStatus::Healthy
        } else if open.len() == states.len() {
            HealthStatus::Unhealthy("every backend circuit is open".to_string())
        } else {
            HealthStatus::Degraded(format!("open circuits: {}", open.join(", ")))
        };

        ComponentHealth::new(self.component_name(), status)
            .with_details(format!("{} backends configured", states.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryQueue;
    use crate::store::InMemoryStatusStore;

    #[tokio::test]
    async fn test_store_probe_follows_availability() {
        let store = Arc::new(InMemoryStatusStore::new());
        let probe = StoreProbe::new(store.clone(), Duration::from_millis(100));

        assert!(probe.check_health().await.status.is_healthy());

        store.set_available(false);
        assert!(probe.check_health().await.status.is_unhealthy());
    }

    #[tokio::test]
    async fn test_publisher_probe_defaults_to_healthy() {
        let probe = PublisherProbe::new(Arc::new(InMemoryQueue::new(Duration::from_secs(1))));
        let health = probe.check_health().await;
        assert_eq!(health.name, "queue_publisher");
        assert!(health.status.is_healthy());
    }
}
