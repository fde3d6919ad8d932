use std::sync::Arc;
use std::time::Duration;

use crate::domain::order::{CreateOrder, Order, OrderId};
use crate::error::ServiceError;
use crate::messaging::{QueueError, QueueMessage, QueuePublisher};
use crate::metrics::Metrics;
use crate::store::{with_timeout, StatusStore, StoreError};
use crate::utils::{retry_on_transient, RetryConfig};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub store_timeout: Duration,
    /// Bound on a single publish attempt
    pub publish_timeout: Duration,
    pub publish_retry: RetryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(5),
            publish_retry: RetryConfig::default(),
        }
    }
}

/// Accepts orders and answers status queries. Cheap to clone.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn StatusStore>,
    publisher: Arc<dyn QueuePublisher>,
    metrics: Arc<Metrics>,
    config: ServiceConfig,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn StatusStore>,
        publisher: Arc<dyn QueuePublisher>,
        metrics: Arc<Metrics>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics,
            config,
        }
    }

    /// Validate, persist as RECEIVED, publish the wake-up message and return
    /// without waiting for processing.
    pub async fn create_order(&self, command: CreateOrder) -> Result<Order, ServiceError> {
        let details = match command.validate() {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected invalid order");
                self.metrics.record_order_rejected("invalid_argument");
                return Err(e.into());
            }
        };

        let order = Order::receive(OrderId::generate(), details);

        // Runs detached: once the record is written, the publish step
        // completes even if the caller goes away.
        let service = self.clone();
        let accepted = tokio::spawn(async move { service.accept(order).await })
            .await
            .map_err(|e| ServiceError::Internal(format!("order acceptance task failed: {}", e)))
            .and_then(|result| result);

        match &accepted {
            Ok(order) => {
                self.metrics.orders_created.inc();
                tracing::info!(
                    order_id = %order.id,
                    item_count = order.items.len(),
                    total = %order.total,
                    "✅ Order accepted"
                );
            }
            Err(e) => self.metrics.record_order_rejected(e.kind()),
        }

        accepted
    }

    pub async fn get_order_status(&self, order_id: &str) -> Result<Order, ServiceError> {
        let id = OrderId::from(order_id);

        match with_timeout(self.config.store_timeout, self.store.get(&id)).await {
            Ok(Some(order)) => Ok(order),
            Ok(None) => Err(ServiceError::NotFound(order_id.to_string())),
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::error!(order_id = %order_id, error = %e, "Unreadable order record");
                Err(ServiceError::Internal(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Status store read failed");
                Err(ServiceError::Unavailable(format!("status store unavailable: {}", e)))
            }
        }
    }

    async fn accept(&self, order: Order) -> Result<Order, ServiceError> {
        with_timeout(self.config.store_timeout, self.store.put(&order))
            .await
            .map_err(|e| {
                tracing::error!(order_id = %order.id, error = %e, "Failed to persist new order");
                ServiceError::Unavailable(format!("status store unavailable: {}", e))
            })?;

        tracing::debug!(order_id = %order.id, "Order persisted as RECEIVED");

        let message = QueueMessage::new(order.id.clone());
        let published = retry_on_transient(self.config.publish_retry.clone(), |attempt| {
            let publisher = Arc::clone(&self.publisher);
            let metrics = Arc::clone(&self.metrics);
            let message = message.clone();
            let limit = self.config.publish_timeout;

            async move {
                tracing::debug!(attempt = attempt, order_id = %message.order_id, "Publishing order");
                let result = match tokio::time::timeout(limit, publisher.publish(&message)).await {
                    Ok(result) => result,
                    Err(_) => Err(QueueError::Timeout(limit)),
                };
                metrics.record_publish_attempt(result.is_ok());
                result
            }
        })
        .await
        .into_result();

        match published {
            Ok(()) => Ok(order),
            Err(e) => {
                self.mark_unpublishable(order, &e).await;
                Err(ServiceError::Unavailable(format!("order queue unavailable: {}", e)))
            }
        }
    }

    /// An order whose wake-up message could not be published would sit in
    /// RECEIVED forever; record it as FAILED instead.
    async fn mark_unpublishable(&self, mut order: Order, cause: &QueueError) {
        if let Err(e) = order.fail(format!("could not enqueue order for processing: {}", cause)) {
            tracing::error!(order_id = %order.id, error = %e, "Cannot mark unpublished order as failed");
            return;
        }

        match with_timeout(self.config.store_timeout, self.store.put(&order)).await {
            Ok(()) => tracing::error!(
                order_id = %order.id,
                error = %cause,
                "❌ Publish failed after retries, order marked FAILED"
            ),
            Err(e) => tracing::error!(
                order_id = %order.id,
                publish_error = %cause,
                store_error = %e,
                "Publish failed and order could not be marked FAILED; left in RECEIVED"
            ),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
