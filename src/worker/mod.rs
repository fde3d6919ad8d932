// ============================================================================
// Worker - consumes queue messages and drives orders to a terminal status
// ============================================================================
//
// For every delivery:
// 1. Re-read the order from the Status Store (the message is only a hint)
// 2. Terminal already? Duplicate delivery -> ack, no change
// 3. RECEIVED/PROCESSING -> PROCESSING, persist
// 4. Run the processor (transient errors retried)
// 5. PROCESSED or FAILED, persist
// 6. Ack
//
// A store outage leaves the delivery un-acked so the queue redelivers it. A
// record that can never be processed (corrupt, or in a status that refuses
// the transition) is acked as unprocessable.
//
// ============================================================================

mod processor;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::domain::order::{Order, OrderError, OrderId, OrderStatus};
use crate::messaging::{Delivery, QueueConsumer, QueueError};
use crate::metrics::Metrics;
use crate::store::{with_timeout, StatusStore, StoreError};
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

pub use processor::{OrderProcessor, ProcessingError, SimulatedFulfillment};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub store_timeout: Duration,
    pub store_retry: RetryConfig,
    pub processing_retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            store_retry: RetryConfig::default(),
            processing_retry: RetryConfig::default(),
        }
    }
}

/// How a delivery was resolved. Every outcome is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed,
    /// The order was already terminal
    Duplicate,
    /// No record exists for the id in the message
    Missing,
    /// The record cannot be read or moved forward; redelivery would not help
    Unprocessable,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "processed",
            Outcome::Failed => "failed",
            Outcome::Duplicate => "duplicate",
            Outcome::Missing => "missing",
            Outcome::Unprocessable => "unprocessable",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("status store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] OrderError),

    #[error("acknowledge failed: {0}")]
    Ack(QueueError),
}

impl IsTransient for WorkerError {
    fn is_transient(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Transition(_) => false,
            WorkerError::Ack(_) => true,
        }
    }
}

#[derive(Clone)]
pub struct OrderWorker {
    store: Arc<dyn StatusStore>,
    processor: Arc<dyn OrderProcessor>,
    metrics: Arc<Metrics>,
    config: WorkerConfig,
}

impl OrderWorker {
    pub fn new(
        store: Arc<dyn StatusStore>,
        processor: Arc<dyn OrderProcessor>,
        metrics: Arc<Metrics>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            metrics,
            config,
        }
    }

    /// Pull deliveries until `shutdown` flips to true or the queue closes.
    /// The in-flight delivery is always finished before returning.
    pub async fn run<C: QueueConsumer>(&self, mut consumer: C, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("🔄 Worker started, waiting for orders");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = consumer.receive() => received,
            };

            match received {
                Ok(delivery) => {
                    // Logged inside handle; the delivery will come back.
                    if self.handle(delivery).await.is_err() {
                        tokio::time::sleep(RECEIVE_BACKOFF).await;
                    }
                }
                Err(QueueError::Closed) => {
                    tracing::info!("Queue closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive from queue, backing off");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        tracing::info!("🛑 Worker stopped");
    }

    /// Process one delivery and acknowledge it only once its outcome is
    /// persisted. On a transient error the delivery is dropped un-acked.
    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome, WorkerError> {
        let started = Instant::now();
        let order_id = delivery.message.order_id.clone();

        tracing::info!(
            order_id = %order_id,
            attempt = delivery.attempt,
            "📬 Received order message"
        );

        let outcome = match self.process(&order_id).await {
            Ok(outcome) => outcome,
            Err(e) if !e.is_transient() => {
                tracing::error!(
                    order_id = %order_id,
                    error = %e,
                    "☠️  Order cannot be processed, discarding message"
                );
                Outcome::Unprocessable
            }
            Err(e) => {
                tracing::error!(
                    order_id = %order_id,
                    error = %e,
                    "Order handling failed, leaving message for redelivery"
                );
                self.metrics.record_delivery("error", None);
                return Err(e);
            }
        };

        delivery.ack().await.map_err(|e| {
            tracing::error!(order_id = %order_id, error = %e, "Failed to acknowledge message");
            WorkerError::Ack(e)
        })?;

        let elapsed = started.elapsed().as_secs_f64();
        let timed = matches!(outcome, Outcome::Processed | Outcome::Failed);
        self.metrics
            .record_delivery(outcome.as_str(), timed.then_some(elapsed));

        Ok(outcome)
    }

    pub async fn process(&self, order_id: &OrderId) -> Result<Outcome, WorkerError> {
        let Some(mut order) = self.load(order_id).await? else {
            tracing::warn!(order_id = %order_id, "No record for queued order, discarding message");
            return Ok(Outcome::Missing);
        };

        if order.is_terminal() {
            tracing::info!(
                order_id = %order_id,
                status = %order.status,
                "⏭️  Order already terminal, skipping duplicate delivery"
            );
            return Ok(Outcome::Duplicate);
        }

        if order.status == OrderStatus::Processing {
            tracing::warn!(order_id = %order_id, "Re-entering processing after redelivery");
        }

        order.start_processing()?;
        self.save(&order).await?;
        tracing::info!(order_id = %order_id, status = %order.status, "Processing order");

        let result = retry_on_transient(self.config.processing_retry.clone(), |attempt| {
            let processor = Arc::clone(&self.processor);
            let snapshot = order.clone();
            async move {
                tracing::debug!(order_id = %snapshot.id, attempt = attempt, "Running fulfillment");
                processor.process(&snapshot).await
            }
        })
        .await;

        let outcome = match result {
            RetryResult::Success(()) => {
                order.complete()?;
                Outcome::Processed
            }
            RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
                order.fail(e.to_string())?;
                Outcome::Failed
            }
        };

        self.save(&order).await?;

        match outcome {
            Outcome::Processed => tracing::info!(order_id = %order_id, "✅ Order processed"),
            _ => tracing::error!(
                order_id = %order_id,
                reason = order.failure_reason.as_deref().unwrap_or_default(),
                "❌ Order failed"
            ),
        }

        Ok(outcome)
    }

    async fn load(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        let limit = self.config.store_timeout;
        retry_on_transient(self.config.store_retry.clone(), |_| {
            with_timeout(limit, self.store.get(order_id))
        })
        .await
        .into_result()
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let limit = self.config.store_timeout;
        retry_on_transient(self.config.store_retry.clone(), |_| {
            with_timeout(limit, self.store.put(order))
        })
        .await
        .into_result()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderDetails;
    use crate::messaging::{InMemoryQueue, QueueMessage, QueuePublisher};
    use crate::store::InMemoryStatusStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            store_timeout: Duration::from_millis(200),
            store_retry: fast_retry(2),
            processing_retry: fast_retry(3),
        }
    }

    fn worker(store: Arc<dyn StatusStore>, processor: Arc<dyn OrderProcessor>) -> OrderWorker {
        OrderWorker::new(store, processor, Arc::new(Metrics::new().unwrap()), config())
    }

    fn instant() -> Arc<dyn OrderProcessor> {
        Arc::new(SimulatedFulfillment::new(Duration::ZERO))
    }

    fn received(id: &str) -> Order {
        Order::receive(
            OrderId::from(id),
            OrderDetails {
                customer_name: "Ana Silva".to_string(),
                items: vec!["Pizza".to_string(), "Soda".to_string()],
                total: dec!(45.50),
            },
        )
    }

    struct Rejecting;

    #[async_trait]
    impl OrderProcessor for Rejecting {
        async fn process(&self, _order: &Order) -> Result<(), ProcessingError> {
            Err(ProcessingError::Permanent("item out of stock".into()))
        }
    }

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderProcessor for Flaky {
        async fn process(&self, _order: &Order) -> Result<(), ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            {
                Ok(_) => Err(ProcessingError::Transient("kitchen busy".into())),
                Err(_) => Ok(()),
            }
        }
    }

    /// Records every status written, in order.
    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryStatusStore,
        history: Mutex<Vec<OrderStatus>>,
    }

    #[async_trait]
    impl StatusStore for RecordingStore {
        async fn put(&self, order: &Order) -> Result<(), StoreError> {
            self.inner.put(order).await?;
            self.history.lock().await.push(order.status);
            Ok(())
        }

        async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get(id).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_processing_keeps_order_contents() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();

        let outcome = worker(store.clone(), instant()).process(&order.id).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);

        let done = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(done.status, OrderStatus::Processed);
        assert_eq!(done.customer_name, order.customer_name);
        assert_eq!(done.items, order.items);
        assert_eq!(done.total, order.total);
        assert_eq!(done.created_at, order.created_at);
        assert!(done.updated_at >= order.updated_at);
    }

    #[tokio::test]
    async fn test_status_history_never_skips() {
        let store = Arc::new(RecordingStore::default());
        let order = received("order-1");
        store.inner.put(&order).await.unwrap();

        worker(store.clone(), instant()).process(&order.id).await.unwrap();

        assert_eq!(
            *store.history.lock().await,
            vec![OrderStatus::Processing, OrderStatus::Processed]
        );
    }

    #[tokio::test]
    async fn test_terminal_order_is_left_untouched() {
        let store = Arc::new(RecordingStore::default());
        let order = received("order-1");
        store.inner.put(&order).await.unwrap();
        let worker = worker(store.clone(), instant());

        worker.process(&order.id).await.unwrap();
        let first = store.inner.get(&order.id).await.unwrap().unwrap();

        let outcome = worker.process(&order.id).await.unwrap();
        assert_eq!(outcome, Outcome::Duplicate);
        assert_eq!(store.inner.get(&order.id).await.unwrap().unwrap(), first);
        assert_eq!(store.history.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_marks_failed() {
        let store = Arc::new(RecordingStore::default());
        let order = received("order-1");
        store.inner.put(&order).await.unwrap();

        let outcome = worker(store.clone(), Arc::new(Rejecting)).process(&order.id).await.unwrap();
        assert_eq!(outcome, Outcome::Failed);

        let failed = store.inner.get(&order.id).await.unwrap().unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
        assert!(failed.failure_reason.unwrap().contains("out of stock"));
        assert_eq!(
            *store.history.lock().await,
            vec![OrderStatus::Processing, OrderStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();
        let flaky = Arc::new(Flaky::new(2));

        let outcome = worker(store.clone(), flaky.clone()).process(&order.id).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_transient_failures_mark_failed() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();

        let outcome = worker(store.clone(), Arc::new(Flaky::new(10)))
            .process(&order.id)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_redelivery_mid_processing_completes() {
        let store = Arc::new(InMemoryStatusStore::new());
        let mut order = received("order-1");
        order.start_processing().unwrap();
        store.put(&order).await.unwrap();

        let outcome = worker(store.clone(), instant()).process(&order.id).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);
    }

    #[tokio::test]
    async fn test_missing_record_is_acknowledged() {
        let queue = InMemoryQueue::new(Duration::from_secs(30));
        queue.publish(&QueueMessage::new(OrderId::from("ghost"))).await.unwrap();
        let mut consumer = queue.consumer();

        let worker = worker(Arc::new(InMemoryStatusStore::new()), instant());
        let outcome = worker.handle(consumer.receive().await.unwrap()).await.unwrap();

        assert_eq!(outcome, Outcome::Missing);
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn test_store_outage_leaves_message_for_redelivery() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();

        let queue = InMemoryQueue::new(Duration::from_millis(50));
        queue.publish(&QueueMessage::new(order.id.clone())).await.unwrap();
        let mut consumer = queue.consumer();
        let worker = worker(store.clone(), instant());

        store.set_available(false);
        let result = worker.handle(consumer.receive().await.unwrap()).await;
        assert!(matches!(result, Err(WorkerError::Store(_))));
        assert_eq!(queue.in_flight_len().await, 1);

        store.set_available(true);
        let redelivered = consumer.receive().await.unwrap();
        assert_eq!(redelivered.attempt, 2);

        let outcome = worker.handle(redelivered).await.unwrap();
        assert_eq!(outcome, Outcome::Processed);
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(
            store.get(&order.id).await.unwrap().unwrap().status,
            OrderStatus::Processed
        );
    }

    /// Holds a record that no longer decodes.
    struct CorruptStore;

    #[async_trait]
    impl StatusStore for CorruptStore {
        async fn put(&self, _order: &Order) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
            Err(StoreError::Corrupt {
                key: format!("order:{}", id),
                reason: "expected value at line 1 column 1".into(),
            })
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_corrupt_record_is_acknowledged_as_unprocessable() {
        let queue = InMemoryQueue::new(Duration::from_millis(50));
        queue.publish(&QueueMessage::new(OrderId::from("broken"))).await.unwrap();
        queue.publish(&QueueMessage::new(OrderId::from("order-2"))).await.unwrap();
        let mut consumer = queue.consumer();
        let worker = worker(Arc::new(CorruptStore), instant());

        let delivery = consumer.receive().await.unwrap();
        assert_eq!(delivery.message.order_id, OrderId::from("broken"));
        let outcome = worker.handle(delivery).await.unwrap();

        assert_eq!(outcome, Outcome::Unprocessable);
        assert_eq!(queue.in_flight_len().await, 0);

        let next = consumer.receive().await.unwrap();
        assert_eq!(next.message.order_id, OrderId::from("order-2"));
        assert_eq!(next.attempt, 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_acknowledged_without_change() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();

        let queue = InMemoryQueue::new(Duration::from_secs(30));
        let message = QueueMessage::new(order.id.clone());
        queue.publish(&message).await.unwrap();
        queue.publish(&message).await.unwrap();
        let mut consumer = queue.consumer();
        let worker = worker(store.clone(), instant());

        assert_eq!(
            worker.handle(consumer.receive().await.unwrap()).await.unwrap(),
            Outcome::Processed
        );
        let after_first = store.get(&order.id).await.unwrap().unwrap();

        assert_eq!(
            worker.handle(consumer.receive().await.unwrap()).await.unwrap(),
            Outcome::Duplicate
        );
        assert_eq!(store.get(&order.id).await.unwrap().unwrap(), after_first);
        assert_eq!(queue.in_flight_len().await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(InMemoryStatusStore::new());
        let order = received("order-1");
        store.put(&order).await.unwrap();

        let queue = InMemoryQueue::new(Duration::from_secs(30));
        queue.publish(&QueueMessage::new(order.id.clone())).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = worker(store.clone(), instant());
        let consumer = queue.consumer();
        let task = tokio::spawn(async move { worker.run(consumer, rx).await });

        for _ in 0..50 {
            if store.get(&order.id).await.unwrap().unwrap().status == OrderStatus::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            store.get(&order.id).await.unwrap().unwrap().status,
            OrderStatus::Processed
        );

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
