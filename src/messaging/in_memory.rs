use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Acknowledge, Delivery, QueueConsumer, QueueError, QueueMessage, QueuePublisher};

// ============================================================================
// In-Memory Queue
// ============================================================================
//
// At-least-once, competing consumers. A received message stays in flight
// until acked; if the ack does not arrive within `redelivery_timeout` the
// message goes back to the front of the queue.
//
// ============================================================================

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    redelivery_timeout: Duration,
    failing_publishes: AtomicU32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<u64, InFlight>,
    next_tag: u64,
    closed: bool,
}

#[derive(Clone)]
struct Envelope {
    message: QueueMessage,
    deliveries: u32,
}

struct InFlight {
    envelope: Envelope,
    deadline: Instant,
}

impl InMemoryQueue {
    pub fn new(redelivery_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                redelivery_timeout,
                failing_publishes: AtomicU32::new(0),
            }),
        }
    }

    /// A new competing consumer on this queue.
    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Make the next `count` publishes fail with a broker error.
    #[cfg(test)]
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Messages waiting for a consumer.
    #[cfg(test)]
    pub async fn ready_len(&self) -> usize {
        self.inner.state.lock().await.ready.len()
    }

    /// Messages delivered but not yet acknowledged.
    #[cfg(test)]
    pub async fn in_flight_len(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }

    /// Wake every consumer and make further receives fail with `Closed`.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl QueuePublisher for InMemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        if self.take_injected_failure() {
            return Err(QueueError::Broker("injected publish failure".to_string()));
        }

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.ready.push_back(Envelope {
            message: message.clone(),
            deliveries: 0,
        });
        drop(state);

        self.inner.notify.notify_one();
        Ok(())
    }
}

pub struct InMemoryConsumer {
    inner: Arc<Inner>,
}

impl QueueState {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in expired {
            if let Some(flight) = self.in_flight.remove(&tag) {
                tracing::warn!(
                    order_id = %flight.envelope.message.order_id,
                    deliveries = flight.envelope.deliveries,
                    "Ack timeout elapsed, message returned to queue"
                );
                self.ready.push_front(flight.envelope);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|flight| flight.deadline).min()
    }
}

#[async_trait]
impl QueueConsumer for InMemoryConsumer {
    async fn receive(&mut self) -> Result<Delivery, QueueError> {
        loop {
            let wait = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(QueueError::Closed);
                }

                let now = Instant::now();
                state.requeue_expired(now);

                if let Some(mut envelope) = state.ready.pop_front() {
                    envelope.deliveries += 1;
                    let tag = state.next_tag;
                    state.next_tag += 1;
                    state.in_flight.insert(
                        tag,
                        InFlight {
                            envelope: envelope.clone(),
                            deadline: now + self.inner.redelivery_timeout,
                        },
                    );

                    let acker = InMemoryAck {
                        inner: Arc::clone(&self.inner),
                        tag,
                    };
                    return Ok(Delivery::new(envelope.message, envelope.deliveries, Box::new(acker)));
                }

                state
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(now).min(IDLE_POLL))
                    .unwrap_or(IDLE_POLL)
            };

            let _ = tokio::time::timeout(wait, self.inner.notify.notified()).await;
        }
    }
}

struct InMemoryAck {
    inner: Arc<Inner>,
    tag: u64,
}

#[async_trait]
impl Acknowledge for InMemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().await;
        if state.in_flight.remove(&self.tag).is_none() {
            // already timed out and handed to another consumer
            tracing::debug!(tag = self.tag, "Late ack for redelivered message ignored");
        }
        Ok(())
    }
}
