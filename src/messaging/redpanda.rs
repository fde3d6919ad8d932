use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};

use super::{Acknowledge, Delivery, QueueConsumer, QueueError, QueueMessage, QueuePublisher};
use crate::actors::HealthStatus;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, TransitionHook};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Redpanda / Kafka adapter
// ============================================================================
//
// Publisher: keyed by order id, guarded by a circuit breaker.
// Consumer:  auto-commit disabled; a delivery's offset is committed only
//            when the worker acks it. A dropped delivery is re-read by
//            seeking back before the next receive; after a restart or
//            rebalance reading resumes from the last commit.
//
// ============================================================================

pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaPublisher {
    pub fn new(
        brokers: &str,
        topic: impl Into<String>,
        send_timeout: Duration,
        breaker_hook: Option<TransitionHook>,
    ) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| QueueError::Broker(format!("failed to create producer: {}", e)))?;

        let mut circuit_breaker = CircuitBreaker::new(
            "redpanda",
            CircuitBreakerConfig {
                failure_threshold: 5,
                timeout: Duration::from_secs(30),
                success_threshold: 3,
            },
        );
        if let Some(hook) = breaker_hook {
            circuit_breaker = circuit_breaker.with_transition_hook(hook);
        }

        Ok(Self {
            producer,
            topic: topic.into(),
            send_timeout,
            circuit_breaker,
        })
    }

    pub async fn get_circuit_breaker_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}

#[async_trait]
impl QueuePublisher for RedpandaPublisher {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        let key = message.order_id.to_string();

        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
                self.producer
                    .send(record, self.send_timeout)
                    .await
                    .map_err(|(e, _)| QueueError::Broker(format!("Kafka send error: {}", e)))
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(topic = %self.topic, order_id = %key, "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %self.topic, "Circuit breaker open - Redpanda unavailable");
                Err(QueueError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %self.topic, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    async fn health(&self) -> HealthStatus {
        match self.get_circuit_breaker_state().await {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
    /// Last delivery handed out and not yet acked
    outstanding: Arc<Mutex<Option<Position>>>,
    /// Position we rewound to and how often it has been delivered
    rewound: Option<(Position, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl RedpandaConsumer {
    /// `redelivery_timeout` bounds how long one message may be held before
    /// the broker considers this member dead and reassigns its partitions.
    pub fn new(
        brokers: &str,
        group_id: &str,
        topic: &str,
        redelivery_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("max.poll.interval.ms", redelivery_timeout.as_millis().to_string())
            .create()
            .map_err(|e| QueueError::Broker(format!("failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| QueueError::Broker(format!("failed to subscribe to {}: {}", topic, e)))?;

        tracing::info!(topic = %topic, group_id = %group_id, "Subscribed to Redpanda topic");

        Ok(Self {
            consumer: Arc::new(consumer),
            outstanding: Arc::new(Mutex::new(None)),
            rewound: None,
        })
    }

    /// Committing a later offset would implicitly ack an earlier dropped
    /// delivery, so seek back to it before reading anything else.
    fn rewind_unacked(&mut self) -> Result<(), QueueError> {
        let unacked = match self.outstanding.lock() {
            Ok(mut outstanding) => outstanding.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(position) = unacked else {
            return Ok(());
        };

        tracing::warn!(
            partition = position.partition,
            offset = position.offset,
            "Rewinding to unacknowledged message"
        );
        self.consumer
            .seek(&position.topic, position.partition, Offset::Offset(position.offset), SEEK_TIMEOUT)
            .map_err(|e| QueueError::Broker(format!("Kafka seek error: {}", e)))?;

        let deliveries = match &self.rewound {
            Some((previous, count)) if *previous == position => count + 1,
            _ => 2,
        };
        self.rewound = Some((position, deliveries));
        Ok(())
    }

    fn attempt_for(&self, position: &Position) -> u32 {
        match &self.rewound {
            Some((rewound, deliveries)) if rewound == position => *deliveries,
            _ => 1,
        }
    }
}

#[async_trait]
impl QueueConsumer for RedpandaConsumer {
    async fn receive(&mut self) -> Result<Delivery, QueueError> {
        self.rewind_unacked()?;

        loop {
            let (decoded, position) = {
                let message = self
                    .consumer
                    .recv()
                    .await
                    .map_err(|e| QueueError::Broker(format!("Kafka receive error: {}", e)))?;

                let decoded = match message.payload_view::<str>() {
                    Some(Ok(text)) => QueueMessage::decode(text),
                    Some(Err(e)) => Err(QueueError::Malformed(e.to_string())),
                    None => Err(QueueError::Malformed("empty payload".to_string())),
                };

                let position = Position {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                };
                (decoded, position)
            };

            let ack = RedpandaAck {
                consumer: Arc::clone(&self.consumer),
                outstanding: Arc::clone(&self.outstanding),
                position: position.clone(),
            };

            match decoded {
                Ok(queue_message) => {
                    let attempt = self.attempt_for(&position);
                    if let Ok(mut outstanding) = self.outstanding.lock() {
                        *outstanding = Some(position);
                    }
                    return Ok(Delivery::new(queue_message, attempt, Box::new(ack)));
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        partition = position.partition,
                        offset = position.offset,
                        "Dropping undecodable message"
                    );
                    Box::new(ack).ack().await?;
                }
            }
        }
    }
}

struct RedpandaAck {
    consumer: Arc<StreamConsumer>,
    outstanding: Arc<Mutex<Option<Position>>>,
    position: Position,
}

#[async_trait]
impl Acknowledge for RedpandaAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &self.position.topic,
                self.position.partition,
                Offset::Offset(self.position.offset + 1),
            )
            .map_err(|e| QueueError::Broker(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| QueueError::Broker(format!("Kafka commit error: {}", e)))?;

        if let Ok(mut outstanding) = self.outstanding.lock() {
            if outstanding.as_ref() == Some(&self.position) {
                *outstanding = None;
            }
        }
        Ok(())
    }
}
