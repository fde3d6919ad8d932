mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub use server::{start_metrics_server, MetricsServerState};

use crate::utils::{CircuitState, TransitionHook};
use std::sync::Arc;

// ============================================================================
// Metrics - Prometheus metrics for every process role
// ============================================================================
//
// Order service: accepted / rejected orders, publish retries
// Worker:        delivery outcomes, processing latency
// Gateway:       backend calls by outcome, circuit breaker state
//
// Scraped via GET /metrics on the metrics server.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Order service
    pub orders_created: IntCounter,
    pub orders_rejected: IntCounterVec,
    pub publish_attempts: IntCounterVec,

    // Worker
    pub deliveries_handled: IntCounterVec,
    pub processing_duration: HistogramVec,

    // Gateway
    pub backend_calls: IntCounterVec,

    // Circuit breakers
    pub circuit_breaker_transitions: IntCounterVec,
    pub open_circuits: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounter::new("orders_created_total", "Orders accepted and published")?;
        registry.register(Box::new(orders_created.clone()))?;

        let orders_rejected = IntCounterVec::new(
            Opts::new("orders_rejected_total", "CreateOrder calls that returned an error"),
            &["reason"],
        )?;
        registry.register(Box::new(orders_rejected.clone()))?;

        let publish_attempts = IntCounterVec::new(
            Opts::new("queue_publish_attempts_total", "Queue publish attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(publish_attempts.clone()))?;

        let deliveries_handled = IntCounterVec::new(
            Opts::new("worker_deliveries_total", "Queue deliveries handled by the worker"),
            &["outcome"],
        )?;
        registry.register(Box::new(deliveries_handled.clone()))?;

        let processing_duration = HistogramVec::new(
            HistogramOpts::new("worker_processing_duration_seconds", "Order processing duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let backend_calls = IntCounterVec::new(
            Opts::new("gateway_backend_calls_total", "Gateway calls forwarded to backends"),
            &["backend", "method", "outcome"],
        )?;
        registry.register(Box::new(backend_calls.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["breaker", "from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let open_circuits = IntGauge::new("circuit_breakers_open", "Circuit breakers currently open")?;
        registry.register(Box::new(open_circuits.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            orders_rejected,
            publish_attempts,
            deliveries_handled,
            processing_duration,
            backend_calls,
            circuit_breaker_transitions,
            open_circuits,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_order_rejected(&self, reason: &str) {
        self.orders_rejected.with_label_values(&[reason]).inc();
    }

    pub fn record_publish_attempt(&self, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.publish_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn record_delivery(&self, outcome: &str, duration_secs: Option<f64>) {
        self.deliveries_handled.with_label_values(&[outcome]).inc();
        if let Some(secs) = duration_secs {
            self.processing_duration.with_label_values(&[outcome]).observe(secs);
        }
    }

    pub fn record_backend_call(&self, backend: &str, method: &str, outcome: &str) {
        self.backend_calls.with_label_values(&[backend, method, outcome]).inc();
    }

    pub fn record_circuit_breaker_transition(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        self.circuit_breaker_transitions
            .with_label_values(&[breaker, from.as_str(), to.as_str()])
            .inc();
        if to == CircuitState::Open {
            self.open_circuits.inc();
        } else if from == CircuitState::Open {
            self.open_circuits.dec();
        }
    }

    /// Hook that feeds breaker transitions into these metrics.
    pub fn breaker_hook(self: &Arc<Self>) -> TransitionHook {
        let metrics = Arc::clone(self);
        Arc::new(move |name: &str, from: CircuitState, to: CircuitState| {
            metrics.record_circuit_breaker_transition(name, from, to)
        })
    }
}
