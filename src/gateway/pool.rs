use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonic::{Code, Status};

use super::backend::OrderBackend;
use crate::error::answered_by_service;
use crate::metrics::Metrics;
use crate::proto::{CreateOrderRequest, CreateOrderResponse, GetOrderStatusRequest, GetOrderStatusResponse};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

// ============================================================================
// Backend Pool
// ============================================================================
//
// Each call starts at the next backend in round-robin order and walks the
// ring until one answers:
// - success, or any error the order service itself answered with
//   (INVALID_ARGUMENT, NOT_FOUND, its own UNAVAILABLE, ...), is returned as-is
// - a transport UNAVAILABLE, or a backend whose circuit is open, moves on
//   to the next
// - a timeout moves on only for idempotent calls; a CreateOrder that timed
//   out may already have been accepted, so it fails with UNAVAILABLE
//
// Only transport failures count against a backend's breaker.
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    CreateOrder,
    GetOrderStatus,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::CreateOrder => "CreateOrder",
            Method::GetOrderStatus => "GetOrderStatus",
        }
    }

    fn is_idempotent(self) -> bool {
        matches!(self, Method::GetOrderStatus)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("at least one backend must be configured")]
    NoBackends,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub request_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                timeout: Duration::from_secs(10),
                success_threshold: 1,
            },
        }
    }
}

struct Member {
    backend: Arc<dyn OrderBackend>,
    breaker: CircuitBreaker,
}

pub struct BackendPool {
    members: Vec<Member>,
    next: AtomicUsize,
    request_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl BackendPool {
    pub fn new(
        backends: Vec<Arc<dyn OrderBackend>>,
        config: PoolConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, PoolError> {
        if backends.is_empty() {
            return Err(PoolError::NoBackends);
        }

        let hook = metrics.breaker_hook();
        let members = backends
            .into_iter()
            .map(|backend| {
                let breaker = CircuitBreaker::new(format!("backend:{}", backend.address()), config.breaker.clone())
                    .with_transition_hook(Arc::clone(&hook));
                Member { backend, breaker }
            })
            .collect();

        Ok(Self {
            members,
            next: AtomicUsize::new(0),
            request_timeout: config.request_timeout,
            metrics,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Circuit state per backend, in configuration order.
    pub async fn backend_states(&self) -> Vec<(String, CircuitState)> {
        let mut states = Vec::with_capacity(self.members.len());
        for member in &self.members {
            states.push((member.backend.address().to_string(), member.breaker.get_state().await));
        }
        states
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CreateOrderResponse, Status> {
        self.dispatch(Method::CreateOrder, |backend| {
            let request = request.clone();
            async move { backend.create_order(request).await }
        })
        .await
    }

    pub async fn get_order_status(
        &self,
        request: GetOrderStatusRequest,
    ) -> Result<GetOrderStatusResponse, Status> {
        self.dispatch(Method::GetOrderStatus, |backend| {
            let request = request.clone();
            async move { backend.get_order_status(request).await }
        })
        .await
    }

    async fn dispatch<T, F, Fut>(&self, method: Method, call: F) -> Result<T, Status>
    where
        F: Fn(Arc<dyn OrderBackend>) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let count = self.members.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % count;
        let mut last_error: Option<Status> = None;

        for offset in 0..count {
            let member = &self.members[(start + offset) % count];
            let address = member.backend.address();

            // Outer Err: the backend could not be reached (counts against the
            // breaker). Inner Err: the backend answered with an error.
            let attempt = async {
                match tokio::time::timeout(self.request_timeout, call(Arc::clone(&member.backend))).await {
                    Err(_) => Err(Status::deadline_exceeded(format!(
                        "backend {} did not answer within {:?}",
                        address, self.request_timeout
                    ))),
                    Ok(Err(status)) if is_transport_failure(&status) => Err(status),
                    Ok(answered) => Ok(answered),
                }
            };

            match member.breaker.call(attempt).await {
                Ok(Ok(response)) => {
                    self.metrics.record_backend_call(address, method.as_str(), "ok");
                    tracing::debug!(backend = %address, method = method.as_str(), "Backend call succeeded");
                    return Ok(response);
                }
                Ok(Err(status)) => {
                    self.metrics.record_backend_call(address, method.as_str(), "application_error");
                    tracing::debug!(
                        backend = %address,
                        method = method.as_str(),
                        code = ?status.code(),
                        "Relaying backend error"
                    );
                    return Err(status);
                }
                Err(CircuitBreakerError::CircuitOpen) => {
                    self.metrics.record_backend_call(address, method.as_str(), "circuit_open");
                    tracing::debug!(backend = %address, "Skipping backend with open circuit");
                    last_error = Some(Status::unavailable(format!("backend {} circuit open", address)));
                }
                Err(CircuitBreakerError::OperationFailed(status)) => {
                    self.metrics.record_backend_call(address, method.as_str(), "unreachable");

                    if status.code() == Code::DeadlineExceeded && !method.is_idempotent() {
                        tracing::warn!(
                            backend = %address,
                            method = method.as_str(),
                            "Backend timed out on a non-idempotent call, not failing over"
                        );
                        return Err(Status::unavailable(status.message().to_string()));
                    }

                    tracing::warn!(
                        backend = %address,
                        method = method.as_str(),
                        error = %status.message(),
                        "⚠️  Backend unreachable, failing over"
                    );
                    last_error = Some(status);
                }
            }
        }

        tracing::error!(
            method = method.as_str(),
            backends = count,
            "❌ No order service backend available"
        );

        let detail = last_error
            .map(|status| status.message().to_string())
            .unwrap_or_default();
        Err(Status::unavailable(format!(
            "no order service backend available ({} tried): {}",
            count, detail
        )))
    }
}

fn is_transport_failure(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded) && !answered_by_service(status)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Answers every call with a fixed outcome and counts calls.
    struct FakeBackend {
        address: String,
        reply: Result<(), Code>,
        /// Errors carry the order service's origin trailer.
        answered: bool,
        delay: Duration,
        calls: AtomicU32,
    }

    impl FakeBackend {
        fn new(address: &str, reply: Result<(), Code>) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                reply,
                answered: false,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn answering(address: &str, code: Code) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                reply: Err(code),
                answered: true,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            })
        }

        fn slow(address: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                reply: Ok(()),
                answered: false,
                delay,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn answer<T>(&self, value: T) -> Result<T, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Ok(()) => Ok(value),
                Err(code) => {
                    let status = Status::new(code, format!("{} says no", self.address));
                    if self.answered {
                        Err(ServiceError::from(status).into())
                    } else {
                        Err(status)
                    }
                }
            }
        }
    }

    #[async_trait]
    impl OrderBackend for FakeBackend {
        fn address(&self) -> &str {
            &self.address
        }

        async fn create_order(&self, _request: CreateOrderRequest) -> Result<CreateOrderResponse, Status> {
            self.answer(CreateOrderResponse {
                order_id: self.address.clone(),
                status: "RECEIVED".into(),
            })
            .await
        }

        async fn get_order_status(
            &self,
            request: GetOrderStatusRequest,
        ) -> Result<GetOrderStatusResponse, Status> {
            self.answer(GetOrderStatusResponse {
                order_id: request.order_id,
                status: "RECEIVED".into(),
                ..Default::default()
            })
            .await
        }
    }

    fn pool(backends: Vec<Arc<FakeBackend>>, config: PoolConfig) -> BackendPool {
        let backends = backends
            .into_iter()
            .map(|b| b as Arc<dyn OrderBackend>)
            .collect();
        BackendPool::new(backends, config, Arc::new(Metrics::new().unwrap())).unwrap()
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_name: "Ana Silva".into(),
            items: vec!["Pizza".into()],
            total: 10.0,
        }
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = BackendPool::new(vec![], PoolConfig::default(), Arc::new(Metrics::new().unwrap()));
        assert!(matches!(result, Err(PoolError::NoBackends)));
    }

    #[tokio::test]
    async fn test_round_robin_spreads_calls() {
        let a = FakeBackend::new("a", Ok(()));
        let b = FakeBackend::new("b", Ok(()));
        let pool = pool(vec![a.clone(), b.clone()], PoolConfig::default());

        let mut served = Vec::new();
        for _ in 0..4 {
            served.push(pool.create_order(request()).await.unwrap().order_id);
        }

        assert_eq!(served, vec!["a", "b", "a", "b"]);
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_over() {
        let down = FakeBackend::new("down", Err(Code::Unavailable));
        let up = FakeBackend::new("up", Ok(()));
        let pool = pool(vec![down.clone(), up.clone()], PoolConfig::default());

        for _ in 0..4 {
            let response = pool.create_order(request()).await.unwrap();
            assert_eq!(response.order_id, "up");
        }
        assert_eq!(up.calls(), 4);
    }

    #[tokio::test]
    async fn test_application_errors_are_relayed_without_failover() {
        for code in [Code::InvalidArgument, Code::NotFound, Code::Internal] {
            let a = FakeBackend::new("a", Err(code));
            let b = FakeBackend::new("b", Ok(()));
            let pool = pool(vec![a.clone(), b.clone()], PoolConfig::default());

            let status = pool.create_order(request()).await.unwrap_err();
            assert_eq!(status.code(), code);
            assert_eq!(status.message(), "a says no");
            assert_eq!(b.calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_all_backends_down_is_unavailable() {
        let a = FakeBackend::new("a", Err(Code::Unavailable));
        let b = FakeBackend::new("b", Err(Code::Unavailable));
        let pool = pool(vec![a.clone(), b.clone()], PoolConfig::default());

        let status = pool.create_order(request()).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_backend() {
        let down = FakeBackend::new("down", Err(Code::Unavailable));
        let up = FakeBackend::new("up", Ok(()));
        let config = PoolConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
            ..PoolConfig::default()
        };
        let pool = pool(vec![down.clone(), up.clone()], config);

        for _ in 0..6 {
            pool.create_order(request()).await.unwrap();
        }

        assert_eq!(down.calls(), 1);
        let states = pool.backend_states().await;
        assert_eq!(states[0], ("down".to_string(), CircuitState::Open));
        assert_eq!(states[1], ("up".to_string(), CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_slow_backend_failover_depends_on_idempotence() {
        let config = PoolConfig {
            request_timeout: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        let slow = FakeBackend::slow("slow", Duration::from_secs(5));
        let fast = FakeBackend::new("fast", Ok(()));
        let pool = pool(vec![slow.clone(), fast.clone()], config);

        let status = pool.create_order(request()).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(status.message().contains("did not answer"));
        assert_eq!(fast.calls(), 0);

        pool.create_order(request()).await.unwrap();
        assert_eq!(fast.calls(), 1);

        // Starts at "slow" again and moves on after the timeout.
        let lookup = pool
            .get_order_status(GetOrderStatusRequest { order_id: "x".into() })
            .await
            .unwrap();
        assert_eq!(lookup.order_id, "x");
        assert_eq!(slow.calls(), 2);
        assert_eq!(fast.calls(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_answered_by_service_is_relayed() {
        let config = PoolConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 1,
                timeout: Duration::from_secs(60),
                success_threshold: 1,
            },
            ..PoolConfig::default()
        };
        let busy = FakeBackend::answering("busy", Code::Unavailable);
        let other = FakeBackend::new("other", Ok(()));
        let pool = pool(vec![busy.clone(), other.clone()], config);

        let status = pool.create_order(request()).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "busy says no");
        assert_eq!(other.calls(), 0);

        let states = pool.backend_states().await;
        assert_eq!(states[0], ("busy".to_string(), CircuitState::Closed));
    }
}
