use std::sync::Arc;

use tonic::{Request, Response, Status};

use super::pool::BackendPool;
use crate::proto::order_service_server::{OrderService as OrderServiceRpc, OrderServiceServer};
use crate::proto::{CreateOrderRequest, CreateOrderResponse, GetOrderStatusRequest, GetOrderStatusResponse};

/// Same remote interface as the Order Service; every call is forwarded
/// through the pool.
#[derive(Clone)]
pub struct GatewayService {
    pool: Arc<BackendPool>,
}

impl GatewayService {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    pub fn into_server(self) -> OrderServiceServer<Self> {
        OrderServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl OrderServiceRpc for GatewayService {
    async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<CreateOrderResponse>, Status> {
        let request = request.into_inner();
        tracing::info!(
            customer_name = %request.customer_name,
            item_count = request.items.len(),
            "📥 Gateway CreateOrder"
        );

        self.pool.create_order(request).await.map(Response::new)
    }

    async fn get_order_status(
        &self,
        request: Request<GetOrderStatusRequest>,
    ) -> Result<Response<GetOrderStatusResponse>, Status> {
        let request = request.into_inner();
        tracing::debug!(order_id = %request.order_id, "Gateway GetOrderStatus");

        self.pool.get_order_status(request).await.map(Response::new)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::transport::Server;
    use tonic::Code;

    use super::*;
    use crate::gateway::{GrpcBackend, OrderBackend, PoolConfig};
    use crate::messaging::InMemoryQueue;
    use crate::metrics::Metrics;
    use crate::service::{OrderGrpc, OrderService, ServiceConfig};
    use crate::store::InMemoryStatusStore;

    async fn spawn_order_service() -> SocketAddr {
        let service = OrderService::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryQueue::new(Duration::from_secs(30))),
            Arc::new(Metrics::new().unwrap()),
            ServiceConfig::default(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(
            Server::builder()
                .add_service(OrderGrpc::new(service).into_server())
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        addr
    }

    fn gateway(addresses: &[String]) -> GatewayService {
        let backends = addresses
            .iter()
            .map(|a| Arc::new(GrpcBackend::new(a, Duration::from_millis(500)).unwrap()) as Arc<dyn OrderBackend>)
            .collect();
        let pool = BackendPool::new(backends, PoolConfig::default(), Arc::new(Metrics::new().unwrap())).unwrap();
        GatewayService::new(Arc::new(pool))
    }

    fn pizza() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_name: "Ana Silva".into(),
            items: vec!["Pizza".into(), "Soda".into()],
            total: 45.5,
        }
    }

    #[tokio::test]
    async fn test_gateway_survives_unreachable_backend() {
        let healthy = spawn_order_service().await;
        let gateway = gateway(&["http://127.0.0.1:1".to_string(), format!("http://{}", healthy)]);

        // Two calls so that one of them starts at the unreachable backend.
        for _ in 0..2 {
            let created = gateway
                .create_order(Request::new(pizza()))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(created.status, "RECEIVED");

            let status = gateway
                .get_order_status(Request::new(GetOrderStatusRequest {
                    order_id: created.order_id.clone(),
                }))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(status.order_id, created.order_id);
            assert_eq!(status.items, vec!["Pizza", "Soda"]);
            assert_eq!(status.total, 45.5);
        }
    }

    #[tokio::test]
    async fn test_gateway_preserves_error_kind() {
        let healthy = spawn_order_service().await;
        let gateway = gateway(&[format!("http://{}", healthy)]);

        let invalid = gateway
            .create_order(Request::new(CreateOrderRequest {
                items: vec![],
                ..pizza()
            }))
            .await
            .unwrap_err();
        assert_eq!(invalid.code(), Code::InvalidArgument);

        let missing = gateway
            .get_order_status(Request::new(GetOrderStatusRequest {
                order_id: "unknown".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_gateway_with_no_reachable_backend_is_unavailable() {
        let gateway = gateway(&["http://127.0.0.1:1".to_string(), "http://127.0.0.1:2".to_string()]);

        let status = gateway.create_order(Request::new(pizza())).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
