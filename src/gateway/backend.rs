use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::proto::order_service_client::OrderServiceClient;
use crate::proto::{CreateOrderRequest, CreateOrderResponse, GetOrderStatusRequest, GetOrderStatusResponse};

/// One Order Service instance.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Stable label for logs and metrics.
    fn address(&self) -> &str;

    async fn create_order(&self, request: CreateOrderRequest) -> Result<CreateOrderResponse, Status>;

    async fn get_order_status(
        &self,
        request: GetOrderStatusRequest,
    ) -> Result<GetOrderStatusResponse, Status>;
}

/// gRPC client over a lazily connected channel; an unreachable address
/// surfaces as `UNAVAILABLE` on the first call, not at construction.
#[derive(Clone)]
pub struct GrpcBackend {
    address: String,
    client: OrderServiceClient<Channel>,
}

impl GrpcBackend {
    pub fn new(address: &str, connect_timeout: Duration) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(address.to_string())?
            .connect_timeout(connect_timeout)
            .connect_lazy();

        tracing::info!(backend = %address, "🔗 Configured order service backend");

        Ok(Self {
            address: address.to_string(),
            client: OrderServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl OrderBackend for GrpcBackend {
    fn address(&self) -> &str {
        &self.address
    }

    async fn create_order(&self, request: CreateOrderRequest) -> Result<CreateOrderResponse, Status> {
        let mut client = self.client.clone();
        client.create_order(request).await.map(|r| r.into_inner())
    }

    async fn get_order_status(
        &self,
        request: GetOrderStatusRequest,
    ) -> Result<GetOrderStatusResponse, Status> {
        let mut client = self.client.clone();
        client.get_order_status(request).await.map(|r| r.into_inner())
    }
}
