use rust_decimal::prelude::ToPrimitive;
use tonic::{Request, Response, Status};

use super::OrderService;
use crate::domain::order::{CreateOrder, Order};
use crate::proto::order_service_server::{OrderService as OrderServiceRpc, OrderServiceServer};
use crate::proto::{CreateOrderRequest, CreateOrderResponse, GetOrderStatusRequest, GetOrderStatusResponse};

/// tonic binding of [`OrderService`].
#[derive(Clone)]
pub struct OrderGrpc {
    service: OrderService,
}

impl OrderGrpc {
    pub fn new(service: OrderService) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> OrderServiceServer<Self> {
        OrderServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl OrderServiceRpc for OrderGrpc {
    async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<CreateOrderResponse>, Status> {
        let request = request.into_inner();
        let command = CreateOrder {
            customer_name: request.customer_name,
            items: request.items,
            total: request.total,
        };

        let order = self.service.create_order(command).await?;

        Ok(Response::new(CreateOrderResponse {
            order_id: order.id.to_string(),
            status: order.status.to_string(),
        }))
    }

    async fn get_order_status(
        &self,
        request: Request<GetOrderStatusRequest>,
    ) -> Result<Response<GetOrderStatusResponse>, Status> {
        let order_id = request.into_inner().order_id;
        let order = self.service.get_order_status(&order_id).await?;
        Ok(Response::new(order_to_response(&order)))
    }
}

fn order_to_response(order: &Order) -> GetOrderStatusResponse {
    GetOrderStatusResponse {
        order_id: order.id.to_string(),
        customer_name: order.customer_name.clone(),
        items: order.items.clone(),
        total: order.total.to_f64().unwrap_or_default(),
        status: order.status.to_string(),
        created_at: order.created_at.to_rfc3339(),
        updated_at: order.updated_at.to_rfc3339(),
        failure_reason: order.failure_reason.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::messaging::InMemoryQueue;
    use crate::metrics::Metrics;
    use crate::service::ServiceConfig;
    use crate::store::InMemoryStatusStore;
    use tonic::Code;

    fn grpc() -> OrderGrpc {
        OrderGrpc::new(OrderService::new(
            Arc::new(InMemoryStatusStore::new()),
            Arc::new(InMemoryQueue::new(Duration::from_secs(30))),
            Arc::new(Metrics::new().unwrap()),
            ServiceConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_create_then_query_over_rpc_types() {
        let grpc = grpc();
        let created = grpc
            .create_order(Request::new(CreateOrderRequest {
                customer_name: "Ana Silva".into(),
                items: vec!["Pizza".into(), "Soda".into()],
                total: 45.5,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(created.status, "RECEIVED");

        let status = grpc
            .get_order_status(Request::new(GetOrderStatusRequest {
                order_id: created.order_id.clone(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(status.order_id, created.order_id);
        assert_eq!(status.customer_name, "Ana Silva");
        assert_eq!(status.items, vec!["Pizza", "Soda"]);
        assert_eq!(status.total, 45.5);
        assert_eq!(status.status, "RECEIVED");
        assert!(status.failure_reason.is_empty());
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let grpc = grpc();

        let invalid = grpc
            .create_order(Request::new(CreateOrderRequest {
                customer_name: "Ana".into(),
                items: vec![],
                total: 1.0,
            }))
            .await
            .unwrap_err();
        assert_eq!(invalid.code(), Code::InvalidArgument);

        let missing = grpc
            .get_order_status(Request::new(GetOrderStatusRequest {
                order_id: "nope".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(missing.code(), Code::NotFound);
    }
}
