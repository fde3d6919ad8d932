use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use serde::{Deserialize, Serialize};

use super::pool::BackendPool;
use crate::error::ServiceError;
use crate::proto::{CreateOrderRequest, GetOrderStatusRequest, GetOrderStatusResponse};

// ============================================================================
// HTTP/JSON facade
// ============================================================================
//
// POST /api/orders        -> 201 {"order_id", "status"}
// GET  /api/orders/{id}   -> 200 {"order": {...}}
// GET  /health            -> 200 {"status": "ok"}
//
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateOrderBody {
    customer_name: String,
    items: Vec<String>,
    total: f64,
}

#[derive(Debug, Serialize)]
struct CreatedBody {
    order_id: String,
    status: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderView {
    id: String,
    customer_name: String,
    items: Vec<String>,
    total: f64,
    status: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderBody {
    order: OrderView,
}

impl From<GetOrderStatusResponse> for OrderBody {
    fn from(response: GetOrderStatusResponse) -> Self {
        Self {
            order: OrderView {
                id: response.order_id,
                customer_name: response.customer_name,
                items: response.items,
                total: response.total,
                status: response.status,
            },
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ServiceError::InvalidArgument(err.to_string()).into()
    }))
    .route("/api/orders", web::post().to(create_order))
    .route("/api/orders/{order_id}", web::get().to(get_order))
    .route("/health", web::get().to(health));
}

/// Resolves when the server stops.
pub async fn start_rest_server(pool: Arc<BackendPool>, addr: SocketAddr) -> std::io::Result<()> {
    tracing::info!("🌐 Starting HTTP facade on http://{}/api/orders", addr);

    let pool = web::Data::from(pool);
    HttpServer::new(move || App::new().app_data(pool.clone()).configure(configure_routes))
        .bind(addr)?
        .run()
        .await
}

async fn create_order(
    pool: web::Data<BackendPool>,
    body: web::Json<CreateOrderBody>,
) -> Result<HttpResponse, ServiceError> {
    let body = body.into_inner();
    let created = pool
        .create_order(CreateOrderRequest {
            customer_name: body.customer_name,
            items: body.items,
            total: body.total,
        })
        .await?;

    Ok(HttpResponse::Created().json(CreatedBody {
        order_id: created.order_id,
        status: created.status,
    }))
}

async fn get_order(
    pool: web::Data<BackendPool>,
    order_id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let response = pool
        .get_order_status(GetOrderStatusRequest {
            order_id: order_id.into_inner(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(OrderBody::from(response)))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
