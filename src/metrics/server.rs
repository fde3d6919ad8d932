use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::actors::HealthMonitorHandle;

/// Shared by the /metrics and /health handlers.
#[derive(Clone)]
pub struct MetricsServerState {
    pub service: &'static str,
    pub registry: Registry,
    pub health: Option<HealthMonitorHandle>,
}

/// Start the metrics HTTP server.
/// Run it on its own thread and runtime so it never competes with request handling.
pub async fn start_metrics_server(state: MetricsServerState, port: u16) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    let state = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .workers(1)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<MetricsServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<MetricsServerState>) -> impl Responder {
    let Some(monitor) = &state.health else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": state.service
        }));
    };

    match monitor.system_health().await {
        Some(report) if report.overall_status.is_unhealthy() => {
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "service": state.service,
                "health": report
            }))
        }
        Some(report) => HttpResponse::Ok().json(serde_json::json!({
            "service": state.service,
            "health": report
        })),
        None => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unknown",
            "service": state.service
        })),
    }
}
