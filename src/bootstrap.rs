use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tonic::server::NamedService;
use tonic::transport::Server;
use tonic_health::server::HealthReporter;

use crate::actors::{
    BackendPoolProbe, HealthCheckable, HealthMonitorActor, HealthMonitorHandle, PublisherProbe, StoreProbe,
};
use crate::config::{Command, GatewayArgs, OrderServiceArgs, StandaloneArgs, WorkerArgs};
use crate::gateway::{start_rest_server, BackendPool, GatewayService, GrpcBackend, OrderBackend, PoolConfig};
use crate::messaging::{InMemoryQueue, QueueConsumer, QueuePublisher, RedpandaConsumer, RedpandaPublisher};
use crate::metrics::{start_metrics_server, Metrics, MetricsServerState};
use crate::proto::order_service_server::OrderServiceServer;
use crate::service::{OrderGrpc, OrderService};
use crate::store::{InMemoryStatusStore, RedisStatusStore, StatusStore};
use crate::worker::{OrderWorker, SimulatedFulfillment};

// ============================================================================
// Process Wiring
// ============================================================================
//
// One entry point per role. Each role builds its collaborators, starts the
// health monitor and metrics server, then serves until Ctrl-C.
//
// ============================================================================

const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::OrderService(args) => run_order_service(args).await,
        Command::Worker(args) => run_worker(args).await,
        Command::Gateway(args) => run_gateway(args).await,
        Command::Standalone(args) => run_standalone(args).await,
    }
}

async fn run_order_service(args: OrderServiceArgs) -> anyhow::Result<()> {
    tracing::info!("🚀 Starting order service");

    let metrics = Arc::new(Metrics::new()?);

    tracing::info!(redis_url = %args.store.redis_url, "Connecting to status store...");
    let store: Arc<dyn StatusStore> =
        Arc::new(RedisStatusStore::connect(&args.store.redis_url, args.store.key_prefix.clone()).await?);

    let publisher: Arc<dyn QueuePublisher> = Arc::new(RedpandaPublisher::new(
        &args.queue.kafka_brokers,
        args.queue.orders_topic.clone(),
        args.queue.timeout(),
        Some(metrics.breaker_hook()),
    )?);

    let config = args.service_config();
    let monitor = spawn_monitor(vec![
        Arc::new(StoreProbe::new(store.clone(), config.store_timeout)) as Arc<dyn HealthCheckable>,
        Arc::new(PublisherProbe::new(publisher.clone())),
    ]);
    spawn_metrics_server("order-service", &metrics, Some(monitor.clone()), args.metrics.metrics_port);

    let service = OrderService::new(store, publisher, metrics, config);
    serve_order_service(args.listen, service, monitor, shutdown_signal()).await
}

async fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    args.processing.validate()?;
    tracing::info!(concurrency = args.processing.concurrency, "🚀 Starting worker");

    let metrics = Arc::new(Metrics::new()?);
    let store: Arc<dyn StatusStore> =
        Arc::new(RedisStatusStore::connect(&args.store.redis_url, args.store.key_prefix.clone()).await?);

    let probe: Arc<dyn HealthCheckable> = Arc::new(StoreProbe::new(store.clone(), args.store.timeout()));
    let monitor = spawn_monitor(vec![probe]);
    spawn_metrics_server("worker", &metrics, Some(monitor), args.metrics.metrics_port);

    let worker = OrderWorker::new(
        store,
        Arc::new(SimulatedFulfillment::new(args.processing.processing_delay())),
        metrics,
        args.processing.worker_config(args.store.timeout()),
    );

    let mut consumers = Vec::with_capacity(args.processing.concurrency);
    for _ in 0..args.processing.concurrency {
        consumers.push(RedpandaConsumer::new(
            &args.queue.kafka_brokers,
            &args.group_id,
            &args.queue.orders_topic,
            args.processing.redelivery_timeout(),
        )?);
    }

    run_workers(worker, consumers, shutdown_signal()).await;
    Ok(())
}

async fn run_gateway(args: GatewayArgs) -> anyhow::Result<()> {
    tracing::info!(backends = args.backends.len(), "🚀 Starting gateway");

    let metrics = Arc::new(Metrics::new()?);
    let pool = Arc::new(build_pool(&args.backends, args.pool_config(), metrics.clone())?);

    let probe: Arc<dyn HealthCheckable> = Arc::new(BackendPoolProbe::new(pool.clone()));
    let monitor = spawn_monitor(vec![probe]);
    spawn_metrics_server("gateway", &metrics, Some(monitor.clone()), args.metrics.metrics_port);

    if let Some(port) = args.http_port {
        spawn_rest_server(pool.clone(), SocketAddr::from(([0, 0, 0, 0], port)));
    }

    serve_gateway(args.listen, pool, monitor, shutdown_signal()).await
}

/// Every role in one process. Store and queue are in memory, so nothing
/// survives a restart.
async fn run_standalone(args: StandaloneArgs) -> anyhow::Result<()> {
    args.processing.validate()?;
    tracing::info!("🚀 Starting standalone pipeline (in-memory store and queue)");

    let metrics = Arc::new(Metrics::new()?);
    let store = Arc::new(InMemoryStatusStore::new());
    let queue = InMemoryQueue::new(args.processing.redelivery_timeout());

    let service_config = args.service_config();
    let order_backend = format!("http://{}", args.order_service_listen);
    let pool = Arc::new(build_pool(&[order_backend], args.pool_config(), metrics.clone())?);

    let monitor = spawn_monitor(vec![
        Arc::new(StoreProbe::new(store.clone(), service_config.store_timeout)) as Arc<dyn HealthCheckable>,
        Arc::new(PublisherProbe::new(Arc::new(queue.clone()))),
        Arc::new(BackendPoolProbe::new(pool.clone())),
    ]);
    spawn_metrics_server("standalone", &metrics, Some(monitor.clone()), args.metrics.metrics_port);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut roles = JoinSet::new();

    let worker = OrderWorker::new(
        store.clone(),
        Arc::new(SimulatedFulfillment::new(args.processing.processing_delay())),
        metrics.clone(),
        args.worker_config(),
    );
    let consumers: Vec<_> = (0..args.processing.concurrency).map(|_| queue.consumer()).collect();
    let worker_shutdown = shutdown_rx.clone();
    roles.spawn(async move {
        run_workers(worker, consumers, wait_for_shutdown(worker_shutdown)).await;
        Ok::<(), anyhow::Error>(())
    });

    let service = OrderService::new(store, Arc::new(queue.clone()), metrics, service_config);
    roles.spawn(serve_order_service(
        args.order_service_listen,
        service,
        monitor.clone(),
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    spawn_rest_server(pool.clone(), SocketAddr::from(([0, 0, 0, 0], args.http_port)));
    roles.spawn(serve_gateway(
        args.gateway_listen,
        pool,
        monitor,
        wait_for_shutdown(shutdown_rx),
    ));

    tokio::select! {
        _ = shutdown_signal() => {}
        Some(finished) = roles.join_next() => {
            // A role exiting on its own is fatal for the whole process.
            if let Ok(Err(e)) = finished {
                tracing::error!(error = %e, "Role stopped unexpectedly");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    queue.close().await;
    while let Some(finished) = roles.join_next().await {
        if let Ok(Err(e)) = finished {
            tracing::error!(error = %e, "Role failed during shutdown");
        }
    }

    tracing::info!("🎉 Standalone pipeline stopped");
    Ok(())
}

async fn serve_order_service(
    listen: SocketAddr,
    service: OrderService,
    monitor: HealthMonitorHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (reporter, health_service) = tonic_health::server::health_reporter();
    tokio::spawn(mirror_health::<OrderServiceServer<OrderGrpc>>(monitor, reporter));

    tracing::info!("📡 Order service listening on {}", listen);
    Server::builder()
        .add_service(health_service)
        .add_service(OrderGrpc::new(service).into_server())
        .serve_with_shutdown(listen, shutdown)
        .await?;

    tracing::info!("Order service stopped");
    Ok(())
}

async fn serve_gateway(
    listen: SocketAddr,
    pool: Arc<BackendPool>,
    monitor: HealthMonitorHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let (reporter, health_service) = tonic_health::server::health_reporter();
    tokio::spawn(mirror_health::<OrderServiceServer<GatewayService>>(monitor, reporter));

    tracing::info!(backends = pool.len(), "📡 Gateway listening on {}", listen);
    Server::builder()
        .add_service(health_service)
        .add_service(GatewayService::new(pool).into_server())
        .serve_with_shutdown(listen, shutdown)
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Run one worker loop per consumer until `shutdown` resolves; in-flight
/// deliveries are finished first.
async fn run_workers<C>(worker: OrderWorker, consumers: Vec<C>, shutdown: impl Future<Output = ()>)
where
    C: QueueConsumer + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut loops = JoinSet::new();
    for consumer in consumers {
        let worker = worker.clone();
        let stop = stop_rx.clone();
        loops.spawn(async move { worker.run(consumer, stop).await });
    }

    shutdown.await;
    tracing::info!("Stopping workers, finishing in-flight orders");
    let _ = stop_tx.send(true);
    while loops.join_next().await.is_some() {}
}

fn build_pool(addresses: &[String], config: PoolConfig, metrics: Arc<Metrics>) -> anyhow::Result<BackendPool> {
    let backends = addresses
        .iter()
        .map(|address| {
            GrpcBackend::new(address, CONNECT_TIMEOUT).map(|backend| Arc::new(backend) as Arc<dyn OrderBackend>)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BackendPool::new(backends, config, metrics)?)
}

fn spawn_monitor(probes: Vec<Arc<dyn HealthCheckable>>) -> HealthMonitorHandle {
    let (handle, _task) = HealthMonitorActor::spawn(probes, HEALTH_INTERVAL);
    handle
}

/// Keep the standard gRPC health service in line with the monitor.
async fn mirror_health<S: NamedService>(monitor: HealthMonitorHandle, reporter: HealthReporter) {
    let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
    loop {
        ticker.tick().await;
        match monitor.system_health().await {
            Some(report) if report.overall_status.is_unhealthy() => reporter.set_not_serving::<S>().await,
            Some(_) => reporter.set_serving::<S>().await,
            None => return,
        }
    }
}

// actix-web runs on its own system; keep it off the main runtime.
fn spawn_metrics_server(service: &'static str, metrics: &Metrics, health: Option<HealthMonitorHandle>, port: u16) {
    let state = MetricsServerState {
        service,
        registry: metrics.registry().clone(),
        health,
    };

    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(start_metrics_server(state, port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}

fn spawn_rest_server(pool: Arc<BackendPool>, addr: SocketAddr) {
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(start_rest_server(pool, addr)) {
            tracing::error!("HTTP facade error: {}", e);
        }
    });
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}
