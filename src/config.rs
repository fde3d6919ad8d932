use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::gateway::PoolConfig;
use crate::service::ServiceConfig;
use crate::utils::RetryConfig;
use crate::worker::WorkerConfig;

// ============================================================================
// Command Line / Environment Configuration
// ============================================================================
//
// Durations are taken in milliseconds and converted once, here.
//
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "order_pipeline", version, about = "Order submission and status pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve CreateOrder / GetOrderStatus over gRPC
    OrderService(OrderServiceArgs),
    /// Consume the orders topic and process orders
    Worker(WorkerArgs),
    /// Forward the order interface to a pool of order services
    Gateway(GatewayArgs),
    /// Every role in one process over in-memory store and queue
    Standalone(StandaloneArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[arg(long, env = "ORDER_KEY_PREFIX", default_value = "order:")]
    pub key_prefix: String,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,
}

impl StoreArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueueArgs {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "127.0.0.1:9092")]
    pub kafka_brokers: String,

    #[arg(long, env = "ORDERS_TOPIC", default_value = "orders")]
    pub orders_topic: String,

    #[arg(long, env = "QUEUE_TIMEOUT_MS", default_value_t = 5000)]
    pub queue_timeout_ms: u64,
}

impl QueueArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct MetricsArgs {
    #[arg(long, env = "METRICS_PORT", default_value_t = 9100)]
    pub metrics_port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct OrderServiceArgs {
    #[arg(long, env = "ORDER_SERVICE_LISTEN", default_value = "0.0.0.0:50051")]
    pub listen: SocketAddr,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    /// Publish attempts before the order is marked FAILED
    #[arg(long, env = "PUBLISH_ATTEMPTS", default_value_t = 3)]
    pub publish_attempts: u32,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl OrderServiceArgs {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            store_timeout: self.store.timeout(),
            publish_timeout: self.queue.timeout(),
            publish_retry: RetryConfig::with_attempts(self.publish_attempts),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProcessingArgs {
    /// Un-acked messages are redelivered after this long; must exceed processing time
    #[arg(long, env = "REDELIVERY_TIMEOUT_MS", default_value_t = 60_000)]
    pub redelivery_timeout_ms: u64,

    /// Simulated fulfillment time per order
    #[arg(long, env = "PROCESSING_DELAY_MS", default_value_t = 30_000)]
    pub processing_delay_ms: u64,

    /// Competing consumers in this process
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,
}

impl ProcessingArgs {
    pub fn redelivery_timeout(&self) -> Duration {
        Duration::from_millis(self.redelivery_timeout_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.redelivery_timeout_ms <= self.processing_delay_ms {
            anyhow::bail!(
                "redelivery timeout ({} ms) must exceed the processing delay ({} ms)",
                self.redelivery_timeout_ms,
                self.processing_delay_ms
            );
        }
        if self.concurrency == 0 {
            anyhow::bail!("worker concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn worker_config(&self, store_timeout: Duration) -> WorkerConfig {
        WorkerConfig {
            store_timeout,
            ..WorkerConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[arg(long, env = "WORKER_GROUP_ID", default_value = "order-workers")]
    pub group_id: String,

    #[command(flatten)]
    pub processing: ProcessingArgs,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    #[arg(long, env = "GATEWAY_LISTEN", default_value = "0.0.0.0:9090")]
    pub listen: SocketAddr,

    /// Order service addresses, comma separated
    #[arg(
        long = "backend",
        env = "ORDER_BACKENDS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:50051"
    )]
    pub backends: Vec<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Also serve the HTTP/JSON API on this port
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl GatewayArgs {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..PoolConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StandaloneArgs {
    #[arg(long, default_value = "127.0.0.1:50051")]
    pub order_service_listen: SocketAddr,

    #[arg(long, default_value = "0.0.0.0:9090")]
    pub gateway_listen: SocketAddr,

    #[arg(long, env = "HTTP_PORT", default_value_t = 8000)]
    pub http_port: u16,

    #[arg(long, env = "STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,

    #[arg(long, env = "QUEUE_TIMEOUT_MS", default_value_t = 5000)]
    pub queue_timeout_ms: u64,

    /// Publish attempts before the order is marked FAILED
    #[arg(long, env = "PUBLISH_ATTEMPTS", default_value_t = 3)]
    pub publish_attempts: u32,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    #[command(flatten)]
    pub processing: ProcessingArgs,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl StandaloneArgs {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            store_timeout: self.store_timeout(),
            publish_timeout: Duration::from_millis(self.queue_timeout_ms),
            publish_retry: RetryConfig::with_attempts(self.publish_attempts),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        self.processing.worker_config(self.store_timeout())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..PoolConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["order_pipeline", "worker"]).unwrap();
        let Command::Worker(args) = cli.command else {
            panic!("expected worker");
        };

        assert_eq!(args.group_id, "order-workers");
        assert_eq!(args.queue.orders_topic, "orders");
        assert_eq!(args.store.key_prefix, "order:");
        assert_eq!(args.processing.redelivery_timeout(), Duration::from_secs(60));
        assert_eq!(args.processing.processing_delay(), Duration::from_secs(30));
        assert!(args.processing.validate().is_ok());
    }

    #[test]
    fn test_backend_list_is_comma_separated() {
        let cli = Cli::try_parse_from([
            "order_pipeline",
            "gateway",
            "--backend",
            "http://a:50051,http://b:50051",
        ])
        .unwrap();
        let Command::Gateway(args) = cli.command else {
            panic!("expected gateway");
        };

        assert_eq!(args.backends, vec!["http://a:50051", "http://b:50051"]);
        assert_eq!(args.pool_config().request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_redelivery_must_outlast_processing() {
        let cli = Cli::try_parse_from([
            "order_pipeline",
            "worker",
            "--redelivery-timeout-ms",
            "1000",
            "--processing-delay-ms",
            "5000",
        ])
        .unwrap();
        let Command::Worker(args) = cli.command else {
            panic!("expected worker");
        };

        assert!(args.processing.validate().is_err());
    }

    #[test]
    fn test_publish_attempts_feed_retry_config() {
        let cli =
            Cli::try_parse_from(["order_pipeline", "order-service", "--publish-attempts", "5"]).unwrap();
        let Command::OrderService(args) = cli.command else {
            panic!("expected order-service");
        };

        let config = args.service_config();
        assert_eq!(config.publish_retry.max_attempts, 5);
        assert_eq!(config.store_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_standalone_honours_timeouts_and_attempts() {
        let cli = Cli::try_parse_from([
            "order_pipeline",
            "standalone",
            "--store-timeout-ms",
            "750",
            "--queue-timeout-ms",
            "1500",
            "--publish-attempts",
            "6",
            "--request-timeout-ms",
            "900",
        ])
        .unwrap();
        let Command::Standalone(args) = cli.command else {
            panic!("expected standalone");
        };

        let service = args.service_config();
        assert_eq!(service.store_timeout, Duration::from_millis(750));
        assert_eq!(service.publish_timeout, Duration::from_millis(1500));
        assert_eq!(service.publish_retry.max_attempts, 6);
        assert_eq!(args.worker_config().store_timeout, Duration::from_millis(750));
        assert_eq!(args.pool_config().request_timeout, Duration::from_millis(900));
    }
}
