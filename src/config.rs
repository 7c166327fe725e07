use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::service::PublishFailurePolicy;

// ============================================================================
// Configuration
// ============================================================================
//
// Loaded from environment variables (a `.env` file is honoured) with
// defaults that run the whole pipeline in memory. Invalid values are a
// startup error, never silently replaced by the default.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub broker: BrokerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub payments: PaymentsConfig,
    pub telemetry: TelemetryConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Memory,
    Redpanda,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub client_id: String,
    pub partitions: i32,
    pub replication_factor: i32,
    /// Upper bound for one produce round-trip
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Scylla,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub nodes: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Queue the order-created event goes to
    pub queue: String,
    /// Per-attempt bound on the stock check
    pub stock_timeout: Duration,
    /// Bound on one publish call
    pub publish_timeout: Duration,
    /// Deadline applied to every inbound request
    pub request_timeout: Duration,
    pub publish_failure_policy: PublishFailurePolicy,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Run the in-process payments consumer
    pub enabled: bool,
    pub group_id: String,
    pub link_base_url: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_filter: String,
    /// OTLP gRPC endpoint; spans are only exported when set
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub instance_id: String,
    pub advertised_address: String,
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let http = HttpConfig {
            host: env.string("ORDERS_HTTP_HOST", "0.0.0.0"),
            port: env.parse("ORDERS_HTTP_PORT", 8080)?,
        };

        let broker = BrokerConfig {
            kind: match env.string("ORDERS_BROKER", "memory").to_lowercase().as_str() {
                "memory" => BrokerKind::Memory,
                "redpanda" | "kafka" => BrokerKind::Redpanda,
                other => return Err(invalid("ORDERS_BROKER", other, "expected memory or redpanda")),
            },
            brokers: env.string("ORDERS_BROKERS", "127.0.0.1:9092"),
            client_id: env.string("ORDERS_BROKER_CLIENT_ID", "orders"),
            partitions: env.parse("ORDERS_TOPIC_PARTITIONS", 3)?,
            replication_factor: env.parse("ORDERS_TOPIC_REPLICATION", 1)?,
            send_timeout: env.millis("ORDERS_BROKER_SEND_TIMEOUT_MS", 5_000)?,
        };

        let storage = StorageConfig {
            backend: match env.string("ORDERS_STORAGE", "memory").to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "scylla" => StorageBackend::Scylla,
                other => return Err(invalid("ORDERS_STORAGE", other, "expected memory or scylla")),
            },
            nodes: env
                .string("ORDERS_SCYLLA_NODES", "127.0.0.1:9042")
                .split(',')
                .map(str::trim)
                .filter(|node| !node.is_empty())
                .map(String::from)
                .collect(),
            keyspace: env.string("ORDERS_SCYLLA_KEYSPACE", "orders_ks"),
            replication_factor: env.parse("ORDERS_SCYLLA_REPLICATION", 1)?,
        };

        let pipeline = PipelineConfig {
            queue: env.string("ORDERS_QUEUE", crate::domain::order::ORDER_CREATED_QUEUE),
            stock_timeout: env.millis("ORDERS_STOCK_TIMEOUT_MS", 2_000)?,
            publish_timeout: env.millis("ORDERS_PUBLISH_TIMEOUT_MS", 5_000)?,
            request_timeout: env.millis("ORDERS_REQUEST_TIMEOUT_MS", 15_000)?,
            publish_failure_policy: env.parse("ORDERS_PUBLISH_FAILURE_POLICY", PublishFailurePolicy::default())?,
        };

        let payments = PaymentsConfig {
            enabled: env.parse("PAYMENTS_ENABLED", true)?,
            group_id: env.string("PAYMENTS_GROUP_ID", "payments"),
            link_base_url: env.string("PAYMENTS_LINK_BASE_URL", "https://pay.local/checkout"),
        };

        let telemetry = TelemetryConfig {
            service_name: env.string("OTEL_SERVICE_NAME", "orders"),
            log_filter: env.string("RUST_LOG", "info,order_pipeline=debug"),
            otlp_endpoint: (env.lookup)("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.is_empty()),
        };

        let registry = RegistryConfig {
            enabled: env.parse("REGISTRY_ENABLED", true)?,
            instance_id: env.string("REGISTRY_INSTANCE_ID", &format!("orders-{}", uuid::Uuid::new_v4())),
            advertised_address: env.string("REGISTRY_ADDRESS", &format!("{}:{}", http.host, http.port)),
            heartbeat_interval: env.millis("REGISTRY_HEARTBEAT_MS", 1_000)?,
        };

        Ok(Self {
            http,
            broker,
            storage,
            pipeline,
            payments,
            telemetry,
            registry,
        })
    }

    /// Create test configuration: everything in memory, short timeouts.
    pub fn test() -> Self {
        Self {
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            broker: BrokerConfig {
                kind: BrokerKind::Memory,
                brokers: "127.0.0.1:9092".to_string(),
                client_id: "orders-test".to_string(),
                partitions: 1,
                replication_factor: 1,
                send_timeout: Duration::from_millis(500),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                nodes: vec!["127.0.0.1:9042".to_string()],
                keyspace: "orders_test".to_string(),
                replication_factor: 1,
            },
            pipeline: PipelineConfig {
                queue: crate::domain::order::ORDER_CREATED_QUEUE.to_string(),
                stock_timeout: Duration::from_millis(200),
                publish_timeout: Duration::from_millis(200),
                request_timeout: Duration::from_secs(2),
                publish_failure_policy: PublishFailurePolicy::RetryPublication,
            },
            payments: PaymentsConfig {
                enabled: false,
                group_id: "payments-test".to_string(),
                link_base_url: "https://pay.test/checkout".to_string(),
            },
            telemetry: TelemetryConfig {
                service_name: "orders-test".to_string(),
                log_filter: "warn".to_string(),
                otlp_endpoint: None,
            },
            registry: RegistryConfig {
                enabled: false,
                instance_id: "orders-test".to_string(),
                advertised_address: "127.0.0.1:0".to_string(),
                heartbeat_interval: Duration::from_millis(50),
            },
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &value, &e.to_string())),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration, ConfigError> {
        let millis: u64 = self.parse(key, default)?;
        if millis == 0 {
            return Err(invalid(key, "0", "must be greater than zero"));
        }
        Ok(Duration::from_millis(millis))
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
