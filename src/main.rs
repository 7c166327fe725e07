use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use kameo::Actor;
use tokio::task::JoinHandle;

use order_pipeline::api::{configure, AppState};
use order_pipeline::config::{BrokerKind, Config, StorageBackend};
use order_pipeline::lifecycle::{
    run_heartbeat, shutdown_token, BrokerProbe, HealthMonitorActor, HealthProbe, LocalRegistry,
    PublicationBacklogProbe, Registration, StockProbe,
};
use order_pipeline::messaging::{
    run_memory_consumer, EventPublisher, InMemoryBroker, MessageHandler, RedpandaConsumer,
    RedpandaPublisher,
};
use order_pipeline::metrics::Metrics;
use order_pipeline::payments::{
    InMemoryProcessor, LocalOrdersGateway, OrderCreatedHandler, PaymentsService,
};
use order_pipeline::repository::{InMemoryOrderRepository, OrderRepository, ScyllaOrderRepository};
use order_pipeline::service::{OrderService, ServiceSettings};
use order_pipeline::stock::{InMemoryStock, ResilientStockClient, StockGateway};
use order_pipeline::telemetry::init_telemetry;
use order_pipeline::utils::{CircuitBreakerConfig, RetryConfig};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Logging first so every later step is visible; RUST_LOG overrides
    let (telemetry, _telemetry_guard) = init_telemetry(&config.telemetry)?;

    tracing::info!(
        service = %config.telemetry.service_name,
        broker = ?config.broker.kind,
        storage = ?config.storage.backend,
        policy = %config.pipeline.publish_failure_policy,
        "Starting order pipeline"
    );

    let shutdown = shutdown_token();

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Order repository ===
    let repository: Arc<dyn OrderRepository> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryOrderRepository::new()),
        StorageBackend::Scylla => {
            tracing::info!(nodes = ?config.storage.nodes, "Connecting to ScyllaDB...");
            Arc::new(ScyllaOrderRepository::connect(&config.storage).await?)
        }
    };

    // === 3. Broker ===
    let (publisher, memory_broker): (Arc<dyn EventPublisher>, Option<Arc<InMemoryBroker>>) =
        match config.broker.kind {
            BrokerKind::Memory => {
                let broker = Arc::new(InMemoryBroker::new());
                (broker.clone(), Some(broker))
            }
            BrokerKind::Redpanda => (Arc::new(RedpandaPublisher::new(&config.broker)?), None),
        };

    // A queue that cannot be declared at startup is fatal
    publisher
        .declare(&config.pipeline.queue)
        .await
        .with_context(|| format!("declaring queue '{}'", config.pipeline.queue))?;

    // === 4. Stock validator, behind retry and circuit breaker ===
    let stock: Arc<dyn StockGateway> = Arc::new(
        ResilientStockClient::new(
            Arc::new(InMemoryStock::demo()),
            RetryConfig::for_stock_checks(),
            config.pipeline.stock_timeout,
        )
        .with_circuit_breaker(CircuitBreakerConfig::default()),
    );

    // === 5. Order service ===
    let orders = Arc::new(OrderService::new(
        stock.clone(),
        repository,
        publisher.clone(),
        telemetry.clone(),
        metrics.clone(),
        ServiceSettings::from_config(&config.pipeline),
    ));

    let mut background: Vec<JoinHandle<()>> = Vec::new();

    // === 6. Payments consumer ===
    if config.payments.enabled {
        let payments = Arc::new(PaymentsService::new(
            Arc::new(InMemoryProcessor::new(config.payments.link_base_url.clone())),
            Arc::new(LocalOrdersGateway::new(orders.clone())),
        ));
        let handler: Arc<dyn MessageHandler> =
            Arc::new(OrderCreatedHandler::new(payments, telemetry.clone(), metrics.clone()));
        let queue = config.pipeline.queue.clone();
        let token = shutdown.child_token();

        match &memory_broker {
            Some(broker) => {
                let feed = broker.subscribe();
                background.push(tokio::spawn(run_memory_consumer(feed, queue, handler, token)));
            }
            None => {
                let consumer = RedpandaConsumer::new(&config.broker, &config.payments.group_id, &queue)?;
                background.push(tokio::spawn(consumer.run(handler, token)));
            }
        }
        tracing::info!(group_id = %config.payments.group_id, "Payments consumer started");
    }

    // === 7. Service registry heartbeat ===
    if config.registry.enabled {
        let registry = Arc::new(LocalRegistry::new(config.registry.heartbeat_interval * 3));
        let registration = Registration {
            instance_id: config.registry.instance_id.clone(),
            service_name: config.telemetry.service_name.clone(),
            address: config.registry.advertised_address.clone(),
        };
        let interval = config.registry.heartbeat_interval;
        let token = shutdown.child_token();

        background.push(tokio::spawn(async move {
            if let Err(e) = run_heartbeat(registry, registration, interval, token).await {
                tracing::error!(error = %e, "Service registration failed");
            }
        }));
    }

    // === 8. Health monitor ===
    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(BrokerProbe::new(publisher, metrics.clone())),
        Arc::new(StockProbe::new(stock, metrics.clone())),
        Arc::new(PublicationBacklogProbe::new(orders.clone())),
    ];
    let monitor = HealthMonitorActor::spawn(HealthMonitorActor::new(
        probes,
        Duration::from_secs(10),
        shutdown.child_token(),
    ));

    // === 9. HTTP server ===
    let state = web::Data::new(
        AppState::new(orders, config.pipeline.request_timeout).with_health(monitor),
    );
    let metrics_data = web::Data::new(metrics);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(metrics_data.clone())
            .configure(configure)
    })
    .bind((config.http.host.as_str(), config.http.port))?
    .disable_signals()
    .run();

    tracing::info!(host = %config.http.host, port = config.http.port, "HTTP server listening");

    let handle = server.handle();
    let stop_on = shutdown.clone();
    tokio::spawn(async move {
        stop_on.cancelled().await;
        handle.stop(true).await;
    });

    server.await?;

    // Server is down; stop the rest
    shutdown.cancel();
    for task in background {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Order pipeline stopped");
    Ok(())
}
