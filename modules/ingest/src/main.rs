use axum::routing::{get, post};
use axum::Router;
use event_bus::{
    BackoffConfig, ConnectionState, EventBus, InMemoryBus, NatsBus, NatsConfig, RetryConfig,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use ingest_rs::{
    config::Config,
    jetstream::ensure_streams,
    metrics::Metrics,
    routes::dlq::{get_dlq_events, replay_dlq_events},
    routes::events::{get_events, publish_event},
    routes::health::{liveness, readiness, roundtrip},
    routes::metrics::get_metrics,
    start_event_processor,
    store::{DeadLetterStore, MemoryStore, MirrorStore, PgStore},
    AppState, ProcessorConfig, Publisher,
};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting ingest service...");

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        "Configuration loaded: host={}, port={}, bus_type={}, store_type={}",
        config.host,
        config.port,
        config.bus_type,
        config.store_type
    );

    // Storage: Postgres in production, in-memory for dev
    let (mirror, dlq): (Arc<dyn MirrorStore>, Arc<dyn DeadLetterStore>) =
        match config.store_type.to_lowercase().as_str() {
            "memory" => {
                tracing::info!("Using in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
            "postgres" => {
                tracing::info!("Connecting to database...");
                let database_url = config
                    .database_url
                    .as_deref()
                    .expect("DATABASE_URL checked by Config::from_env");
                let pool = PgPoolOptions::new()
                    .max_connections(config.db_pool_size)
                    .connect(database_url)
                    .await
                    .expect("Failed to connect to database");

                tracing::info!("Running migrations...");
                sqlx::migrate!("./db/migrations")
                    .run(&pool)
                    .await
                    .expect("Failed to run migrations");

                let store = Arc::new(PgStore::new(pool));
                (store.clone(), store)
            }
            other => panic!("Invalid STORE_TYPE: {other}. Must be 'postgres' or 'memory'"),
        };

    // Create event bus
    let bus: Arc<dyn EventBus> = match config.bus_type.to_lowercase().as_str() {
        "inmemory" => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        "nats" => {
            tracing::info!("Connecting to NATS at {}", config.nats_url);
            let nats = NatsBus::connect(NatsConfig {
                url: config.nats_url.clone(),
                connect_backoff: BackoffConfig::default(),
                ack_timeout: config.ack_timeout,
            })
            .await
            .expect("Failed to connect to NATS");

            ensure_streams(nats.client().clone())
                .await
                .expect("Failed to provision JetStream streams");

            Arc::new(nats)
        }
        other => panic!("Invalid BUS_TYPE: {other}. Must be 'inmemory' or 'nats'"),
    };

    let metrics = Arc::new(Metrics::new());

    // Keep the connection gauge in step with the transport state
    {
        let bus = bus.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            loop {
                let up = i64::from(bus.state() == ConnectionState::Connected);
                metrics.bus_up.set(up);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });
    }

    let publisher = Arc::new(Publisher::new(
        bus.clone(),
        dlq.clone(),
        metrics.clone(),
        RetryConfig {
            max_attempts: config.publish_max_attempts,
            ..RetryConfig::default()
        },
    ));

    // Start the event processor
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = start_event_processor(
        bus.clone(),
        mirror.clone(),
        dlq.clone(),
        metrics.clone(),
        ProcessorConfig {
            workers: config.processor_workers,
            ..ProcessorConfig::default()
        },
        shutdown_rx,
    )
    .await
    .expect("Failed to start event processor");

    let state = AppState {
        bus: bus.clone(),
        publisher,
        mirror,
        dlq,
        metrics,
        replay_confirm_timeout: Duration::from_secs(5),
    };

    // Build the application router
    let app = Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/api/v1/health/roundtrip", get(roundtrip))
        .route("/api/v1/events", post(publish_event))
        .route("/api/v1/events", get(get_events))
        .route("/api/v1/dlq", get(get_dlq_events))
        .route("/api/v1/dlq/replay", post(replay_dlq_events))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    // Bind to the configured address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST/PORT");
    tracing::info!("Ingest service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    // Serve until SIGINT, then drain the processor before exiting
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for shutdown signal");
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server failed to start");

    let _ = shutdown_tx.send(true);
    let abort = processor.abort_handle();
    match tokio::time::timeout(config.drain_timeout, processor).await {
        Ok(_) => tracing::info!("Event processor drained"),
        Err(_) => {
            tracing::warn!(
                "Event processor did not drain within {:?}, aborting",
                config.drain_timeout
            );
            abort.abort();
        }
    }

    if let Err(e) = bus.shutdown().await {
        tracing::warn!(error = %e, "Event bus shutdown failed");
    }

    tracing::info!("Ingest service stopped");
}
