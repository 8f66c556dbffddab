//! OnePay - Mobile Money Wallet Backend
//!
//! Wires the transaction pipeline (store, validator, manager, gateways,
//! message worker, scheduled jobs) and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onepay::api::{self, AppState};
use onepay::bus::{
    AuditMiddleware, Dispatcher, HandlerRegistry, MessageBus, Middleware,
    ProcessTransactionHandler, SyncBalanceHandler, TransactionMiddleware, Worker,
};
use onepay::cache::MemoryCache;
use onepay::gateway::{GatewayRegistry, MtnMomoGateway, OrangeMoneyGateway};
use onepay::jobs::{JobScheduler, JobSchedulerConfig};
use onepay::limits::LimitTracker;
use onepay::notification::ChannelNotifier;
use onepay::store::PgStore;
use onepay::{Config, TransactionManager, TransactionValidator};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "onepay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        production = config.is_production(),
        "Starting OnePay backend"
    );
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    onepay::db::verify_connection(&pool).await?;
    if !onepay::db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Capabilities
    let store = Arc::new(PgStore::new(pool.clone()));
    let cache = Arc::new(MemoryCache::new());
    let limits = LimitTracker::new(store.clone(), cache.clone());
    let validator = TransactionValidator::new(store.clone(), limits.clone());
    let manager = Arc::new(TransactionManager::new(
        store.clone(),
        limits,
        validator.clone(),
    ));

    let gateways = Arc::new(
        GatewayRegistry::new()
            .register(Arc::new(OrangeMoneyGateway::new(config.orange_gateway())?))
            .register(Arc::new(MtnMomoGateway::new(config.mtn_gateway())?)),
    );

    // Notifications: the pipeline enqueues, this task delivers
    let (notifier, mut notifications) = ChannelNotifier::new();
    let notifier = Arc::new(notifier);
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            tracing::info!(
                user_id = %notification.user_id,
                kind = %notification.kind,
                "delivering notification: {}",
                notification.message
            );
        }
    });

    // Message bus: audit outermost, then the store transaction bracket
    let (bus, receiver) = MessageBus::channel();
    let middlewares: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(AuditMiddleware::new(store.clone())),
        Arc::new(TransactionMiddleware::new(store.clone())),
    ];
    let registry = HandlerRegistry::new(
        ProcessTransactionHandler::new(
            store.clone(),
            manager.clone(),
            gateways.clone(),
            notifier.clone(),
        ),
        SyncBalanceHandler::new(store.clone(), gateways.clone(), cache.clone()),
    );
    let worker = Worker::new(
        receiver,
        Dispatcher::new(middlewares, Arc::new(registry)),
        store.clone(),
        manager,
        notifier,
        config.message_max_attempts,
        config.message_retry_delay,
    );
    let worker_handle = tokio::spawn(worker.run());

    // Scheduled maintenance
    let scheduler = JobScheduler::with_config(
        store.clone(),
        store.clone(),
        bus.clone(),
        JobSchedulerConfig {
            audit_retention: chrono::Duration::days(config.audit_retention_days),
            ..JobSchedulerConfig::default()
        },
    );
    let scheduler_handle = scheduler.start();

    let state = AppState {
        store: store.clone(),
        audit: store,
        cache,
        validator,
        gateways,
        bus,
    };

    let app = Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api::routes::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down...");
    scheduler_handle.abort();
    worker_handle.abort();
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
