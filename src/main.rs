//! Application entry point.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use partner_credit_engine::api::create_router;
use partner_credit_engine::app::{
    AppState, DispatcherConfig, NotificationDispatcher, SweeperConfig, spawn_sweeper,
};
use partner_credit_engine::infra::{
    CacheConfig, InMemoryBalanceCache, PostgresClient, PostgresConfig, WebhookConfig,
    WebhookPublisher,
};

/// Application configuration
struct Config {
    database_url: String,
    host: String,
    port: u16,
    cache_config: CacheConfig,
    sweeper_config: SweeperConfig,
    /// Webhook endpoint for processed-transaction events (optional - the
    /// dispatcher is disabled if not set)
    notification_webhook_url: Option<String>,
    dispatcher_config: DispatcherConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let cache_capacity = env::var("CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1000);
        let cache_ttl_secs = env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);

        let sweeper_enabled = env::var("ENABLE_SWEEPER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);
        let sweep_stale_after_secs = env::var("SWEEP_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(sweep_interval_secs);
        let sweep_page_size = env::var("SWEEP_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(100);

        let notification_webhook_url = env::var("NOTIFICATION_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.is_empty());
        let notification_topic = env::var("NOTIFICATION_TOPIC")
            .unwrap_or_else(|_| "partner-credit.transactions".to_string());
        let notification_queue_capacity = env::var("NOTIFICATION_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(256);

        Ok(Self {
            database_url,
            host,
            port,
            cache_config: CacheConfig {
                capacity: cache_capacity,
                ttl: Duration::from_secs(cache_ttl_secs),
            },
            sweeper_config: SweeperConfig {
                enabled: sweeper_enabled,
                interval: Duration::from_secs(sweep_interval_secs),
                stale_after: Duration::from_secs(sweep_stale_after_secs),
                page_size: sweep_page_size,
            },
            notification_webhook_url,
            dispatcher_config: DispatcherConfig {
                topic: notification_topic,
                queue_capacity: notification_queue_capacity,
            },
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Partner Credit Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("Initializing infrastructure...");

    let db_config = PostgresConfig::default();
    let postgres_client = Arc::new(PostgresClient::new(&config.database_url, db_config).await?);
    postgres_client.run_migrations().await?;
    info!("   Database connected and migrations applied");

    let cache = Arc::new(InMemoryBalanceCache::new(config.cache_config.clone()));
    info!(
        "   Balance cache ready (capacity: {}, ttl: {}s)",
        config.cache_config.capacity,
        config.cache_config.ttl.as_secs()
    );

    let app_state = AppState::new(
        Arc::clone(&postgres_client) as _,
        Arc::clone(&postgres_client) as _,
        Arc::clone(&postgres_client) as _,
        cache,
    );

    // Notification dispatcher (optional)
    let app_state = if let Some(ref endpoint) = config.notification_webhook_url {
        let publisher = Arc::new(WebhookPublisher::new(WebhookConfig::new(endpoint.clone()))?);
        let (dispatcher, _sender_handle) =
            NotificationDispatcher::spawn(publisher, config.dispatcher_config.clone());
        info!(
            "   Notification dispatcher started (topic: {}, endpoint: {})",
            config.dispatcher_config.topic, endpoint
        );
        app_state.with_notifier(Arc::new(dispatcher))
    } else {
        warn!("   Notification dispatcher disabled (NOTIFICATION_WEBHOOK_URL not set)");
        app_state
    };

    let app_state = Arc::new(app_state);

    // Reconciliation sweeper
    let sweeper_shutdown_tx = if config.sweeper_config.enabled {
        let (_handle, shutdown_tx) =
            spawn_sweeper(Arc::clone(&app_state.service), config.sweeper_config.clone());
        info!(
            "   Reconciliation sweeper started (interval: {}s, stale_after: {}s)",
            config.sweeper_config.interval.as_secs(),
            config.sweeper_config.stale_after.as_secs()
        );
        Some(shutdown_tx)
    } else {
        info!("   Reconciliation sweeper disabled");
        None
    };

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server starting on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui", addr);
    info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tx) = sweeper_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
