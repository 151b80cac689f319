use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use harambee_backend::api::{self, AppState};
use harambee_backend::cache;
use harambee_backend::config::AppConfig;
use harambee_backend::database::contribution_repository::PgContributionStore;
use harambee_backend::database::memory::MemoryContributionStore;
use harambee_backend::database::store::ContributionStore;
use harambee_backend::database;
use harambee_backend::logging::init_tracing;
use harambee_backend::payments::gateway::PaymentGateway;
use harambee_backend::payments::MpesaGateway;
use harambee_backend::services::{
    CallbackReconciler, ContributionService, NotificationSink, RefundService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let db_pool = match &config.database.url {
        Some(_) => Some(
            database::init_pool(&config.database)
                .await
                .context("failed to connect to the database")?,
        ),
        None => {
            warn!("DATABASE_URL not set, using the in-memory store");
            None
        }
    };

    let redis_pool = match &config.cache.redis_url {
        Some(_) => match cache::init_cache_pool(&config.cache).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Redis unavailable, token caching is per-process: {}", e);
                None
            }
        },
        None => None,
    };

    let store: Arc<dyn ContributionStore> = match &db_pool {
        Some(pool) => Arc::new(PgContributionStore::new(pool.clone())),
        None => Arc::new(MemoryContributionStore::new()),
    };

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        MpesaGateway::new(config.mpesa.clone(), redis_pool.clone())
            .context("failed to initialize the payment gateway")?,
    );

    let notifier = NotificationSink::new(config.reconciler.notify_url.clone());

    let state = AppState {
        contributions: Arc::new(ContributionService::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            config.mpesa.max_charge_amount,
        )),
        refunds: Arc::new(RefundService::new(
            store.clone(),
            gateway.clone(),
            config.reconciler.refund_advisory_window,
            notifier.clone(),
        )),
        reconciler: Arc::new(CallbackReconciler::new(
            store,
            config.reconciler.clone(),
            notifier,
        )),
        db_pool,
        redis_pool,
    };

    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "Harambee backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
