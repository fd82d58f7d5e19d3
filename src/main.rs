//! Billing Reconciler service binary.
//!
//! Storage is chosen from configuration: PostgreSQL when `database.url` is
//! set, a Redis ledger when `redis.url` is set, in-memory otherwise.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use billing_reconciler::adapters::http::{billing_router, BillingAppState};
use billing_reconciler::adapters::memory::{
    InMemoryCorrelationStore, InMemoryLedger, InMemorySubscriptionStore,
};
use billing_reconciler::adapters::postgres::{
    run_migrations, PostgresCorrelationStore, PostgresLedger, PostgresSubscriptionStore,
};
use billing_reconciler::adapters::redis::RedisLedger;
use billing_reconciler::adapters::stripe::{BackoffConfig, NoopCustomerSync, StripeCustomerSync};
use billing_reconciler::application::handlers::billing::{
    CheckoutCorrelator, GetBillingStatusHandler, HandleWebhookHandler, LedgerRetention, QuotaGate,
};
use billing_reconciler::config::AppConfig;
use billing_reconciler::domain::billing::{PlanCatalog, WebhookVerifier};
use billing_reconciler::ports::{CorrelationStore, CustomerSync, IdempotencyLedger, SubscriptionStore};

struct Storage {
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    correlations: Arc<dyn CorrelationStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);
    tracing::info!(
        environment = ?config.server.environment,
        postgres = config.database.is_some(),
        redis = config.redis.is_some(),
        customer_sync = config.payment.api_key().is_some(),
        "Starting billing reconciler"
    );

    let storage = build_storage(&config).await?;
    let catalog = Arc::new(PlanCatalog::standard());

    let customer_sync: Arc<dyn CustomerSync> = match config.payment.api_key() {
        Some(key) => Arc::new(
            StripeCustomerSync::new(key)
                .with_base_url(config.payment.api_base_url.clone())
                .with_backoff(BackoffConfig {
                    max_attempts: config.billing.customer_sync_max_attempts,
                    ..BackoffConfig::default()
                }),
        ),
        None => Arc::new(NoopCustomerSync),
    };

    let verifier = WebhookVerifier::new(config.payment.webhook_secret())
        .with_tolerance_secs(config.payment.signature_tolerance_secs);
    let correlator = Arc::new(
        CheckoutCorrelator::new(Arc::clone(&storage.correlations), Arc::clone(&catalog))
            .with_ttl(config.billing.correlation_ttl()),
    );
    let webhook_handler = HandleWebhookHandler::new(
        Arc::new(verifier),
        Arc::clone(&storage.ledger),
        Arc::clone(&storage.store),
        Arc::clone(&correlator),
        customer_sync,
        Arc::clone(&catalog),
    )
    .with_retry_limit(config.billing.conflict_retry_limit);

    let retention = Arc::new(
        LedgerRetention::new(Arc::clone(&storage.ledger), Arc::clone(&storage.correlations))
            .with_retention(config.billing.ledger_retention()),
    );
    let sweeper = retention.spawn(config.billing.retention_sweep_interval());

    let state = BillingAppState {
        webhook_handler: Arc::new(webhook_handler),
        correlator,
        quota_gate: Arc::new(QuotaGate::new(Arc::clone(&storage.store), Arc::clone(&catalog))),
        status_handler: Arc::new(GetBillingStatusHandler::new(storage.store, catalog)),
    };

    let app = billing_router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(TimeoutLayer::new(config.server.request_timeout())),
    );

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }
}

async fn build_storage(config: &AppConfig) -> anyhow::Result<Storage> {
    let mut storage = match &config.database {
        Some(db) => {
            let pool = PgPoolOptions::new()
                .min_connections(db.min_connections)
                .max_connections(db.max_connections)
                .acquire_timeout(db.acquire_timeout())
                .idle_timeout(db.idle_timeout())
                .connect(&db.url)
                .await?;
            if db.run_migrations {
                run_migrations(&pool).await?;
            }
            tracing::info!("PostgreSQL storage ready");
            Storage {
                store: Arc::new(PostgresSubscriptionStore::new(pool.clone())),
                ledger: Arc::new(PostgresLedger::new(pool.clone())),
                correlations: Arc::new(PostgresCorrelationStore::new(pool)),
            }
        }
        None => {
            tracing::warn!("No database configured, state is kept in memory");
            Storage {
                store: Arc::new(InMemorySubscriptionStore::new()),
                ledger: Arc::new(InMemoryLedger::new()),
                correlations: Arc::new(InMemoryCorrelationStore::new()),
            }
        }
    };

    if let Some(redis_config) = &config.redis {
        let client = redis::Client::open(redis_config.url.as_str())?;
        let conn = tokio::time::timeout(
            redis_config.timeout(),
            client.get_multiplexed_tokio_connection(),
        )
        .await??;
        let retention_secs = config.billing.ledger_retention().num_seconds().max(1) as u64;
        storage.ledger = Arc::new(RedisLedger::new(conn, retention_secs));
        tracing::info!("Redis idempotency ledger ready");
    }

    Ok(storage)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
