//! Settlement API Server Binary
//!
//! Starts the HTTP API and, unless disabled, the worklog document drainer in
//! the same process.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! cargo run --bin settlement-api
//!
//! # Run with environment variables
//! API_PORT=8080 DATABASE_URL=postgres://... API_ACCOUNTING__BASE_URL=https://... cargo run --bin settlement-api
//! ```
//!
//! # Environment Variables
//!
//! * `API_HOST`, `API_PORT` - Bind address (default: 0.0.0.0:8080)
//! * `API_JWT_SECRET` - JWT verification secret (required in production)
//! * `API_DATABASE_URL` or `DATABASE_URL` - PostgreSQL connection string
//! * `API_LOG_LEVEL` - Fallback log level when `RUST_LOG` is unset (default: info)
//! * `API_WORKER__ENABLED` - Run the document drainer here (default: true)
//! * `API_WORKER__MAX_ATTEMPTS`, `API_WORKER__BACKOFF_BASE_SECS`,
//!   `API_WORKER__SWEEP_INTERVAL_SECS`, `API_WORKER__STALE_AFTER_SECS`
//! * `API_ACCOUNTING__BASE_URL`, `API_ACCOUNTING__ACCESS_TOKEN`
//! * `API_MAIL__RELAY_URL`, `API_MAIL__FROM`, `API_MAIL__API_KEY` - Mail is
//!   disabled while the relay URL is unset

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use core_kernel::HealthCheckable;
use domain_documents::adapters::{HttpAccountingGateway, HttpMailRelay};
use domain_documents::{DocumentWorker, DrainHandle, Drainer, HtmlWorklogRenderer};
use infra_db::{
    create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter, PostgresDocumentAdapter,
};
use interface_api::{config::ApiConfig, create_router, AppState, Ports};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env().context("invalid API configuration")?;

    init_tracing(&config.log_level);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        worker = config.worker.enabled,
        "Starting settlement API server"
    );

    let pool = create_pool(DatabaseConfig::new(config.database_url.clone()))
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    let billing = Arc::new(PostgresBillingAdapter::new(pool.clone()));
    let documents = Arc::new(PostgresDocumentAdapter::new(pool.clone()));
    let gateway = Arc::new(
        HttpAccountingGateway::new(config.accounting.http_config())
            .context("failed to build accounting client")?,
    );

    let drainer = if config.worker.enabled {
        Some(spawn_drainer(&config, documents.clone(), gateway.clone())?)
    } else {
        tracing::info!("Document drainer disabled in this process");
        None
    };

    let health: Vec<Arc<dyn HealthCheckable>> = vec![
        billing.clone() as Arc<dyn HealthCheckable>,
        documents.clone() as Arc<dyn HealthCheckable>,
        gateway.clone() as Arc<dyn HealthCheckable>,
    ];
    let state = AppState::new(
        config.clone(),
        Ports {
            records: billing.clone(),
            lock_store: billing,
            job_queue: documents,
            gateway,
            health,
            drain_trigger: drainer.as_ref().map(DrainHandle::trigger),
        },
    );

    let app = create_router(state);
    let addr: SocketAddr = config.server_addr().parse().context("invalid bind address")?;

    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(drainer) = drainer {
        drainer.shutdown().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Builds the document worker and starts its single drain task
fn spawn_drainer(
    config: &ApiConfig,
    documents: Arc<PostgresDocumentAdapter>,
    gateway: Arc<HttpAccountingGateway>,
) -> anyhow::Result<DrainHandle> {
    let mut worker = DocumentWorker::new(
        documents.clone(),
        documents.clone(),
        gateway,
        Arc::new(HtmlWorklogRenderer::new()),
    )
    .with_retry_policy(config.worker.retry_policy())
    .with_stale_after(config.worker.stale_after());

    match config.mail.relay_config() {
        Some(relay) => {
            let sender = HttpMailRelay::new(relay).context("failed to build mail relay client")?;
            worker = worker.with_mail(Arc::new(sender), documents);
        }
        None => tracing::info!("Mail relay not configured, worklogs will not be emailed"),
    }

    Ok(Drainer::new(Arc::new(worker))
        .with_sweep_interval(config.worker.sweep_interval())
        .spawn())
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
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
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
