//! HTTP API Layer
//!
//! REST API for billing settlement and worklog documents using Axum.
//!
//! # Routes
//!
//! | Method | Path | Role |
//! |---|---|---|
//! | GET  | `/health`, `/health/ready` | public |
//! | POST | `/invoice/collect` | any user (own records) or `billing:admin` |
//! | POST | `/invoice/lock-and-mark` | `billing:admin` |
//! | POST | `/invoice/lock-and-mark-items` | `billing:admin` |
//! | POST | `/invoice/settle` | `billing:admin` |
//! | POST | `/worklogpdf/queue` | `billing:admin` |
//! | GET  | `/worklogpdf/queue/status` | `billing:admin` |
//! | POST | `/worklogpdf/queue/:id/retry` | `billing:admin` |
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{create_router, AppState, Ports};
//!
//! let state = AppState::new(config, ports);
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;
use domain_billing::{
    BillingCollector, BillingLockManager, BillingLockStore, RecordStore, SettlementService,
};
use domain_documents::{AccountingGateway, DocumentJobQueue, DrainTrigger, JobQueue};

use crate::config::ApiConfig;
use crate::handlers::{health, invoice, worklog};
use crate::middleware::{audit_middleware, auth_middleware, billing_admin_middleware};

/// Port implementations the API runs against
pub struct Ports {
    pub records: Arc<dyn RecordStore>,
    pub lock_store: Arc<dyn BillingLockStore>,
    pub job_queue: Arc<dyn JobQueue>,
    pub gateway: Arc<dyn AccountingGateway>,
    /// Adapters reported by `/health/ready`
    pub health: Vec<Arc<dyn HealthCheckable>>,
    /// Wakes the document drainer after an enqueue or retry
    pub drain_trigger: Option<DrainTrigger>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub collector: Arc<BillingCollector>,
    pub locks: BillingLockManager,
    pub settlement: SettlementService,
    pub jobs: DocumentJobQueue,
    pub health: Arc<Vec<Arc<dyn HealthCheckable>>>,
}

impl AppState {
    pub fn new(config: ApiConfig, ports: Ports) -> Self {
        let mut jobs = DocumentJobQueue::new(ports.job_queue);
        if let Some(trigger) = ports.drain_trigger {
            jobs = jobs.with_trigger(trigger);
        }
        let locks = BillingLockManager::new(ports.lock_store);
        let settlement = SettlementService::new(
            ports.records.clone(),
            ports.gateway,
            locks.clone(),
            jobs.clone(),
        );

        Self {
            config: Arc::new(config),
            collector: Arc::new(BillingCollector::new(ports.records)),
            locks,
            settlement,
            jobs,
            health: Arc::new(ports.health),
        }
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check));

    let invoice_admin_routes = Router::new()
        .route("/lock-and-mark", post(invoice::lock_hours))
        .route("/lock-and-mark-items", post(invoice::lock_items))
        .route("/settle", post(invoice::settle))
        .route_layer(axum_middleware::from_fn(billing_admin_middleware));

    let invoice_routes = Router::new()
        .route("/collect", post(invoice::collect))
        .merge(invoice_admin_routes);

    let worklog_routes = Router::new()
        .route("/queue", post(worklog::enqueue))
        .route("/queue/status", get(worklog::status))
        .route("/queue/:id/retry", post(worklog::retry))
        .route_layer(axum_middleware::from_fn(billing_admin_middleware));

    // Protected routes
    let api_routes = Router::new()
        .nest("/invoice", invoice_routes)
        .nest("/worklogpdf", worklog_routes)
        .layer(axum_middleware::from_fn(audit_middleware))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
