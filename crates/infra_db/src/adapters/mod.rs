//! Domain Adapters
//!
//! Adapter implementations for domain ports, connecting the billing and
//! document interfaces to the PostgreSQL database layer.
//!
//! Each adapter:
//! - Implements the domain's port traits
//! - Translates between domain models and database row types
//! - Uses the repository layer for database operations
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresDocumentAdapter;
//! use domain_documents::JobQueue;
//!
//! let adapter = PostgresDocumentAdapter::new(pool);
//! let job = adapter.claim_next(Utc::now()).await?;
//! ```

pub mod billing;
pub mod documents;

pub use billing::PostgresBillingAdapter;
pub use documents::PostgresDocumentAdapter;

use chrono::Utc;
use sqlx::PgPool;

use core_kernel::{AdapterHealth, HealthCheckResult};

/// Runs `SELECT 1` and reports the round-trip latency
pub(crate) async fn ping(pool: &PgPool, adapter_id: &str) -> HealthCheckResult {
    let start = std::time::Instant::now();

    let result = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await;

    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(_) => HealthCheckResult {
            adapter_id: adapter_id.to_string(),
            status: AdapterHealth::Healthy,
            latency_ms,
            message: None,
            checked_at: Utc::now(),
        },
        Err(e) => HealthCheckResult {
            adapter_id: adapter_id.to_string(),
            status: AdapterHealth::Unhealthy,
            latency_ms,
            message: Some(format!("Database error: {}", e)),
            checked_at: Utc::now(),
        },
    }
}
