//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the billing settlement core using SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: repositories own the SQL and
//! return plain row types, adapters implement the domain ports on top of them.
//!
//! # Transactions
//!
//! Only two kinds of write hold a transaction open:
//! - lock-and-mark, scoped to exactly the requested ids
//! - the job claim, which commits immediately after flipping one row to
//!   `processing`
//!
//! Nothing holds a transaction across a network call.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingAdapter};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/settlement")).await?;
//! run_migrations(&pool).await?;
//! let billing = PostgresBillingAdapter::new(pool.clone());
//! ```

pub mod adapters;
pub mod error;
pub mod pool;
pub mod repositories;

pub use adapters::{PostgresBillingAdapter, PostgresDocumentAdapter};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
