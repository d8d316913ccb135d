//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! settlement core test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built entities, windows and record sets
//! - `builders`: Builder patterns for records, items, jobs and queue items
//! - `database`: Postgres test container and row seeding
//! - `assertions`: Assertion helpers for envelopes, lines and jobs
//! - `generators`: Property-based test data generators

pub mod assertions;
pub mod builders;
pub mod database;
pub mod fixtures;
pub mod generators;

pub use assertions::*;
pub use builders::*;
pub use database::*;
pub use fixtures::*;
pub use generators::*;
