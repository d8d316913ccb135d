//! Repository implementations
//!
//! Repositories own the SQL and map rows into plain row structs; the adapters
//! in `crate::adapters` translate those into domain types.
//!
//! All queries use runtime-checked `sqlx::query*` functions with bound
//! parameters. Id lists are bound as arrays (`= ANY($1)`) and an empty list
//! short-circuits before reaching the database.

pub mod documents;
pub mod jobs;
pub mod timesheet;

pub use documents::DocumentRepository;
pub use jobs::JobRepository;
pub use timesheet::TimesheetRepository;
