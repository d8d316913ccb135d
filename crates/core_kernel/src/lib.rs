//! Core Kernel - Foundational types shared by the settlement crates
//!
//! This crate provides the building blocks used across all domain modules:
//! - Strongly-typed integer identifiers for records, entities and jobs
//! - Inclusive calendar windows for billing collection
//! - Port plumbing for the hexagonal adapters

pub mod temporal;
pub mod identifiers;
pub mod error;
pub mod ports;

pub use temporal::{DateWindow, TemporalError};
pub use identifiers::{
    TimeRecordId, MaterialItemId, ProjectId, CategoryId, ArticleId, UserId,
    BillingEntityId, DocumentJobId, GeneratedDocumentId, raw_ids,
};
pub use error::CoreError;
pub use ports::{
    PortError, DomainPort, AdapterHealth, HealthCheckResult, HealthCheckable,
};
