//! Billing Domain - Settlement Core
//!
//! Turns reported hours and material into invoice candidates and moves them
//! from unbilled to billed exactly once.
//!
//! # Flow
//!
//! ```text
//! BillingCollector ──▶ BillingEnvelope (per entity)
//!        │                 ├─ BillTarget      (self or single-hop owner)
//!        │                 ├─ InvoiceLine[]   (grouping policy)
//!        │                 └─ LockSet         (unbilled ids only)
//!        ▼
//! SettlementService: create invoice ─▶ lock hours ─▶ lock items ─▶ queue worklog
//! ```
//!
//! # Locking
//!
//! [`BillingLockManager`] is all-or-nothing. If any requested row is already
//! billed the whole batch is rejected with [`BillingError::Conflict`] and no
//! row changes; two concurrent requests over overlapping ids can never both
//! succeed.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingCollector, CollectQuery};
//!
//! let envelopes = collector.collect(&CollectQuery::new(window)).await?;
//! for envelope in envelopes.iter().filter(|e| e.meta.billable) {
//!     println!("{:?}: {} lines", envelope.name(), envelope.lines.len());
//! }
//! ```

pub mod bill_target;
pub mod collector;
pub mod envelope;
pub mod error;
pub mod grouping;
pub mod lock;
pub mod ports;
pub mod settlement;
pub mod timesheet;

pub use bill_target::{resolve, BillTarget, BillTargetResolver, TargetSource};
pub use collector::{aggregate, BillingCollector, CollectQuery, CollectionInput};
pub use envelope::{
    ArticleCount, ArticleHistogram, BillingEnvelope, BucketKey, BucketTotals, CustomItemCount,
    EnvelopeMeta, LockSet,
};
pub use error::BillingError;
pub use grouping::{
    GroupingPolicy, InvoiceLine, InvoiceLineGrouper, ItemGrouping, ItemKey, LaborGrouping,
    LaborKey, LineKey,
};
pub use lock::{BillingLockManager, LockOutcome};
pub use ports::{BillingLockStore, EntityActivity, LockResult, RecordFilter, RecordStore};
pub use settlement::{SettlementOutcome, SettlementRequest, SettlementService, SettlementStage};
pub use timesheet::{
    normalize_description, BillingEntity, MaterialItem, MaterialItemRow, StatusFilter, TimeRecord,
};
