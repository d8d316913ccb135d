//! PostgreSQL billing adapter
//!
//! Implements `RecordStore` and `BillingLockStore` on top of
//! [`TimesheetRepository`], translating rows into domain types and database
//! errors into `PortError`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infra_db::adapters::PostgresBillingAdapter;
//! use domain_billing::{BillingCollector, BillingLockManager};
//!
//! let adapter = Arc::new(PostgresBillingAdapter::new(pool));
//! let collector = BillingCollector::new(adapter.clone());
//! let locks = BillingLockManager::new(adapter);
//! ```

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{
    raw_ids, ArticleId, BillingEntityId, CategoryId, DomainPort, HealthCheckResult,
    HealthCheckable, MaterialItemId, PortError, ProjectId, TimeRecordId, UserId,
};
use domain_billing::{
    BillingEntity, BillingLockStore, EntityActivity, LockResult, MaterialItem, MaterialItemRow,
    RecordFilter, RecordStore, StatusFilter, TimeRecord,
};

use crate::adapters::ping;
use crate::repositories::timesheet::{
    ActivityRow, BillingEntityRow, LockAttempt, MaterialItemRecord, RecordSelection,
    TimeRecordRow, TimesheetRepository,
};

const ADAPTER_ID: &str = "postgres-billing-adapter";

/// PostgreSQL-backed record and lock store
#[derive(Debug, Clone)]
pub struct PostgresBillingAdapter {
    repository: TimesheetRepository,
    pool: PgPool,
}

impl PostgresBillingAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: TimesheetRepository::new(pool.clone()),
            pool,
        }
    }

    /// Returns a reference to the underlying repository
    pub fn repository(&self) -> &TimesheetRepository {
        &self.repository
    }
}

impl DomainPort for PostgresBillingAdapter {}

#[async_trait]
impl HealthCheckable for PostgresBillingAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, ADAPTER_ID).await
    }
}

#[async_trait]
impl RecordStore for PostgresBillingAdapter {
    async fn time_records(&self, filter: &RecordFilter) -> Result<Vec<TimeRecord>, PortError> {
        let rows = self.repository.time_records(&selection(filter)).await?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn material_items(&self, filter: &RecordFilter) -> Result<Vec<MaterialItemRow>, PortError> {
        let rows = self.repository.material_items(&selection(filter)).await?;
        Ok(rows.into_iter().map(row_to_item).collect())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn billing_entities(&self, ids: &[BillingEntityId]) -> Result<Vec<BillingEntity>, PortError> {
        let rows = self.repository.billing_entities(&raw_ids(ids)).await?;
        debug!(found = rows.len(), "Loaded billing entities");
        Ok(rows.into_iter().map(row_to_entity).collect())
    }

    async fn entity_activity(&self, filter: &RecordFilter) -> Result<Vec<EntityActivity>, PortError> {
        let rows = self.repository.entity_activity(&selection(filter)).await?;
        Ok(rows.into_iter().map(row_to_activity).collect())
    }

    async fn time_records_by_id(&self, ids: &[TimeRecordId]) -> Result<Vec<TimeRecord>, PortError> {
        let rows = self.repository.time_records_by_id(&raw_ids(ids)).await?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn material_items_by_id(&self, ids: &[MaterialItemId]) -> Result<Vec<MaterialItemRow>, PortError> {
        let rows = self.repository.material_items_by_id(&raw_ids(ids)).await?;
        Ok(rows.into_iter().map(row_to_item).collect())
    }
}

#[async_trait]
impl BillingLockStore for PostgresBillingAdapter {
    async fn lock_hours(
        &self,
        ids: &[TimeRecordId],
        invoice_number: &str,
    ) -> Result<LockResult, PortError> {
        let attempt = self.repository.lock_hours(&raw_ids(ids), invoice_number).await?;
        Ok(lock_result(attempt))
    }

    async fn lock_items(
        &self,
        ids: &[MaterialItemId],
        invoice_number: &str,
    ) -> Result<LockResult, PortError> {
        let attempt = self.repository.lock_items(&raw_ids(ids), invoice_number).await?;
        Ok(lock_result(attempt))
    }
}

fn selection(filter: &RecordFilter) -> RecordSelection {
    RecordSelection {
        start: filter.window.start,
        end: filter.window.end,
        billed: match filter.status {
            StatusFilter::Unbilled => Some(false),
            StatusFilter::Billed => Some(true),
            StatusFilter::All => None,
        },
        only_billable: filter.only_billable,
        owner_user_id: filter.scope.map(|user| user.get()),
    }
}

fn lock_result(attempt: LockAttempt) -> LockResult {
    match attempt {
        LockAttempt::Applied { affected } => LockResult::Applied { affected },
        LockAttempt::Rejected { requested, eligible } => LockResult::Rejected { requested, eligible },
    }
}

fn row_to_record(row: TimeRecordRow) -> TimeRecord {
    TimeRecord {
        id: TimeRecordId::new(row.id),
        owner_user_id: UserId::new(row.owner_user_id),
        billing_entity_id: row.billing_entity_id.map(BillingEntityId::new),
        project_id: row.project_id.map(ProjectId::new),
        category_id: row.category_id.map(CategoryId::new),
        category_name: row.category_name,
        date: row.date,
        hours: row.hours,
        billable: row.billable,
        billed: row.billed,
        invoice_number: row.invoice_number,
        work_label: row.work_label,
        description: row.description,
    }
}

fn row_to_item(row: MaterialItemRecord) -> MaterialItemRow {
    MaterialItemRow {
        item: MaterialItem {
            id: MaterialItemId::new(row.id),
            parent_time_record_id: TimeRecordId::new(row.time_record_id),
            article_id: row.article_id.map(ArticleId::new),
            article_name: row.article_name,
            quantity: row.quantity,
            description: row.description,
            invoice_number: row.invoice_number,
        },
        billing_entity_id: row.billing_entity_id.map(BillingEntityId::new),
        project_id: row.project_id.map(ProjectId::new),
        date: row.date,
    }
}

fn row_to_entity(row: BillingEntityRow) -> BillingEntity {
    BillingEntity {
        id: BillingEntityId::new(row.id),
        name: row.name,
        external_accounting_id: row.external_accounting_id,
        is_billing_owner: row.is_billing_owner,
        owner_entity_id: row.owner_entity_id.map(BillingEntityId::new),
        bill_direct: row.bill_direct,
    }
}

fn row_to_activity(row: ActivityRow) -> EntityActivity {
    EntityActivity {
        billing_entity_id: row.billing_entity_id.map(BillingEntityId::new),
        unbilled_before: row.unbilled_before,
        unbilled_after: row.unbilled_after,
        billed_in_range: row.billed_in_range,
    }
}
