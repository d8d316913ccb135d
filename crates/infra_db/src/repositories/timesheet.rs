//! Time record and material item repository
//!
//! Collection reads go through `QueryBuilder` so every filter value is a bound
//! parameter. Lock-and-mark runs as one transaction per call: the eligible
//! rows are locked with `FOR UPDATE`, counted against the request, and either
//! all updated or the transaction is rolled back untouched.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};

use crate::error::DatabaseError;

/// Non-blank invoice number on a material item
const ITEM_BILLED: &str = "(NULLIF(BTRIM(mi.invoice_number), '') IS NOT NULL)";

const TIME_RECORD_SELECT: &str = r#"
    SELECT tr.id, tr.owner_user_id, tr.billing_entity_id, tr.project_id, tr.category_id,
           c.name AS category_name, tr.date, tr.hours, tr.billable, tr.billed,
           tr.invoice_number, tr.work_label, tr.description
    FROM time_records tr
    LEFT JOIN time_categories c ON c.id = tr.category_id
"#;

const MATERIAL_ITEM_SELECT: &str = r#"
    SELECT mi.id, mi.time_record_id, mi.article_id, a.name AS article_name, mi.quantity,
           mi.description, mi.invoice_number, tr.billing_entity_id, tr.project_id, tr.date
    FROM material_items mi
    JOIN time_records tr ON tr.id = mi.time_record_id
    LEFT JOIN articles a ON a.id = mi.article_id AND mi.article_id > 0
"#;

/// Row selection for collection queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSelection {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// `Some(false)` for unbilled only, `Some(true)` for billed only
    pub billed: Option<bool>,
    pub only_billable: bool,
    pub owner_user_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TimeRecordRow {
    pub id: i64,
    pub owner_user_id: i64,
    pub billing_entity_id: Option<i64>,
    pub project_id: Option<i64>,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub date: NaiveDate,
    pub hours: Decimal,
    pub billable: bool,
    pub billed: bool,
    pub invoice_number: Option<String>,
    pub work_label: Option<String>,
    pub description: Option<String>,
}

/// Material item joined with the parent fields it is bucketed by
#[derive(Debug, Clone, FromRow)]
pub struct MaterialItemRecord {
    pub id: i64,
    pub time_record_id: i64,
    pub article_id: Option<i64>,
    pub article_name: Option<String>,
    pub quantity: i32,
    pub description: String,
    pub invoice_number: Option<String>,
    pub billing_entity_id: Option<i64>,
    pub project_id: Option<i64>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, FromRow)]
pub struct BillingEntityRow {
    pub id: i64,
    pub name: String,
    pub external_accounting_id: Option<String>,
    pub is_billing_owner: bool,
    pub owner_entity_id: Option<i64>,
    pub bill_direct: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ActivityRow {
    pub billing_entity_id: Option<i64>,
    pub unbilled_before: bool,
    pub unbilled_after: bool,
    pub billed_in_range: bool,
}

/// Outcome of a lock transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Applied { affected: u64 },
    Rejected { requested: usize, eligible: usize },
}

/// Repository over `time_records`, `material_items` and `billing_entities`
#[derive(Debug, Clone)]
pub struct TimesheetRepository {
    pool: PgPool,
}

impl TimesheetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Time records dated inside the selection window
    #[instrument(skip(self))]
    pub async fn time_records(&self, selection: &RecordSelection) -> Result<Vec<TimeRecordRow>, DatabaseError> {
        let mut builder = QueryBuilder::<Postgres>::new(TIME_RECORD_SELECT);
        builder
            .push(" WHERE tr.date BETWEEN ")
            .push_bind(selection.start)
            .push(" AND ")
            .push_bind(selection.end);
        push_owner_filters(&mut builder, selection);
        if let Some(billed) = selection.billed {
            builder.push(" AND tr.billed = ").push_bind(billed);
        }
        builder.push(" ORDER BY tr.date, tr.id");

        let rows = builder
            .build_query_as::<TimeRecordRow>()
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "Loaded time records");
        Ok(rows)
    }

    /// Material items whose parent record is inside the selection window
    ///
    /// The billed filter applies to the item's own invoice number.
    #[instrument(skip(self))]
    pub async fn material_items(
        &self,
        selection: &RecordSelection,
    ) -> Result<Vec<MaterialItemRecord>, DatabaseError> {
        let mut builder = QueryBuilder::<Postgres>::new(MATERIAL_ITEM_SELECT);
        builder
            .push(" WHERE tr.date BETWEEN ")
            .push_bind(selection.start)
            .push(" AND ")
            .push_bind(selection.end);
        push_owner_filters(&mut builder, selection);
        if let Some(billed) = selection.billed {
            builder.push(" AND ").push(ITEM_BILLED).push(" = ").push_bind(billed);
        }
        builder.push(" ORDER BY tr.date, mi.id");

        let rows = builder
            .build_query_as::<MaterialItemRecord>()
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "Loaded material items");
        Ok(rows)
    }

    /// Loads the given entities; an empty id list matches nothing
    pub async fn billing_entities(&self, ids: &[i64]) -> Result<Vec<BillingEntityRow>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, BillingEntityRow>(
            r#"
            SELECT id, name, external_accounting_id, is_billing_owner, owner_entity_id, bill_direct
            FROM billing_entities
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Loads time records by id; an empty id list matches nothing
    pub async fn time_records_by_id(&self, ids: &[i64]) -> Result<Vec<TimeRecordRow>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(TIME_RECORD_SELECT);
        builder
            .push(" WHERE tr.id = ANY(")
            .push_bind(ids)
            .push(") ORDER BY tr.id");
        let rows = builder
            .build_query_as::<TimeRecordRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Loads material items by id with their parent's fields
    pub async fn material_items_by_id(&self, ids: &[i64]) -> Result<Vec<MaterialItemRecord>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(MATERIAL_ITEM_SELECT);
        builder
            .push(" WHERE mi.id = ANY(")
            .push_bind(ids)
            .push(") ORDER BY mi.id");
        let rows = builder
            .build_query_as::<MaterialItemRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Per-entity unbilled/billed flags around the selection window
    ///
    /// Ignores the billed filter; the flags describe all rows of the owner scope.
    #[instrument(skip(self))]
    pub async fn entity_activity(&self, selection: &RecordSelection) -> Result<Vec<ActivityRow>, DatabaseError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT tr.billing_entity_id, ");
        builder
            .push("COALESCE(BOOL_OR(NOT tr.billed AND tr.date < ")
            .push_bind(selection.start)
            .push("), FALSE) AS unbilled_before, ")
            .push("COALESCE(BOOL_OR(NOT tr.billed AND tr.date > ")
            .push_bind(selection.end)
            .push("), FALSE) AS unbilled_after, ")
            .push("COALESCE(BOOL_OR(tr.date BETWEEN ")
            .push_bind(selection.start)
            .push(" AND ")
            .push_bind(selection.end)
            .push(" AND (tr.billed OR EXISTS (SELECT 1 FROM material_items mi WHERE mi.time_record_id = tr.id AND ")
            .push(ITEM_BILLED)
            .push("))), FALSE) AS billed_in_range")
            .push(" FROM time_records tr WHERE TRUE");
        push_owner_filters(&mut builder, selection);
        builder.push(" GROUP BY tr.billing_entity_id");

        let rows = builder
            .build_query_as::<ActivityRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Marks time records billed, all or nothing
    ///
    /// `ids` must already be de-duplicated.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn lock_hours(&self, ids: &[i64], invoice_number: &str) -> Result<LockAttempt, DatabaseError> {
        if ids.is_empty() {
            return Ok(LockAttempt::Rejected { requested: 0, eligible: 0 });
        }

        let mut tx = self.pool.begin().await?;

        let locked: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM time_records
            WHERE id = ANY($1) AND billed = FALSE
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await?;

        if locked.len() != ids.len() {
            tx.rollback().await?;
            return Ok(LockAttempt::Rejected {
                requested: ids.len(),
                eligible: locked.len(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE time_records
            SET billed = TRUE, invoice_number = $2, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(&locked)
        .bind(invoice_number)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LockAttempt::Applied {
            affected: result.rows_affected(),
        })
    }

    /// Stamps material items with an invoice number, all or nothing
    ///
    /// Independent of the parent record's billed flag.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn lock_items(&self, ids: &[i64], invoice_number: &str) -> Result<LockAttempt, DatabaseError> {
        if ids.is_empty() {
            return Ok(LockAttempt::Rejected { requested: 0, eligible: 0 });
        }

        let mut tx = self.pool.begin().await?;

        let locked: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT mi.id FROM material_items mi
            WHERE mi.id = ANY($1) AND NOT (NULLIF(BTRIM(mi.invoice_number), '') IS NOT NULL)
            ORDER BY mi.id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await?;

        if locked.len() != ids.len() {
            tx.rollback().await?;
            return Ok(LockAttempt::Rejected {
                requested: ids.len(),
                eligible: locked.len(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE material_items
            SET invoice_number = $2, updated_at = NOW()
            WHERE id = ANY($1)
            "#,
        )
        .bind(&locked)
        .bind(invoice_number)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LockAttempt::Applied {
            affected: result.rows_affected(),
        })
    }
}

fn push_owner_filters(builder: &mut QueryBuilder<'_, Postgres>, selection: &RecordSelection) {
    if let Some(owner) = selection.owner_user_id {
        builder.push(" AND tr.owner_user_id = ").push_bind(owner);
    }
    if selection.only_billable {
        builder.push(" AND tr.billable = TRUE");
    }
}
