//! Document job repository
//!
//! The claim is a short transaction: pick the lowest due id with
//! `FOR UPDATE SKIP LOCKED`, flip it to `processing`, commit. Concurrent
//! claimants in other processes skip the locked row instead of waiting on it,
//! so a job is never handed out twice.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};

use crate::error::DatabaseError;

const JOB_COLUMNS: &str = "id, target_document_id, document_number, status, attempts, run_after, \
                           last_error, payload, claimed_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub status: String,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJobRow {
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct FailedJobRow {
    pub id: i64,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Repository over `document_jobs`
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts jobs as `queued` and due now, in one transaction
    #[instrument(skip(self, jobs), fields(count = jobs.len()))]
    pub async fn enqueue(&self, jobs: &[NewJobRow]) -> Result<Vec<i64>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(jobs.len());

        for job in jobs {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO document_jobs (target_document_id, document_number, status, attempts, run_after, payload)
                VALUES ($1, $2, 'queued', 0, NOW(), $3)
                RETURNING id
                "#,
            )
            .bind(job.target_document_id)
            .bind(&job.document_number)
            .bind(&job.payload)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Claims the lowest due job id, stamping `claimed_at = now`
    #[instrument(skip(self))]
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<JobRow>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let candidate: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM document_jobs
            WHERE status = 'queued' AND run_after <= $1
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE document_jobs \
             SET status = 'processing', claimed_at = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job_id = id, "Claimed job");
        Ok(Some(row))
    }

    pub async fn find(&self, id: i64) -> Result<JobRow, DatabaseError> {
        sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM document_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("DocumentJob", id))
    }

    /// Marks a job done if it is still processing under `claimed_at`
    ///
    /// `false` when the claim was lost to a sweep and a later claimant.
    pub async fn mark_done(&self, id: i64, claimed_at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = 'done', last_error = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND claimed_at = $2
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Writes a failure transition; `run_after` is kept when `None`
    ///
    /// Fenced by the claim stamp like [`Self::mark_done`].
    pub async fn record_failure(
        &self,
        id: i64,
        claimed_at: DateTime<Utc>,
        status: &str,
        attempts: i32,
        run_after: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = $3,
                attempts = $4,
                run_after = COALESCE($5, run_after),
                last_error = $6,
                claimed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND claimed_at = $2
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .bind(status)
        .bind(attempts)
        .bind(run_after)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns `processing` jobs claimed before the cutoff to `queued`
    #[instrument(skip(self))]
    pub async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = 'queued', claimed_at = NULL, updated_at = NOW()
            WHERE status = 'processing' AND claimed_at < $1
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Job counts grouped by status
    pub async fn counts(&self) -> Result<Vec<(String, i64)>, DatabaseError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM document_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn recent_failures(&self, limit: i64) -> Result<Vec<FailedJobRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, FailedJobRow>(
            r#"
            SELECT id, attempts, last_error
            FROM document_jobs
            WHERE status = 'failed'
            ORDER BY updated_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Returns a failed job to the queue with attempts reset
    ///
    /// `false` when no failed job has that id.
    pub async fn retry_failed(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = 'queued', attempts = 0, run_after = NOW(), claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
