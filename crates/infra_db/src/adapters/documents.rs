//! PostgreSQL document adapter
//!
//! Implements the durable job queue, the generated-document store and the
//! recipient directory on top of [`JobRepository`] and [`DocumentRepository`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use core_kernel::{
    BillingEntityId, DocumentJobId, DomainPort, GeneratedDocumentId, HealthCheckResult,
    HealthCheckable, PortError,
};
use domain_documents::{
    DocumentJob, DocumentStore, DocumentUpsert, FailedJobSummary, FailureTransition, JobQueue,
    JobStatus, NewDocumentJob, QueueCounts, RecipientDirectory,
};

use crate::adapters::ping;
use crate::repositories::documents::{DocumentRepository, NewDocumentRow};
use crate::repositories::jobs::{FailedJobRow, JobRepository, JobRow, NewJobRow};

const ADAPTER_ID: &str = "postgres-document-adapter";

/// PostgreSQL-backed job queue, document store and recipient directory
#[derive(Debug, Clone)]
pub struct PostgresDocumentAdapter {
    jobs: JobRepository,
    documents: DocumentRepository,
    pool: PgPool,
}

impl PostgresDocumentAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            documents: DocumentRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    pub fn documents(&self) -> &DocumentRepository {
        &self.documents
    }
}

impl DomainPort for PostgresDocumentAdapter {}

#[async_trait]
impl HealthCheckable for PostgresDocumentAdapter {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, ADAPTER_ID).await
    }
}

#[async_trait]
impl JobQueue for PostgresDocumentAdapter {
    async fn enqueue(&self, jobs: &[NewDocumentJob]) -> Result<Vec<DocumentJobId>, PortError> {
        let rows = jobs
            .iter()
            .map(|job| {
                Ok(NewJobRow {
                    target_document_id: job.target_document_id,
                    document_number: job.document_number.clone(),
                    payload: job.encoded_payload().map_err(transformation)?,
                })
            })
            .collect::<Result<Vec<_>, PortError>>()?;

        let ids = self.jobs.enqueue(&rows).await?;
        Ok(ids.into_iter().map(DocumentJobId::new).collect())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<DocumentJob>, PortError> {
        self.jobs.claim_next(now).await?.map(row_to_job).transpose()
    }

    async fn mark_done(&self, id: DocumentJobId, claimed_at: DateTime<Utc>) -> Result<bool, PortError> {
        Ok(self.jobs.mark_done(id.get(), claimed_at).await?)
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn record_failure(
        &self,
        id: DocumentJobId,
        claimed_at: DateTime<Utc>,
        transition: FailureTransition,
        error: &str,
    ) -> Result<bool, PortError> {
        let run_after = match transition {
            FailureTransition::Requeue { run_after, .. } => Some(run_after),
            FailureTransition::Fail { .. } => None,
        };
        let attempts = i32::try_from(transition.attempts()).unwrap_or(i32::MAX);

        Ok(self
            .jobs
            .record_failure(
                id.get(),
                claimed_at,
                transition.status().as_str(),
                attempts,
                run_after,
                error,
            )
            .await?)
    }

    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, PortError> {
        Ok(self.jobs.requeue_stale(claimed_before).await?)
    }

    async fn counts(&self) -> Result<QueueCounts, PortError> {
        let mut counts = QueueCounts::default();
        for (status, count) in self.jobs.counts().await? {
            match JobStatus::from_str(&status) {
                Ok(status) => counts.add(status, u64::try_from(count).unwrap_or(0)),
                Err(_) => warn!(status = %status, "Ignoring unknown job status"),
            }
        }
        Ok(counts)
    }

    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailedJobSummary>, PortError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.jobs.recent_failures(limit).await?;
        Ok(rows.into_iter().map(row_to_failure).collect())
    }

    async fn retry_failed(&self, id: DocumentJobId) -> Result<bool, PortError> {
        Ok(self.jobs.retry_failed(id.get()).await?)
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentAdapter {
    async fn upsert(&self, document: &DocumentUpsert) -> Result<GeneratedDocumentId, PortError> {
        let row = NewDocumentRow {
            target_document_id: document.target_document_id,
            document_number: document.document_number.clone(),
            billing_entity_id: document.billing_entity_id.get(),
            period_start: document.period.start,
            period_end: document.period.end,
            file_name: document.file_name.clone(),
            mime: document.rendered.mime.clone(),
            size_bytes: i64::try_from(document.rendered.size_bytes()).unwrap_or(i64::MAX),
            content_hash: document.rendered.content_hash.clone(),
            content: document.rendered.bytes.clone(),
        };
        let id = self.documents.upsert(&row).await?;
        debug!(document_id = id, "Stored generated document");
        Ok(GeneratedDocumentId::new(id))
    }

    async fn set_archive_id(&self, id: GeneratedDocumentId, archive_id: &str) -> Result<(), PortError> {
        Ok(self.documents.set_archive_id(id.get(), archive_id).await?)
    }
}

#[async_trait]
impl RecipientDirectory for PostgresDocumentAdapter {
    async fn recipients(&self, entity: BillingEntityId) -> Result<Vec<String>, PortError> {
        Ok(self.documents.recipients(entity.get()).await?)
    }
}

fn transformation(error: impl std::fmt::Display) -> PortError {
    PortError::Transformation {
        message: error.to_string(),
    }
}

fn row_to_job(row: JobRow) -> Result<DocumentJob, PortError> {
    Ok(DocumentJob {
        id: DocumentJobId::new(row.id),
        target_document_id: row.target_document_id,
        document_number: row.document_number,
        status: JobStatus::from_str(&row.status).map_err(transformation)?,
        attempts: u32::try_from(row.attempts).map_err(transformation)?,
        run_after: row.run_after,
        last_error: row.last_error,
        payload: row.payload,
        claimed_at: row.claimed_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_failure(row: FailedJobRow) -> FailedJobSummary {
    FailedJobSummary {
        id: DocumentJobId::new(row.id),
        attempts: u32::try_from(row.attempts).unwrap_or(0),
        last_error: row.last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, attempts: i32) -> JobRow {
        let now = Utc::now();
        JobRow {
            id: 5,
            target_document_id: 77,
            document_number: Some("1001".to_string()),
            status: status.to_string(),
            attempts,
            run_after: now,
            last_error: None,
            payload: serde_json::json!({}),
            claimed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_to_job() {
        let job = row_to_job(row("processing", 2)).unwrap();
        assert_eq!(job.id, DocumentJobId::new(5));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn test_unknown_status_is_transformation_error() {
        let result = row_to_job(row("paused", 0));
        assert!(matches!(result, Err(PortError::Transformation { .. })));
    }

    #[test]
    fn test_negative_attempts_rejected() {
        assert!(row_to_job(row("queued", -1)).is_err());
    }
}
