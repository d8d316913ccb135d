//! Enqueue and status operations on the document queue

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use core_kernel::{BillingEntityId, DateWindow, DocumentJobId};

use crate::drainer::DrainTrigger;
use crate::error::DocumentError;
use crate::job::{FailedJobSummary, JobPayload, Language, NewDocumentJob, QueueCounts, WorklogRow};
use crate::ports::JobQueue;

/// Failed jobs listed by [`DocumentJobQueue::status`]
pub const RECENT_FAILURES: usize = 20;

/// Unvalidated enqueue request item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueItem {
    pub invoice_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub customer_name: Option<String>,
    pub rows: Vec<WorklogRow>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
    pub company_id: Option<i64>,
    pub language: Option<Language>,
}

impl EnqueueItem {
    /// Checks the item and builds the job to insert
    pub fn validate(self) -> Result<NewDocumentJob, DocumentError> {
        let target_document_id = self
            .invoice_id
            .filter(|id| *id > 0)
            .ok_or_else(|| DocumentError::validation("invoiceId must be positive"))?;
        if self.rows.is_empty() {
            return Err(DocumentError::validation("rows must not be empty"));
        }
        let (Some(from), Some(to)) = (self.period_from, self.period_to) else {
            return Err(DocumentError::validation("period.from and period.to are required"));
        };
        let period = DateWindow::new(from, to)?;
        let billing_entity_id = self
            .company_id
            .map(BillingEntityId::new)
            .filter(BillingEntityId::is_valid)
            .ok_or_else(|| DocumentError::validation("companyId is required"))?;

        Ok(NewDocumentJob {
            target_document_id,
            document_number: self
                .invoice_number
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            payload: JobPayload {
                customer_name: self.customer_name.unwrap_or_default(),
                rows: self.rows,
                period,
                billing_entity_id,
                language: self.language.unwrap_or_default(),
            },
        })
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueSummary {
    pub queued: usize,
    pub rejected: usize,
    #[serde(skip)]
    pub job_ids: Vec<DocumentJobId>,
}

/// Counts plus recent terminal failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    #[serde(flatten)]
    pub counts: QueueCounts,
    pub recent_failures: Vec<FailedJobSummary>,
}

/// Front door of the document queue
#[derive(Clone)]
pub struct DocumentJobQueue {
    queue: Arc<dyn JobQueue>,
    trigger: Option<DrainTrigger>,
}

impl DocumentJobQueue {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue, trigger: None }
    }

    /// Pokes this drain trigger after every successful enqueue
    pub fn with_trigger(mut self, trigger: DrainTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Validates and inserts items; invalid items are counted, not inserted
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn enqueue(&self, items: Vec<EnqueueItem>) -> Result<EnqueueSummary, DocumentError> {
        let mut jobs = Vec::with_capacity(items.len());
        let mut rejected = 0;
        for item in items {
            match item.validate() {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(error = %e, "Rejected document job");
                    rejected += 1;
                }
            }
        }

        let job_ids = self.enqueue_jobs(&jobs).await?;
        Ok(EnqueueSummary {
            queued: job_ids.len(),
            rejected,
            job_ids,
        })
    }

    /// Inserts already validated jobs
    pub async fn enqueue_jobs(&self, jobs: &[NewDocumentJob]) -> Result<Vec<DocumentJobId>, DocumentError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.queue.enqueue(jobs).await.map_err(DocumentError::Queue)?;
        info!(queued = ids.len(), "Document jobs queued");
        self.poke();
        Ok(ids)
    }

    pub async fn status(&self) -> Result<QueueStatus, DocumentError> {
        let counts = self.queue.counts().await.map_err(DocumentError::Queue)?;
        let recent_failures = self
            .queue
            .recent_failures(RECENT_FAILURES)
            .await
            .map_err(DocumentError::Queue)?;
        Ok(QueueStatus {
            counts,
            recent_failures,
        })
    }

    /// Operator retry of a terminally failed job
    #[instrument(skip(self))]
    pub async fn retry(&self, id: DocumentJobId) -> Result<(), DocumentError> {
        let requeued = self.queue.retry_failed(id).await.map_err(DocumentError::Queue)?;
        if !requeued {
            return Err(DocumentError::JobNotFound(id));
        }
        info!(job_id = %id, "Failed document job requeued by operator");
        self.poke();
        Ok(())
    }

    fn poke(&self) {
        if let Some(trigger) = &self.trigger {
            trigger.poke();
        }
    }
}
