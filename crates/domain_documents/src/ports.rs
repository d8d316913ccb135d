//! Document Domain Ports
//!
//! The queue table, the document table and three remote collaborators
//! (accounting system, mail, recipient lookup). `infra_db` implements the
//! stores; `adapters` holds the HTTP clients.
//!
//! # Claim contract
//!
//! `JobQueue::claim_next` must be exclusive across every process sharing the
//! table: pick the lowest-id due `queued` job with a locking read that skips
//! rows another claimant holds, mark it `processing`, commit. Never a plain
//! read followed by an update.
//!
//! `mark_done` and `record_failure` are fenced by the claim stamp: they only
//! touch a job that is still `processing` under the same `claimed_at`. A job
//! swept back to the queue and reclaimed elsewhere answers `false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{
    ArticleId, BillingEntityId, DateWindow, DocumentJobId, DomainPort, GeneratedDocumentId,
    PortError,
};

use crate::document::{DocumentUpsert, RenderedDocument};
use crate::error::DocumentError;
use crate::job::{DocumentJob, FailedJobSummary, FailureTransition, JobPayload, NewDocumentJob, QueueCounts};

/// Durable job table
#[async_trait]
pub trait JobQueue: DomainPort {
    /// Inserts jobs as `queued`, due immediately
    async fn enqueue(&self, jobs: &[NewDocumentJob]) -> Result<Vec<DocumentJobId>, PortError>;

    /// Claims the next due job, stamping `claimed_at = now`
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<DocumentJob>, PortError>;

    /// Marks a claimed job done; `false` when the claim was lost
    async fn mark_done(&self, id: DocumentJobId, claimed_at: DateTime<Utc>) -> Result<bool, PortError>;

    /// Applies a failure transition and records the error text
    ///
    /// `false` when the claim was lost and nothing was written.
    async fn record_failure(
        &self,
        id: DocumentJobId,
        claimed_at: DateTime<Utc>,
        transition: FailureTransition,
        error: &str,
    ) -> Result<bool, PortError>;

    /// Returns `processing` jobs claimed before the cutoff to `queued`
    ///
    /// Attempts are left unchanged.
    async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, PortError>;

    async fn counts(&self) -> Result<QueueCounts, PortError>;

    /// Most recently updated failed jobs
    async fn recent_failures(&self, limit: usize) -> Result<Vec<FailedJobSummary>, PortError>;

    /// Returns a `failed` job to `queued` with attempts reset
    ///
    /// `false` when no failed job has that id.
    async fn retry_failed(&self, id: DocumentJobId) -> Result<bool, PortError>;
}

/// Generated document table
#[async_trait]
pub trait DocumentStore: DomainPort {
    /// Inserts or overwrites the document for `target_document_id`
    async fn upsert(&self, document: &DocumentUpsert) -> Result<GeneratedDocumentId, PortError>;

    async fn set_archive_id(&self, id: GeneratedDocumentId, archive_id: &str) -> Result<(), PortError>;
}

/// One line of an invoice draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraftLine {
    pub description: String,
    pub quantity: Decimal,
    pub article_id: Option<ArticleId>,
}

/// Invoice to create in the accounting system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDraft {
    /// Bill target resolved for the entity
    pub customer_number: String,
    pub period: DateWindow,
    pub lines: Vec<InvoiceDraftLine>,
}

/// External accounting system
#[async_trait]
pub trait AccountingGateway: DomainPort {
    /// Creates an invoice and returns its document number
    async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<String, PortError>;

    /// Uploads a file to the archive and returns its archive id
    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<String, PortError>;

    async fn attach_document(
        &self,
        archive_id: &str,
        document_number: &str,
        include_on_send: bool,
    ) -> Result<(), PortError>;
}

/// Pure document rendering
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, payload: &JobPayload) -> Result<RenderedDocument, DocumentError>;
}

/// File attached to an outgoing mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Outgoing mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: MailAttachment,
}

/// Mail transport
#[async_trait]
pub trait MailSender: DomainPort {
    async fn send(&self, message: &MailMessage) -> Result<(), PortError>;
}

/// Recipient addresses configured per billing entity
#[async_trait]
pub trait RecipientDirectory: DomainPort {
    async fn recipients(&self, entity: BillingEntityId) -> Result<Vec<String>, PortError>;
}

/// In-memory implementations for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    use core_kernel::{HealthCheckResult, HealthCheckable};
    use crate::document::GeneratedDocument;
    use crate::job::JobStatus;

    #[derive(Debug, Default)]
    struct QueueState {
        jobs: BTreeMap<DocumentJobId, DocumentJob>,
        next_id: i64,
    }

    /// In-memory job table
    ///
    /// Every operation runs under one mutex, so a claim is exclusive the same
    /// way a skip-locked read is.
    #[derive(Debug, Default)]
    pub struct InMemoryJobQueue {
        state: Mutex<QueueState>,
    }

    impl InMemoryJobQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn job(&self, id: DocumentJobId) -> Option<DocumentJob> {
            self.state.lock().await.jobs.get(&id).cloned()
        }

        pub async fn jobs(&self) -> Vec<DocumentJob> {
            self.state.lock().await.jobs.values().cloned().collect()
        }

        /// Overwrites a job row, for setting up stale or failed states
        pub async fn put(&self, job: DocumentJob) {
            self.state.lock().await.jobs.insert(job.id, job);
        }
    }

    impl DomainPort for InMemoryJobQueue {}

    #[async_trait]
    impl JobQueue for InMemoryJobQueue {
        async fn enqueue(&self, jobs: &[NewDocumentJob]) -> Result<Vec<DocumentJobId>, PortError> {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            let mut ids = Vec::with_capacity(jobs.len());
            for job in jobs {
                let payload = job
                    .encoded_payload()
                    .map_err(|e| PortError::Transformation { message: e.to_string() })?;
                state.next_id += 1;
                let id = DocumentJobId::new(state.next_id);
                state.jobs.insert(
                    id,
                    DocumentJob {
                        id,
                        target_document_id: job.target_document_id,
                        document_number: job.document_number.clone(),
                        status: JobStatus::Queued,
                        attempts: 0,
                        run_after: now,
                        last_error: None,
                        payload,
                        claimed_at: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
                ids.push(id);
            }
            Ok(ids)
        }

        async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<DocumentJob>, PortError> {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.values_mut().find(|j| j.is_due(now)) else {
                return Ok(None);
            };
            job.status = JobStatus::Processing;
            job.claimed_at = Some(now);
            job.updated_at = now;
            Ok(Some(job.clone()))
        }

        async fn mark_done(&self, id: DocumentJobId, claimed_at: DateTime<Utc>) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.get_mut(&id).filter(|j| j.holds_claim(claimed_at)) else {
                return Ok(false);
            };
            job.status = JobStatus::Done;
            job.last_error = None;
            job.updated_at = Utc::now();
            Ok(true)
        }

        async fn record_failure(
            &self,
            id: DocumentJobId,
            claimed_at: DateTime<Utc>,
            transition: FailureTransition,
            error: &str,
        ) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.get_mut(&id).filter(|j| j.holds_claim(claimed_at)) else {
                return Ok(false);
            };
            job.status = transition.status();
            job.attempts = transition.attempts();
            job.last_error = Some(error.to_string());
            job.claimed_at = None;
            if let FailureTransition::Requeue { run_after, .. } = transition {
                job.run_after = run_after;
            }
            job.updated_at = Utc::now();
            Ok(true)
        }

        async fn requeue_stale(&self, claimed_before: DateTime<Utc>) -> Result<u64, PortError> {
            let mut state = self.state.lock().await;
            let mut count = 0;
            for job in state.jobs.values_mut() {
                let stale = job.status == JobStatus::Processing
                    && job.claimed_at.is_some_and(|at| at < claimed_before);
                if stale {
                    job.status = JobStatus::Queued;
                    job.claimed_at = None;
                    job.updated_at = Utc::now();
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn counts(&self) -> Result<QueueCounts, PortError> {
            let state = self.state.lock().await;
            let mut counts = QueueCounts::default();
            for job in state.jobs.values() {
                counts.add(job.status, 1);
            }
            Ok(counts)
        }

        async fn recent_failures(&self, limit: usize) -> Result<Vec<FailedJobSummary>, PortError> {
            let state = self.state.lock().await;
            let mut failed: Vec<&DocumentJob> = state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Failed)
                .collect();
            failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
            Ok(failed
                .into_iter()
                .take(limit)
                .map(|j| FailedJobSummary {
                    id: j.id,
                    attempts: j.attempts,
                    last_error: j.last_error.clone(),
                })
                .collect())
        }

        async fn retry_failed(&self, id: DocumentJobId) -> Result<bool, PortError> {
            let mut state = self.state.lock().await;
            match state.jobs.get_mut(&id) {
                Some(job) if job.status == JobStatus::Failed => {
                    let now = Utc::now();
                    job.status = JobStatus::Queued;
                    job.attempts = 0;
                    job.run_after = now;
                    job.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    /// In-memory document table keyed by target document id
    #[derive(Debug, Default)]
    pub struct InMemoryDocumentStore {
        documents: Mutex<HashMap<i64, GeneratedDocument>>,
        next_id: AtomicUsize,
    }

    impl InMemoryDocumentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn by_target(&self, target_document_id: i64) -> Option<GeneratedDocument> {
            self.documents.lock().await.get(&target_document_id).cloned()
        }

        pub async fn len(&self) -> usize {
            self.documents.lock().await.len()
        }
    }

    impl DomainPort for InMemoryDocumentStore {}

    #[async_trait]
    impl DocumentStore for InMemoryDocumentStore {
        async fn upsert(&self, document: &DocumentUpsert) -> Result<GeneratedDocumentId, PortError> {
            let mut documents = self.documents.lock().await;
            let id = match documents.get(&document.target_document_id) {
                Some(existing) => existing.id,
                None => GeneratedDocumentId::new(self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1),
            };
            documents.insert(
                document.target_document_id,
                GeneratedDocument {
                    id,
                    target_document_id: document.target_document_id,
                    document_number: document.document_number.clone(),
                    billing_entity_id: document.billing_entity_id,
                    period: document.period,
                    file_name: document.file_name.clone(),
                    mime: document.rendered.mime.clone(),
                    size_bytes: document.rendered.size_bytes() as i64,
                    content_hash: document.rendered.content_hash.clone(),
                    content: document.rendered.bytes.clone(),
                    external_archive_id: None,
                },
            );
            Ok(id)
        }

        async fn set_archive_id(&self, id: GeneratedDocumentId, archive_id: &str) -> Result<(), PortError> {
            let mut documents = self.documents.lock().await;
            let document = documents
                .values_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| PortError::not_found("GeneratedDocument", id))?;
            document.external_archive_id = Some(archive_id.to_string());
            Ok(())
        }
    }

    /// Recorded gateway calls
    #[derive(Debug, Default, Clone)]
    pub struct GatewayCalls {
        pub invoices: Vec<InvoiceDraft>,
        pub uploads: Vec<String>,
        pub attachments: Vec<(String, String, bool)>,
    }

    /// Scriptable accounting gateway
    #[derive(Debug, Default)]
    pub struct MockAccountingGateway {
        calls: Mutex<GatewayCalls>,
        unavailable: AtomicBool,
        reject_customers: Mutex<Vec<String>>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockAccountingGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Holds every upload for `delay`, tracking overlap
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Every call fails with `ServiceUnavailable`
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// `create_invoice` fails for this customer number
        pub async fn reject_customer(&self, customer_number: impl Into<String>) {
            self.reject_customers.lock().await.push(customer_number.into());
        }

        pub async fn calls(&self) -> GatewayCalls {
            self.calls.lock().await.clone()
        }

        /// Highest number of uploads that ran at the same time
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn check_available(&self) -> Result<(), PortError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(PortError::ServiceUnavailable {
                    service: "accounting".to_string(),
                });
            }
            Ok(())
        }
    }

    impl DomainPort for MockAccountingGateway {}

    #[async_trait]
    impl HealthCheckable for MockAccountingGateway {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("mock-accounting-gateway")
        }
    }

    #[async_trait]
    impl AccountingGateway for MockAccountingGateway {
        async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<String, PortError> {
            self.check_available()?;
            if self.reject_customers.lock().await.contains(&draft.customer_number) {
                return Err(PortError::validation_field("customer rejected", "customerNumber"));
            }
            let mut calls = self.calls.lock().await;
            calls.invoices.push(draft.clone());
            Ok((1000 + calls.invoices.len()).to_string())
        }

        async fn upload_document(
            &self,
            _bytes: Vec<u8>,
            file_name: &str,
            _mime: &str,
        ) -> Result<String, PortError> {
            self.check_available()?;
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut calls = self.calls.lock().await;
            calls.uploads.push(file_name.to_string());
            Ok(format!("archive-{}", calls.uploads.len()))
        }

        async fn attach_document(
            &self,
            archive_id: &str,
            document_number: &str,
            include_on_send: bool,
        ) -> Result<(), PortError> {
            self.check_available()?;
            self.calls.lock().await.attachments.push((
                archive_id.to_string(),
                document_number.to_string(),
                include_on_send,
            ));
            Ok(())
        }
    }

    /// Mail sender that records messages
    #[derive(Debug, Default)]
    pub struct RecordingMailSender {
        sent: Mutex<Vec<MailMessage>>,
        failing: AtomicBool,
    }

    impl RecordingMailSender {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub async fn sent(&self) -> Vec<MailMessage> {
            self.sent.lock().await.clone()
        }
    }

    impl DomainPort for RecordingMailSender {}

    #[async_trait]
    impl MailSender for RecordingMailSender {
        async fn send(&self, message: &MailMessage) -> Result<(), PortError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PortError::connection("mail relay refused connection"));
            }
            self.sent.lock().await.push(message.clone());
            Ok(())
        }
    }

    /// Fixed recipient lists
    #[derive(Debug, Default)]
    pub struct StaticRecipientDirectory {
        recipients: HashMap<BillingEntityId, Vec<String>>,
    }

    impl StaticRecipientDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, entity: BillingEntityId, address: impl Into<String>) -> Self {
            self.recipients.entry(entity).or_default().push(address.into());
            self
        }
    }

    impl DomainPort for StaticRecipientDirectory {}

    #[async_trait]
    impl RecipientDirectory for StaticRecipientDirectory {
        async fn recipients(&self, entity: BillingEntityId) -> Result<Vec<String>, PortError> {
            Ok(self.recipients.get(&entity).cloned().unwrap_or_default())
        }
    }
}
