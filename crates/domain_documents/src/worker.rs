//! Document worker
//!
//! Claims one due job at a time and runs it outside the claim transaction:
//! decode, render, store, upload and attach, mark done, then mail. A failure
//! anywhere before `done` goes through the retry policy; a mail failure after
//! `done` is only logged. Both queue writes carry the claim stamp; when the
//! job was swept and reclaimed meanwhile the write is dropped and logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use core_kernel::{DocumentJobId, GeneratedDocumentId, PortError};

use crate::document::{worklog_file_name, DocumentUpsert, RenderedDocument};
use crate::error::DocumentError;
use crate::job::{DocumentJob, FailureTransition, JobPayload, RetryPolicy};
use crate::ports::{
    AccountingGateway, DocumentRenderer, DocumentStore, JobQueue, MailAttachment, MailMessage,
    MailSender, RecipientDirectory,
};

/// Jobs left `processing` longer than this are presumed abandoned
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(15 * 60);

/// Result of running one claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done { job_id: DocumentJobId, mailed: bool },
    Requeued { job_id: DocumentJobId, attempts: u32 },
    Failed { job_id: DocumentJobId, attempts: u32 },
    /// The job was reclaimed by another worker before this one finished
    ClaimLost { job_id: DocumentJobId },
}

/// Totals of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: u32,
    pub done: u32,
    pub requeued: u32,
    pub failed: u32,
    pub claim_lost: u32,
}

impl DrainReport {
    fn record(&mut self, outcome: &JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Done { .. } => self.done += 1,
            JobOutcome::Requeued { .. } => self.requeued += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::ClaimLost { .. } => self.claim_lost += 1,
        }
    }
}

struct Processed {
    payload: JobPayload,
    file_name: String,
    rendered: RenderedDocument,
}

struct Mailer {
    sender: Arc<dyn MailSender>,
    recipients: Arc<dyn RecipientDirectory>,
}

/// Runs document jobs against the queue and collaborators
pub struct DocumentWorker {
    queue: Arc<dyn JobQueue>,
    documents: Arc<dyn DocumentStore>,
    gateway: Arc<dyn AccountingGateway>,
    renderer: Arc<dyn DocumentRenderer>,
    mailer: Option<Mailer>,
    policy: RetryPolicy,
    stale_after: Duration,
}

impl DocumentWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        documents: Arc<dyn DocumentStore>,
        gateway: Arc<dyn AccountingGateway>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> Self {
        Self {
            queue,
            documents,
            gateway,
            renderer,
            mailer: None,
            policy: RetryPolicy::default(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Enables best-effort mail delivery after a job is done
    pub fn with_mail(
        mut self,
        sender: Arc<dyn MailSender>,
        recipients: Arc<dyn RecipientDirectory>,
    ) -> Self {
        self.mailer = Some(Mailer { sender, recipients });
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Claims and runs the next due job; `None` when nothing was picked
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, DocumentError> {
        let claimed = self
            .queue
            .claim_next(Utc::now())
            .await
            .map_err(DocumentError::Queue)?;

        match claimed {
            Some(job) => Ok(Some(self.run(job).await?)),
            None => Ok(None),
        }
    }

    /// Processes jobs until a claim picks nothing
    pub async fn drain(&self) -> Result<DrainReport, DocumentError> {
        let mut report = DrainReport::default();
        while let Some(outcome) = self.process_next().await? {
            report.record(&outcome);
        }
        if report.processed > 0 {
            info!(
                processed = report.processed,
                done = report.done,
                requeued = report.requeued,
                failed = report.failed,
                claim_lost = report.claim_lost,
                "Drain pass finished"
            );
        }
        Ok(report)
    }

    /// Returns abandoned `processing` jobs to the queue
    pub async fn sweep_stale(&self) -> Result<u64, DocumentError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| DocumentError::validation(e.to_string()))?;
        let requeued = self
            .queue
            .requeue_stale(Utc::now() - stale_after)
            .await
            .map_err(DocumentError::Queue)?;
        if requeued > 0 {
            warn!(requeued, "Requeued stale processing jobs");
        }
        Ok(requeued)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, attempts = job.attempts))]
    async fn run(&self, job: DocumentJob) -> Result<JobOutcome, DocumentError> {
        let claimed_at = job.claimed_at.ok_or_else(|| {
            DocumentError::Queue(PortError::internal(format!("claimed job {} has no claim stamp", job.id)))
        })?;

        match self.process(&job).await {
            Ok(processed) => {
                let marked = self
                    .queue
                    .mark_done(job.id, claimed_at)
                    .await
                    .map_err(DocumentError::Queue)?;
                if !marked {
                    warn!(%claimed_at, "Lost claim before marking done; skipping mail");
                    return Ok(JobOutcome::ClaimLost { job_id: job.id });
                }
                info!(target_document_id = job.target_document_id, "Document job done");
                let mailed = self.deliver(&job, &processed).await;
                Ok(JobOutcome::Done { job_id: job.id, mailed })
            }
            Err(failure) => {
                let transition = self.policy.after_failure(job.attempts, Utc::now());
                let message = failure.to_string();
                let recorded = self
                    .queue
                    .record_failure(job.id, claimed_at, transition, &message)
                    .await
                    .map_err(DocumentError::Queue)?;
                if !recorded {
                    warn!(%claimed_at, error = %message, "Lost claim before recording failure");
                    return Ok(JobOutcome::ClaimLost { job_id: job.id });
                }

                match transition {
                    FailureTransition::Requeue { attempts, run_after } => {
                        warn!(
                            attempts,
                            %run_after,
                            transient = failure.is_transient(),
                            error = %message,
                            "Document job failed, requeued"
                        );
                        Ok(JobOutcome::Requeued { job_id: job.id, attempts })
                    }
                    FailureTransition::Fail { attempts } => {
                        error!(attempts, error = %message, "Document job failed permanently");
                        Ok(JobOutcome::Failed { job_id: job.id, attempts })
                    }
                }
            }
        }
    }

    async fn process(&self, job: &DocumentJob) -> Result<Processed, DocumentError> {
        let payload = job.decode_payload()?;
        let rendered = self.renderer.render(&payload)?;

        let reference = job
            .document_number
            .clone()
            .unwrap_or_else(|| job.target_document_id.to_string());
        let file_name = worklog_file_name(&reference, &payload.period);

        let document_id = self
            .documents
            .upsert(&DocumentUpsert {
                target_document_id: job.target_document_id,
                document_number: job.document_number.clone(),
                billing_entity_id: payload.billing_entity_id,
                period: payload.period,
                file_name: file_name.clone(),
                rendered: rendered.clone(),
            })
            .await
            .map_err(DocumentError::Storage)?;
        debug!(%document_id, file_name = %file_name, "Stored generated document");

        if let Some(number) = job.document_number.as_deref() {
            self.publish(document_id, number, &file_name, &rendered).await?;
        }

        Ok(Processed {
            payload,
            file_name,
            rendered,
        })
    }

    async fn publish(
        &self,
        document_id: GeneratedDocumentId,
        document_number: &str,
        file_name: &str,
        rendered: &RenderedDocument,
    ) -> Result<(), DocumentError> {
        let archive_id = self
            .gateway
            .upload_document(rendered.bytes.clone(), file_name, &rendered.mime)
            .await
            .map_err(DocumentError::Gateway)?;
        self.gateway
            .attach_document(&archive_id, document_number, true)
            .await
            .map_err(DocumentError::Gateway)?;
        self.documents
            .set_archive_id(document_id, &archive_id)
            .await
            .map_err(DocumentError::Storage)?;
        debug!(document_number, archive_id = %archive_id, "Attached worklog to invoice");
        Ok(())
    }

    /// Sends the document to configured recipients; never fails the job
    async fn deliver(&self, job: &DocumentJob, processed: &Processed) -> bool {
        let Some(mailer) = &self.mailer else {
            return false;
        };

        let entity = processed.payload.billing_entity_id;
        let to = match mailer.recipients.recipients(entity).await {
            Ok(to) if !to.is_empty() => to,
            Ok(_) => return false,
            Err(e) => {
                warn!(%entity, error = %e, "Recipient lookup failed, skipping mail");
                return false;
            }
        };

        let reference = job
            .document_number
            .as_deref()
            .map(|n| format!(" {}", n))
            .unwrap_or_default();
        let message = MailMessage {
            to,
            subject: format!("Worklog{} {}", reference, processed.payload.customer_name),
            body: format!(
                "Attached is the worklog for {} – {}.",
                processed.payload.period.start, processed.payload.period.end
            ),
            attachment: MailAttachment {
                file_name: processed.file_name.clone(),
                mime: processed.rendered.mime.clone(),
                bytes: processed.rendered.bytes.clone(),
            },
        };

        match mailer.sender.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%entity, error = %e, "Worklog mail failed; job stays done");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use core_kernel::{BillingEntityId, DateWindow};
    use crate::job::{JobStatus, NewDocumentJob, WorklogRow};
    use crate::ports::mock::{
        InMemoryDocumentStore, InMemoryJobQueue, MockAccountingGateway, RecordingMailSender,
        StaticRecipientDirectory,
    };
    use crate::ports::JobQueue;
    use crate::renderer::HtmlWorklogRenderer;

    struct Harness {
        queue: Arc<InMemoryJobQueue>,
        documents: Arc<InMemoryDocumentStore>,
        gateway: Arc<MockAccountingGateway>,
        mail: Arc<RecordingMailSender>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: Arc::new(InMemoryJobQueue::new()),
                documents: Arc::new(InMemoryDocumentStore::new()),
                gateway: Arc::new(MockAccountingGateway::new()),
                mail: Arc::new(RecordingMailSender::new()),
            }
        }

        fn with_slow_uploads(delay: Duration) -> Self {
            Self {
                gateway: Arc::new(MockAccountingGateway::new().with_delay(delay)),
                ..Self::new()
            }
        }

        fn worker(&self) -> DocumentWorker {
            let recipients = StaticRecipientDirectory::new()
                .with(BillingEntityId::new(5), "billing@acme.test");
            DocumentWorker::new(
                self.queue.clone(),
                self.documents.clone(),
                self.gateway.clone(),
                Arc::new(HtmlWorklogRenderer::new()),
            )
            .with_mail(self.mail.clone(), Arc::new(recipients))
            .with_retry_policy(RetryPolicy {
                backoff_base: Duration::ZERO,
                ..RetryPolicy::default()
            })
        }
    }

    fn job(target: i64, number: Option<&str>) -> NewDocumentJob {
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        NewDocumentJob {
            target_document_id: target,
            document_number: number.map(str::to_string),
            payload: JobPayload {
                customer_name: "Acme".to_string(),
                rows: vec![WorklogRow {
                    date: day,
                    description: "Service visit".to_string(),
                    hours: dec!(2.5),
                    user_name: None,
                    project: None,
                }],
                period: DateWindow::new(day, day).unwrap(),
                billing_entity_id: BillingEntityId::new(5),
                language: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_successful_job_is_stored_attached_and_mailed() {
        let h = Harness::new();
        let ids = h.queue.enqueue(&[job(77, Some("1042"))]).await.unwrap();

        let outcome = h.worker().process_next().await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Done { job_id: ids[0], mailed: true }));

        let stored = h.documents.by_target(77).await.unwrap();
        assert_eq!(stored.file_name, "worklog-1042-2024-03-04_2024-03-04.html");
        assert_eq!(stored.mime, "text/html");
        assert_eq!(stored.external_archive_id.as_deref(), Some("archive-1"));

        let calls = h.gateway.calls().await;
        assert_eq!(calls.attachments, vec![("archive-1".to_string(), "1042".to_string(), true)]);

        let sent = h.mail.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["billing@acme.test".to_string()]);

        assert_eq!(h.queue.job(ids[0]).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_job_without_document_number_skips_upload() {
        let h = Harness::new();
        h.queue.enqueue(&[job(78, None)]).await.unwrap();

        h.worker().drain().await.unwrap();

        let stored = h.documents.by_target(78).await.unwrap();
        assert_eq!(stored.file_name, "worklog-78-2024-03-04_2024-03-04.html");
        assert!(stored.external_archive_id.is_none());
        assert!(h.gateway.calls().await.uploads.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_fails_after_three_attempts() {
        let h = Harness::new();
        h.gateway.set_unavailable(true);
        let ids = h.queue.enqueue(&[job(79, Some("1043"))]).await.unwrap();
        let worker = h.worker();

        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Requeued { attempts: 1, .. })
        ));
        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Requeued { attempts: 2, .. })
        ));
        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Failed { attempts: 3, .. })
        ));
        assert_eq!(worker.process_next().await.unwrap(), None);

        let failed = h.queue.job(ids[0]).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.last_error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn test_requeued_job_waits_for_backoff() {
        let h = Harness::new();
        h.gateway.set_unavailable(true);
        let ids = h.queue.enqueue(&[job(80, Some("1044"))]).await.unwrap();
        let worker = h.worker().with_retry_policy(RetryPolicy::default());

        worker.process_next().await.unwrap();

        let requeued = h.queue.job(ids[0]).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.attempts, 1);
        assert!(requeued.run_after > Utc::now());
        assert_eq!(worker.process_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_job_done() {
        let h = Harness::new();
        h.mail.set_failing(true);
        let ids = h.queue.enqueue(&[job(81, Some("1045"))]).await.unwrap();

        let outcome = h.worker().process_next().await.unwrap();

        assert_eq!(outcome, Some(JobOutcome::Done { job_id: ids[0], mailed: false }));
        assert_eq!(h.queue.job(ids[0]).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_reprocessing_overwrites_document() {
        let h = Harness::new();
        h.queue.enqueue(&[job(82, None), job(82, None)]).await.unwrap();

        let report = h.worker().drain().await.unwrap();

        assert_eq!(report.done, 2);
        assert_eq!(h.documents.len().await, 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_counts_as_failure() {
        let h = Harness::new();
        let ids = h.queue.enqueue(&[job(83, None)]).await.unwrap();
        let mut broken = h.queue.job(ids[0]).await.unwrap();
        broken.payload = serde_json::json!({ "unexpected": true });
        h.queue.put(broken).await;

        let outcome = h.worker().process_next().await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Requeued { attempts: 1, .. })));
        let job = h.queue.job(ids[0]).await.unwrap();
        assert!(job.last_error.unwrap().contains("Payload decode error"));
    }

    #[tokio::test]
    async fn test_stale_processing_job_is_reclaimed() {
        let h = Harness::new();
        let ids = h.queue.enqueue(&[job(84, None)]).await.unwrap();
        let mut abandoned = h.queue.job(ids[0]).await.unwrap();
        abandoned.status = JobStatus::Processing;
        abandoned.claimed_at = Some(Utc::now() - chrono::Duration::hours(1));
        h.queue.put(abandoned).await;

        let worker = h.worker();
        assert_eq!(worker.process_next().await.unwrap(), None);

        assert_eq!(worker.sweep_stale().await.unwrap(), 1);
        let reclaimed = h.queue.job(ids[0]).await.unwrap();
        assert_eq!(reclaimed.status, JobStatus::Queued);
        assert_eq!(reclaimed.attempts, 0);

        assert!(matches!(
            worker.process_next().await.unwrap(),
            Some(JobOutcome::Done { .. })
        ));
    }

    #[tokio::test]
    async fn test_fresh_processing_job_is_not_swept() {
        let h = Harness::new();
        h.queue.enqueue(&[job(85, None)]).await.unwrap();
        h.queue.claim_next(Utc::now()).await.unwrap();

        assert_eq!(h.worker().sweep_stale().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reclaimed_job_is_left_to_the_new_claimant() {
        let h = Harness::with_slow_uploads(Duration::from_millis(300));
        let ids = h.queue.enqueue(&[job(86, Some("1046"))]).await.unwrap();

        let slow = h.worker();
        let running = tokio::spawn(async move { slow.process_next().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let later = Utc::now() + chrono::Duration::minutes(20);
        assert_eq!(h.queue.requeue_stale(later).await.unwrap(), 1);
        let second = h.queue.claim_next(later).await.unwrap().unwrap();
        assert!(h.queue.mark_done(second.id, second.claimed_at.unwrap()).await.unwrap());

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, Some(JobOutcome::ClaimLost { job_id: ids[0] }));
        assert_eq!(h.queue.job(ids[0]).await.unwrap().status, JobStatus::Done);
        assert!(h.mail.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_late_failure_after_reclaim_is_dropped() {
        let h = Harness::with_slow_uploads(Duration::from_millis(300));
        let ids = h.queue.enqueue(&[job(87, Some("1047"))]).await.unwrap();

        let slow = h.worker();
        let running = tokio::spawn(async move { slow.process_next().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.gateway.set_unavailable(true);

        let later = Utc::now() + chrono::Duration::minutes(20);
        h.queue.requeue_stale(later).await.unwrap();
        let second = h.queue.claim_next(later).await.unwrap().unwrap();
        assert!(h.queue.mark_done(second.id, second.claimed_at.unwrap()).await.unwrap());

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, Some(JobOutcome::ClaimLost { job_id: ids[0] }));
        let job = h.queue.job(ids[0]).await.unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.is_none());
    }
}
