//! Document Domain - Durable Worklog Job Queue
//!
//! Turns a settled invoice batch into a rendered worklog, stores it, pushes
//! it to the external accounting archive and mails it to the customer.
//!
//! # Job lifecycle
//!
//! ```text
//! queued ──claim──▶ processing ──ok──▶ done
//!   ▲                   │
//!   └──failure (< max)──┤
//!                       └──failure (>= max)──▶ failed
//! ```
//!
//! Claims are exclusive across processes (skip-locked read in the store).
//! Within one process a single [`Drainer`] task owns the claim loop;
//! enqueuers wake it through a [`DrainTrigger`].
//!
//! # Example
//!
//! ```rust,ignore
//! let worker = Arc::new(DocumentWorker::new(queue.clone(), documents, gateway, renderer));
//! let drainer = Drainer::new(worker).spawn();
//! let jobs = DocumentJobQueue::new(queue).with_trigger(drainer.trigger());
//!
//! let summary = jobs.enqueue(items).await?;
//! ```

pub mod adapters;
pub mod document;
pub mod drainer;
pub mod error;
pub mod job;
pub mod ports;
pub mod queue;
pub mod renderer;
pub mod worker;

pub use document::{content_hash, worklog_file_name, DocumentUpsert, GeneratedDocument, RenderedDocument};
pub use drainer::{DrainHandle, DrainTrigger, Drainer};
pub use error::DocumentError;
pub use job::{
    DocumentJob, FailedJobSummary, FailureTransition, JobPayload, JobStatus, Language,
    NewDocumentJob, QueueCounts, RetryPolicy, WorklogRow, MAX_ATTEMPTS,
};
pub use ports::{
    AccountingGateway, DocumentRenderer, DocumentStore, InvoiceDraft, InvoiceDraftLine, JobQueue,
    MailAttachment, MailMessage, MailSender, RecipientDirectory,
};
pub use queue::{DocumentJobQueue, EnqueueItem, EnqueueSummary, QueueStatus};
pub use renderer::HtmlWorklogRenderer;
pub use worker::{DocumentWorker, DrainReport, JobOutcome};
