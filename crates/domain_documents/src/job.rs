//! Document jobs
//!
//! A job moves through `queued → processing → done`, or back to `queued` with
//! a later `run_after` after a failure, until the attempt limit turns it into
//! a terminal `failed`. Jobs are never deleted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{BillingEntityId, DateWindow, DocumentJobId};

use crate::error::DocumentError;

/// Attempts before a job becomes terminally failed
pub const MAX_ATTEMPTS: u32 = 3;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    /// Terminal; only an operator retry leaves this state
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DocumentError::validation(format!("unknown job status '{}'", other))),
        }
    }
}

/// Headings language of the rendered worklog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Sv,
    En,
}

/// One row of the worklog attached to an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogRow {
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    pub hours: Decimal,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

/// Persisted job payload
///
/// Stored as JSON; its shape must keep decoding across worker restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub customer_name: String,
    pub rows: Vec<WorklogRow>,
    pub period: DateWindow,
    pub billing_entity_id: BillingEntityId,
    #[serde(default)]
    pub language: Language,
}

impl JobPayload {
    pub fn total_hours(&self) -> Decimal {
        self.rows.iter().map(|r| r.hours).sum()
    }
}

/// A persisted job row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub id: DocumentJobId,
    /// Accounting document the output belongs to
    pub target_document_id: i64,
    /// `None` until an invoice exists
    pub document_number: Option<String>,
    pub status: JobStatus,
    pub attempts: u32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentJob {
    /// Decodes the stored payload
    pub fn decode_payload(&self) -> Result<JobPayload, DocumentError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Returns true when a worker may claim the job at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.run_after <= now
    }

    /// Whether the job is still `processing` under this claim stamp
    pub fn holds_claim(&self, claimed_at: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.claimed_at == Some(claimed_at)
    }
}

/// A validated job ready to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocumentJob {
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub payload: JobPayload,
}

impl NewDocumentJob {
    pub fn encoded_payload(&self) -> Result<serde_json::Value, DocumentError> {
        Ok(serde_json::to_value(&self.payload)?)
    }
}

/// What a failed attempt turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to `queued`, not claimable before `run_after`
    Requeue {
        attempts: u32,
        run_after: DateTime<Utc>,
    },
    /// Terminal `failed`
    Fail { attempts: u32 },
}

impl FailureTransition {
    pub fn attempts(&self) -> u32 {
        match self {
            FailureTransition::Requeue { attempts, .. } | FailureTransition::Fail { attempts } => {
                *attempts
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            FailureTransition::Requeue { .. } => JobStatus::Queued,
            FailureTransition::Fail { .. } => JobStatus::Failed,
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given attempt count
    ///
    /// `base * 2^(attempts - 1)`, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    /// Decides the next state after a failed attempt
    pub fn after_failure(&self, previous_attempts: u32, now: DateTime<Utc>) -> FailureTransition {
        let attempts = previous_attempts.saturating_add(1);
        if attempts >= self.max_attempts {
            return FailureTransition::Fail { attempts };
        }
        let delay = chrono::Duration::from_std(self.backoff(attempts))
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        FailureTransition::Requeue {
            attempts,
            run_after: now + delay,
        }
    }
}

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Operator view of a terminally failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobSummary {
    pub id: DocumentJobId,
    pub attempts: u32,
    pub last_error: Option<String>,
}
