//! Builder Patterns for Test Data
//!
//! Fluent builders for the rows the settlement core reads and the jobs the
//! document queue stores.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{
    ArticleId, BillingEntityId, CategoryId, DateWindow, DocumentJobId, MaterialItemId, ProjectId,
    TimeRecordId, UserId,
};
use domain_billing::{MaterialItem, TimeRecord};
use domain_documents::{DocumentJob, EnqueueItem, JobPayload, JobStatus, Language, WorklogRow};

use crate::fixtures::TemporalFixtures;

/// Builder for time records
pub struct TimeRecordBuilder {
    record: TimeRecord,
}

impl TimeRecordBuilder {
    /// An unbilled, billable one-hour record on 2024-03-04
    pub fn new(id: i64) -> Self {
        Self {
            record: TimeRecord {
                id: TimeRecordId::new(id),
                owner_user_id: UserId::new(7),
                billing_entity_id: None,
                project_id: None,
                category_id: None,
                category_name: None,
                date: TemporalFixtures::march(4),
                hours: Decimal::ONE,
                billable: true,
                billed: false,
                invoice_number: None,
                work_label: None,
                description: None,
            },
        }
    }

    pub fn owner(mut self, user: UserId) -> Self {
        self.record.owner_user_id = user;
        self
    }

    pub fn entity(mut self, entity: BillingEntityId) -> Self {
        self.record.billing_entity_id = Some(entity);
        self
    }

    pub fn project(mut self, project: i64) -> Self {
        self.record.project_id = Some(ProjectId::new(project));
        self
    }

    pub fn category(mut self, id: i64, name: impl Into<String>) -> Self {
        self.record.category_id = Some(CategoryId::new(id));
        self.record.category_name = Some(name.into());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.record.date = date;
        self
    }

    pub fn hours(mut self, hours: Decimal) -> Self {
        self.record.hours = hours;
        self
    }

    pub fn non_billable(mut self) -> Self {
        self.record.billable = false;
        self
    }

    /// Marks the record billed under an invoice number
    pub fn billed(mut self, invoice_number: impl Into<String>) -> Self {
        self.record.billed = true;
        self.record.invoice_number = Some(invoice_number.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.record.work_label = Some(label.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.record.description = Some(description.into());
        self
    }

    pub fn build(self) -> TimeRecord {
        self.record
    }
}

/// Builder for material items
pub struct MaterialItemBuilder {
    item: MaterialItem,
}

impl MaterialItemBuilder {
    /// A single custom item hanging off `parent`
    pub fn new(id: i64, parent: i64) -> Self {
        Self {
            item: MaterialItem {
                id: MaterialItemId::new(id),
                parent_time_record_id: TimeRecordId::new(parent),
                article_id: None,
                article_name: None,
                quantity: 1,
                description: "Material".to_string(),
                invoice_number: None,
            },
        }
    }

    pub fn article(mut self, id: i64, name: impl Into<String>) -> Self {
        self.item.article_id = Some(ArticleId::new(id));
        self.item.article_name = Some(name.into());
        self
    }

    pub fn quantity(mut self, quantity: i32) -> Self {
        self.item.quantity = quantity;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.item.description = description.into();
        self
    }

    pub fn billed(mut self, invoice_number: impl Into<String>) -> Self {
        self.item.invoice_number = Some(invoice_number.into());
        self
    }

    pub fn build(self) -> MaterialItem {
        self.item
    }
}

/// Builder for worklog enqueue items
pub struct EnqueueItemBuilder {
    item: EnqueueItem,
}

impl EnqueueItemBuilder {
    /// A complete item for `invoice_id` covering March 2024
    pub fn new(invoice_id: i64) -> Self {
        let window = TemporalFixtures::march_window();
        Self {
            item: EnqueueItem {
                invoice_id: Some(invoice_id),
                invoice_number: None,
                customer_name: Some("Acme AB".to_string()),
                rows: vec![worklog_row(window.start, "Service visit", dec!(2.5))],
                period_from: Some(window.start),
                period_to: Some(window.end),
                company_id: Some(5),
                language: None,
            },
        }
    }

    pub fn invoice_number(mut self, number: impl Into<String>) -> Self {
        self.item.invoice_number = Some(number.into());
        self
    }

    pub fn company(mut self, company_id: i64) -> Self {
        self.item.company_id = Some(company_id);
        self
    }

    pub fn rows(mut self, rows: Vec<WorklogRow>) -> Self {
        self.item.rows = rows;
        self
    }

    pub fn period(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.item.period_from = Some(from);
        self.item.period_to = Some(to);
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.item.language = Some(language);
        self
    }

    pub fn build(self) -> EnqueueItem {
        self.item
    }
}

/// Builder for stored job rows, for putting a queue into a given state
pub struct DocumentJobBuilder {
    job: DocumentJob,
    payload: JobPayload,
}

impl DocumentJobBuilder {
    /// A queued, due job with a valid payload
    pub fn new(id: i64, target_document_id: i64) -> Self {
        let now = Utc::now();
        let window = TemporalFixtures::march_window();
        Self {
            job: DocumentJob {
                id: DocumentJobId::new(id),
                target_document_id,
                document_number: None,
                status: JobStatus::Queued,
                attempts: 0,
                run_after: now,
                last_error: None,
                payload: serde_json::Value::Null,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            },
            payload: JobPayload {
                customer_name: "Acme AB".to_string(),
                rows: vec![worklog_row(window.start, "Service visit", dec!(2.5))],
                period: window,
                billing_entity_id: BillingEntityId::new(5),
                language: Language::default(),
            },
        }
    }

    pub fn document_number(mut self, number: impl Into<String>) -> Self {
        self.job.document_number = Some(number.into());
        self
    }

    /// Claimed at `claimed_at` and still processing
    pub fn processing_since(mut self, claimed_at: DateTime<Utc>) -> Self {
        self.job.status = JobStatus::Processing;
        self.job.claimed_at = Some(claimed_at);
        self
    }

    pub fn failed(mut self, attempts: u32, error: impl Into<String>) -> Self {
        self.job.status = JobStatus::Failed;
        self.job.attempts = attempts;
        self.job.last_error = Some(error.into());
        self
    }

    pub fn run_after(mut self, run_after: DateTime<Utc>) -> Self {
        self.job.run_after = run_after;
        self
    }

    pub fn period(mut self, period: DateWindow) -> Self {
        self.payload.period = period;
        self
    }

    /// Stores a raw payload that will not decode
    pub fn raw_payload(self, payload: serde_json::Value) -> DocumentJob {
        DocumentJob { payload, ..self.job }
    }

    pub fn build(self) -> DocumentJob {
        let payload = serde_json::to_value(&self.payload).unwrap_or(serde_json::Value::Null);
        DocumentJob { payload, ..self.job }
    }
}

/// A worklog row without user or project
pub fn worklog_row(date: NaiveDate, description: &str, hours: Decimal) -> WorklogRow {
    WorklogRow {
        date,
        description: description.to_string(),
        hours,
        user_name: None,
        project: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_record_builder() {
        let record = TimeRecordBuilder::new(3)
            .entity(BillingEntityId::new(5))
            .hours(dec!(1.75))
            .billed("1042")
            .build();

        assert_eq!(record.id, TimeRecordId::new(3));
        assert!(record.billed);
        assert!(!record.is_lockable());
        assert_eq!(record.invoice_number.as_deref(), Some("1042"));
    }

    #[test]
    fn test_enqueue_item_builder_validates() {
        let job = EnqueueItemBuilder::new(310).invoice_number("1001").build().validate();
        let job = job.unwrap();
        assert_eq!(job.target_document_id, 310);
        assert_eq!(job.document_number.as_deref(), Some("1001"));
    }

    #[test]
    fn test_document_job_payload_decodes() {
        let job = DocumentJobBuilder::new(1, 310).build();
        let payload = job.decode_payload().unwrap();
        assert_eq!(payload.total_hours(), dec!(2.5));
    }
}
