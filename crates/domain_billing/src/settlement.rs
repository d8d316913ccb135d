//! Batch settlement
//!
//! Runs `create invoice → lock hours → lock items → queue worklog` for each
//! entity on its own. A failure stops that entity's pipeline at the stage it
//! reached and never touches another entity.
//!
//! The invoice target is always resolved server-side from the entity and its
//! owner. Every row named in the lock set must belong to the entity being
//! invoiced; both checks happen before the accounting system is called.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::{BillingEntityId, DateWindow, DocumentJobId, MaterialItemId, TimeRecordId};
use domain_documents::{
    AccountingGateway, DocumentJobQueue, InvoiceDraft, InvoiceDraftLine, JobPayload, Language,
    NewDocumentJob, WorklogRow,
};

use crate::bill_target::resolve;
use crate::envelope::{BillingEnvelope, BucketKey, LockSet};
use crate::error::BillingError;
use crate::lock::BillingLockManager;
use crate::ports::RecordStore;

/// Invoice request for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub billing_entity_id: BillingEntityId,
    /// Local invoice record the generated worklog belongs to
    pub invoice_id: i64,
    /// Target the caller saw when the envelope was collected
    ///
    /// Only compared with the resolved target; a mismatch rejects the request.
    #[serde(default)]
    pub bill_target: Option<String>,
    pub customer_name: String,
    pub period: DateWindow,
    pub lines: Vec<InvoiceDraftLine>,
    pub worklog: Vec<WorklogRow>,
    #[serde(default)]
    pub language: Language,
    pub locks: LockSet,
}

impl SettlementRequest {
    /// Builds a request from a collected envelope
    ///
    /// Only unbilled rows are carried over. The unlinked bucket has no entity
    /// and yields `None`.
    pub fn from_envelope(
        envelope: &BillingEnvelope,
        invoice_id: i64,
        period: DateWindow,
        language: Language,
    ) -> Option<Self> {
        let BucketKey::Entity(billing_entity_id) = envelope.key else {
            return None;
        };

        let worklog = envelope
            .unbilled_records()
            .into_iter()
            .map(|r| WorklogRow {
                date: r.date,
                description: r.description.or(r.work_label).unwrap_or_default(),
                hours: r.hours,
                user_name: None,
                project: r.project_id.map(|p| p.to_string()),
            })
            .collect();

        let lines = envelope
            .lines
            .iter()
            .map(|line| InvoiceDraftLine {
                description: line.description.clone(),
                quantity: line.quantity,
                article_id: line.article_id,
            })
            .collect();

        Some(Self {
            billing_entity_id,
            invoice_id,
            bill_target: envelope.billing_info.target.clone(),
            customer_name: envelope.name().unwrap_or_default().to_string(),
            period,
            lines,
            worklog,
            language,
            locks: envelope.locks.clone(),
        })
    }

    /// Shape checks that need no store access
    fn validate(&self) -> Result<(), BillingError> {
        DateWindow::new(self.period.start, self.period.end)?;
        if self.invoice_id <= 0 {
            return Err(BillingError::validation("invoiceId must be positive"));
        }
        if self.lines.is_empty() {
            return Err(BillingError::validation("invoice has no lines"));
        }
        if self.locks.is_empty() {
            return Err(BillingError::validation("no rows to lock"));
        }
        if self.worklog.is_empty() {
            return Err(BillingError::validation("worklog has no rows"));
        }
        Ok(())
    }

    fn expected_target(&self) -> Option<&str> {
        self.bill_target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Furthest step a settlement reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettlementStage {
    /// No invoice was created
    Rejected,
    InvoiceCreated,
    HoursLocked,
    ItemsLocked,
    /// Worklog job queued; the pipeline is complete
    Queued,
}

/// Result for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub billing_entity_id: BillingEntityId,
    pub stage: SettlementStage,
    pub document_number: Option<String>,
    pub job_id: Option<DocumentJobId>,
    pub error: Option<String>,
}

impl SettlementOutcome {
    pub fn is_complete(&self) -> bool {
        self.stage == SettlementStage::Queued && self.error.is_none()
    }

    /// Error text naming which rows are already billed when the pipeline stopped
    fn stopped(&self, request: &SettlementRequest, error: &BillingError) -> String {
        let Some(number) = self.document_number.as_deref() else {
            return error.to_string();
        };
        let hours_billed = !request.locks.time_report_ids.is_empty();
        match self.stage {
            SettlementStage::HoursLocked if hours_billed => format!(
                "hours billed under invoice {}; items not locked and no worklog queued: {}",
                number, error
            ),
            SettlementStage::HoursLocked | SettlementStage::ItemsLocked => format!(
                "rows billed under invoice {}; no worklog queued: {}",
                number, error
            ),
            _ => error.to_string(),
        }
    }
}

/// Creates invoices and hands them to the document queue
#[derive(Clone)]
pub struct SettlementService {
    records: Arc<dyn RecordStore>,
    gateway: Arc<dyn AccountingGateway>,
    locks: BillingLockManager,
    jobs: DocumentJobQueue,
}

impl SettlementService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        gateway: Arc<dyn AccountingGateway>,
        locks: BillingLockManager,
        jobs: DocumentJobQueue,
    ) -> Self {
        Self {
            records,
            gateway,
            locks,
            jobs,
        }
    }

    /// Settles every request independently
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn settle(&self, requests: Vec<SettlementRequest>) -> Vec<SettlementOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.settle_one(request).await);
        }
        let complete = outcomes.iter().filter(|o| o.is_complete()).count();
        info!(complete, failed = outcomes.len() - complete, "Settlement batch finished");
        outcomes
    }

    async fn settle_one(&self, request: SettlementRequest) -> SettlementOutcome {
        let mut outcome = SettlementOutcome {
            billing_entity_id: request.billing_entity_id,
            stage: SettlementStage::Rejected,
            document_number: None,
            job_id: None,
            error: None,
        };

        if let Err(e) = self.run(&request, &mut outcome).await {
            warn!(
                entity = %request.billing_entity_id,
                stage = ?outcome.stage,
                error = %e,
                "Settlement stopped"
            );
            outcome.error = Some(outcome.stopped(&request, &e));
        }
        outcome
    }

    /// Resolves the entity's target through its single-hop owner
    async fn resolve_target(&self, request: &SettlementRequest) -> Result<String, BillingError> {
        let id = request.billing_entity_id;
        let entity = self
            .records
            .billing_entities(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or(BillingError::NotBillable(id))?;

        let owner = match entity.owner_entity_id {
            Some(owner_id) if !entity.is_billing_owner && !entity.bill_direct => self
                .records
                .billing_entities(&[owner_id])
                .await?
                .into_iter()
                .next(),
            _ => None,
        };

        let target = resolve(&entity, owner.as_ref())
            .target
            .ok_or(BillingError::NotBillable(id))?;
        if let Some(expected) = request.expected_target() {
            if expected != target {
                return Err(BillingError::validation(format!(
                    "billTarget {} does not match resolved target {} of entity {}",
                    expected, target, id
                )));
            }
        }
        debug!(entity = %id, target = %target, "Bill target resolved");
        Ok(target)
    }

    /// Rejects lock sets naming rows of another entity or unknown rows
    async fn check_rows_belong(&self, request: &SettlementRequest) -> Result<(), BillingError> {
        let entity = Some(request.billing_entity_id);
        let locks = &request.locks;

        let owned_records: HashSet<TimeRecordId> = self
            .records
            .time_records_by_id(&locks.time_report_ids)
            .await?
            .into_iter()
            .filter(|r| r.billing_entity_id == entity)
            .map(|r| r.id)
            .collect();
        let owned_items: HashSet<MaterialItemId> = self
            .records
            .material_items_by_id(&locks.time_report_item_ids)
            .await?
            .into_iter()
            .filter(|row| row.billing_entity_id == entity)
            .map(|row| row.item.id)
            .collect();

        let foreign = locks
            .time_report_ids
            .iter()
            .filter(|id| !owned_records.contains(id))
            .count()
            + locks
                .time_report_item_ids
                .iter()
                .filter(|id| !owned_items.contains(id))
                .count();
        if foreign > 0 {
            return Err(BillingError::validation(format!(
                "{} locked rows do not belong to entity {}",
                foreign, request.billing_entity_id
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        request: &SettlementRequest,
        outcome: &mut SettlementOutcome,
    ) -> Result<(), BillingError> {
        request.validate()?;
        let customer_number = self.resolve_target(request).await?;
        self.check_rows_belong(request).await?;

        let draft = InvoiceDraft {
            customer_number,
            period: request.period,
            lines: request.lines.clone(),
        };
        let document_number = self.gateway.create_invoice(&draft).await?;
        outcome.stage = SettlementStage::InvoiceCreated;
        outcome.document_number = Some(document_number.clone());

        if !request.locks.time_report_ids.is_empty() {
            self.locks
                .lock_hours(&request.locks.time_report_ids, &document_number)
                .await?;
        }
        outcome.stage = SettlementStage::HoursLocked;

        if !request.locks.time_report_item_ids.is_empty() {
            self.locks
                .lock_items(&request.locks.time_report_item_ids, &document_number)
                .await?;
        }
        outcome.stage = SettlementStage::ItemsLocked;

        let job = NewDocumentJob {
            target_document_id: request.invoice_id,
            document_number: Some(document_number),
            payload: JobPayload {
                customer_name: request.customer_name.clone(),
                rows: request.worklog.clone(),
                period: request.period,
                billing_entity_id: request.billing_entity_id,
                language: request.language,
            },
        };
        let ids = self
            .jobs
            .enqueue_jobs(std::slice::from_ref(&job))
            .await?;
        outcome.job_id = ids.first().copied();
        outcome.stage = SettlementStage::Queued;
        Ok(())
    }
}
