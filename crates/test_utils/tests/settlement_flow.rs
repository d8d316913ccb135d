//! End-to-end settlement flow over the in-memory adapters
//!
//! collect ─▶ settle ─▶ drain ─▶ document stored, attached and mailed

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal_macros::dec;

use domain_billing::ports::mock::InMemoryBillingStore;
use domain_billing::{
    aggregate, BillingCollector, BillingEnvelope, BillingLockManager, BucketKey, CollectQuery,
    GroupingPolicy, SettlementRequest, SettlementService, SettlementStage,
};
use domain_documents::ports::mock::{
    InMemoryDocumentStore, InMemoryJobQueue, MockAccountingGateway, RecordingMailSender,
    StaticRecipientDirectory,
};
use domain_documents::{
    DocumentJobQueue, DocumentWorker, HtmlWorklogRenderer, JobStatus, Language, RetryPolicy,
};
use test_utils::*;

struct Flow {
    store: Arc<InMemoryBillingStore>,
    queue: Arc<InMemoryJobQueue>,
    documents: Arc<InMemoryDocumentStore>,
    gateway: Arc<MockAccountingGateway>,
    mail: Arc<RecordingMailSender>,
}

impl Flow {
    async fn seeded() -> Self {
        let store = Arc::new(InMemoryBillingStore::new());
        for entity in EntityFixtures::all() {
            store.insert_entity(entity).await;
        }
        for record in RecordFixtures::march_unbilled() {
            store.insert_record(record).await;
        }
        // Record 5 belongs to the standalone customer
        store
            .insert_item(MaterialItemBuilder::new(50, 5).article(3, "Cable 3x1.5").quantity(4).build())
            .await;

        Self {
            store,
            queue: Arc::new(InMemoryJobQueue::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            gateway: Arc::new(MockAccountingGateway::new()),
            mail: Arc::new(RecordingMailSender::new()),
        }
    }

    fn collector(&self) -> BillingCollector {
        BillingCollector::new(self.store.clone())
    }

    fn settlement(&self) -> SettlementService {
        SettlementService::new(
            self.store.clone(),
            self.gateway.clone(),
            BillingLockManager::new(self.store.clone()),
            DocumentJobQueue::new(self.queue.clone()),
        )
    }

    fn worker(&self) -> DocumentWorker {
        let recipients = StaticRecipientDirectory::new()
            .with(EntityFixtures::STANDALONE, "billing@acme.test");
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

    async fn collect(&self) -> Vec<BillingEnvelope> {
        self.collector()
            .collect(&CollectQuery::new(TemporalFixtures::march_window()))
            .await
            .unwrap()
    }
}

/// Builds requests for every billable entity envelope, numbering invoices from 300
fn requests(envelopes: &[BillingEnvelope]) -> Vec<SettlementRequest> {
    envelopes
        .iter()
        .filter(|e| e.meta.billable)
        .zip(300i64..)
        .filter_map(|(envelope, invoice_id)| {
            SettlementRequest::from_envelope(
                envelope,
                invoice_id,
                TemporalFixtures::march_window(),
                Language::Sv,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_collected_envelopes_are_consistent() {
    let flow = Flow::seeded().await;
    let envelopes = flow.collect().await;

    assert_hours_conserved(&RecordFixtures::march_unbilled(), &envelopes);
    assert_each_id_once(&envelopes);
    assert_locks_unbilled(&envelopes);

    // Five entities plus the unlinked bucket, unlinked last
    assert_eq!(envelopes.len(), 6);
    assert_eq!(envelopes.last().map(|e| e.key), Some(BucketKey::Unlinked));

    let child = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::OWNED_CHILD))
        .unwrap();
    assert_eq!(child.billing_info.target.as_deref(), Some("900"));

    let direct = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::DIRECT_CHILD))
        .unwrap();
    assert_eq!(direct.billing_info.target.as_deref(), Some("902"));

    let prospect = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::NO_ACCOUNT))
        .unwrap();
    assert!(!prospect.meta.billable);
}

#[tokio::test]
async fn test_full_settlement_produces_attached_worklogs() {
    let flow = Flow::seeded().await;
    let envelopes = flow.collect().await;
    let requests = requests(&envelopes);
    assert_eq!(requests.len(), 4);

    let outcomes = flow.settlement().settle(requests.clone()).await;
    assert!(outcomes.iter().all(|o| o.is_complete()), "{:?}", outcomes);

    // The owned child is invoiced on its owner's account
    let calls = flow.gateway.calls().await;
    assert_eq!(calls.invoices.len(), 4);
    let child_draft = requests
        .iter()
        .position(|r| r.billing_entity_id == EntityFixtures::OWNED_CHILD)
        .map(|i| &calls.invoices[i])
        .unwrap();
    assert_eq!(child_draft.customer_number, "900");

    // Every collected row is now billed under its entity's document number
    for (request, outcome) in requests.iter().zip(&outcomes) {
        for id in &request.locks.time_report_ids {
            let record = flow.store.record(*id).await.unwrap();
            assert!(record.billed);
            assert_eq!(record.invoice_number, outcome.document_number);
        }
    }
    let item = flow.store.item(core_kernel::MaterialItemId::new(50)).await.unwrap();
    assert!(item.is_billed());

    let report = flow.worker().drain().await.unwrap();
    assert_eq!(report.processed, 4);
    assert_eq!(report.done, 4);
    assert_eq!(report.failed, 0);

    for (request, outcome) in requests.iter().zip(&outcomes) {
        let job_id = outcome.job_id.unwrap();
        assert_job_status(flow.queue.job(job_id).await.as_ref(), job_id, JobStatus::Done, 0);

        let document = flow.documents.by_target(request.invoice_id).await.unwrap();
        assert_eq!(document.document_number, outcome.document_number);
        assert!(document.external_archive_id.is_some());
        assert_eq!(document.billing_entity_id, request.billing_entity_id);
    }

    let calls = flow.gateway.calls().await;
    assert_eq!(calls.uploads.len(), 4);
    assert_eq!(calls.attachments.len(), 4);
    assert!(calls.attachments.iter().all(|(_, _, include_on_send)| *include_on_send));

    // Only the standalone customer has a recipient
    let sent = flow.mail.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["billing@acme.test".to_string()]);
}

#[tokio::test]
async fn test_second_collection_sees_only_unbillable_rows() {
    let flow = Flow::seeded().await;
    let envelopes = flow.collect().await;
    flow.settlement().settle(requests(&envelopes)).await;

    // Settled entities stay visible as empty envelopes flagged billed-in-range
    let remaining = flow.collect().await;
    let with_rows: Vec<BucketKey> = remaining
        .iter()
        .filter(|e| !e.locks.is_empty())
        .map(|e| e.key)
        .collect();
    assert_eq!(
        with_rows,
        vec![BucketKey::Entity(EntityFixtures::NO_ACCOUNT), BucketKey::Unlinked]
    );
    for envelope in remaining.iter().filter(|e| e.locks.is_empty()) {
        assert!(envelope.meta.has_billed_in_range, "{:?}", envelope.key);
        assert!(envelope.lines.is_empty());
        assert!(!envelope.meta.mixed);
    }

    // Settling the same envelopes again cannot double-bill
    let again = flow.settlement().settle(requests(&envelopes)).await;
    assert!(again.iter().all(|o| !o.is_complete()));
    assert!(again.iter().all(|o| o.stage == SettlementStage::InvoiceCreated));
}

#[tokio::test]
async fn test_entity_without_account_is_rejected_before_invoicing() {
    let flow = Flow::seeded().await;
    let envelopes = flow.collect().await;
    let prospect = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::NO_ACCOUNT))
        .unwrap();
    let request = SettlementRequest::from_envelope(
        prospect,
        400,
        TemporalFixtures::march_window(),
        Language::En,
    )
    .unwrap();

    let outcomes = flow.settlement().settle(vec![request]).await;
    assert_eq!(outcomes[0].stage, SettlementStage::Rejected);
    assert!(outcomes[0].document_number.is_none());
    assert!(flow.gateway.calls().await.invoices.is_empty());
    assert!(!flow.store.record(core_kernel::TimeRecordId::new(4)).await.unwrap().billed);
}

#[tokio::test]
async fn test_gateway_outage_fails_jobs_until_operator_retry() {
    let flow = Flow::seeded().await;
    let envelopes = flow.collect().await;
    let outcomes = flow.settlement().settle(requests(&envelopes)).await;

    // Zero backoff: every attempt is due immediately, so one drain exhausts them
    flow.gateway.set_unavailable(true);
    let report = flow.worker().drain().await.unwrap();
    assert_eq!(report.done, 0);
    assert_eq!(report.requeued, 8);
    assert_eq!(report.failed, 4);
    // Documents are stored before the upload is attempted
    assert_eq!(flow.documents.len().await, 4);

    let jobs = DocumentJobQueue::new(flow.queue.clone());
    let status = jobs.status().await.unwrap();
    assert_eq!(status.counts.failed, 4);
    assert_eq!(status.recent_failures.len(), 4);

    flow.gateway.set_unavailable(false);
    for outcome in &outcomes {
        jobs.retry(outcome.job_id.unwrap()).await.unwrap();
    }
    let report = flow.worker().drain().await.unwrap();
    assert_eq!(report.done, 4);

    for outcome in &outcomes {
        let job_id = outcome.job_id.unwrap();
        assert_job_status(flow.queue.job(job_id).await.as_ref(), job_id, JobStatus::Done, 0);
    }
    assert_eq!(flow.documents.len().await, 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_aggregation_invariants_hold(input in collection_input_strategy()) {
        let records = input.records.clone();
        let envelopes = aggregate(input, GroupingPolicy::default());

        assert_hours_conserved(&records, &envelopes);
        assert_each_id_once(&envelopes);
        assert_locks_unbilled(&envelopes);
        prop_assert!(envelopes.iter().filter(|e| e.key == BucketKey::Unlinked).count() <= 1);
    }

    #[test]
    fn test_quarter_hour_totals_stay_exact(records in time_records_strategy(3, 16)) {
        let envelopes = aggregate(
            domain_billing::CollectionInput { records: records.clone(), ..Default::default() },
            GroupingPolicy::default(),
        );
        let total: rust_decimal::Decimal = envelopes.iter().map(|e| e.total.hours).sum();
        prop_assert_eq!((total * dec!(4)).fract(), dec!(0));
    }
}
