//! PostgreSQL adapter tests
//!
//! These start a container per test and are ignored by default:
//!
//! ```bash
//! cargo test -p test_utils --test postgres_adapters -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use core_kernel::{BillingEntityId, TimeRecordId};
use domain_billing::{BillingCollector, BillingLockManager, BucketKey, CollectQuery, StatusFilter};
use domain_documents::{
    DocumentStore, DocumentUpsert, FailureTransition, JobQueue, JobStatus, RecipientDirectory,
    RenderedDocument,
};
use infra_db::{PostgresBillingAdapter, PostgresDocumentAdapter};
use test_utils::*;

async fn seeded() -> TestDatabase {
    let db = create_isolated_test_database().await.unwrap();
    db.seed_entities(&EntityFixtures::all()).await.unwrap();
    db.seed_records(&RecordFixtures::march_unbilled()).await.unwrap();
    db.seed_items(&[
        MaterialItemBuilder::new(50, 5).article(3, "Cable 3x1.5").quantity(4).build(),
        MaterialItemBuilder::new(51, 5).description("Screws").quantity(10).build(),
    ])
    .await
    .unwrap();
    db
}

fn new_job(target: i64) -> domain_documents::NewDocumentJob {
    EnqueueItemBuilder::new(target)
        .invoice_number(format!("{}", 1000 + target))
        .build()
        .validate()
        .unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_collect_resolves_owner_targets() {
    let db = seeded().await;
    let collector = BillingCollector::new(Arc::new(PostgresBillingAdapter::new(db.pool.clone())));

    let envelopes = collector
        .collect(&CollectQuery::new(TemporalFixtures::march_window()))
        .await
        .unwrap();

    assert_hours_conserved(&RecordFixtures::march_unbilled(), &envelopes);
    assert_each_id_once(&envelopes);
    assert_locks_unbilled(&envelopes);

    let child = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::OWNED_CHILD))
        .unwrap();
    assert_eq!(child.billing_info.target.as_deref(), Some("900"));

    let standalone = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::STANDALONE))
        .unwrap();
    assert_eq!(standalone.items.len(), 2);
    assert_eq!(standalone.articles.registered.len(), 1);
    assert_eq!(standalone.articles.custom.len(), 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_lock_conflict_changes_nothing() {
    let db = seeded().await;
    let adapter = Arc::new(PostgresBillingAdapter::new(db.pool.clone()));
    let locks = BillingLockManager::new(adapter.clone());

    let outcome = locks
        .lock_hours(&[TimeRecordId::new(1), TimeRecordId::new(2)], "1001")
        .await
        .unwrap();
    assert_eq!(outcome.affected, 2);

    let err = locks
        .lock_hours(&[TimeRecordId::new(2), TimeRecordId::new(3)], "1002")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let billed = BillingCollector::new(adapter)
        .collect(&CollectQuery::new(TemporalFixtures::march_window()).with_status(StatusFilter::Billed))
        .await
        .unwrap();
    let billed_ids: Vec<TimeRecordId> = billed
        .iter()
        .flat_map(|e| e.timecards.iter().map(|r| r.id))
        .collect();
    assert_eq!(billed_ids.len(), 2);
    assert!(!billed_ids.contains(&TimeRecordId::new(3)));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_overlapping_concurrent_locks_admit_one() {
    let db = seeded().await;
    let locks = BillingLockManager::new(Arc::new(PostgresBillingAdapter::new(db.pool.clone())));

    let first = locks.clone();
    let second = locks.clone();
    let first_ids = [TimeRecordId::new(1), TimeRecordId::new(2)];
    let second_ids = [TimeRecordId::new(2), TimeRecordId::new(3)];
    let (a, b) = tokio::join!(
        first.lock_hours(&first_ids, "2001"),
        second.lock_hours(&second_ids, "2002"),
    );

    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one overlapping lock may win: {:?} / {:?}",
        a,
        b
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_concurrent_claims_never_share_a_job() {
    let db = create_isolated_test_database().await.unwrap();
    let queue = Arc::new(PostgresDocumentAdapter::new(db.pool.clone()));
    let ids = queue.enqueue(&[new_job(301), new_job(302)]).await.unwrap();
    assert_eq!(ids.len(), 2);

    let now = Utc::now();
    let (a, b, c) = tokio::join!(queue.claim_next(now), queue.claim_next(now), queue.claim_next(now));
    let mut claimed: Vec<_> = [a, b, c]
        .into_iter()
        .filter_map(|claim| claim.unwrap())
        .map(|job| {
            assert_eq!(job.status, JobStatus::Processing);
            job.id
        })
        .collect();
    claimed.sort();
    assert_eq!(claimed, ids);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_failure_backoff_and_retry() {
    let db = create_isolated_test_database().await.unwrap();
    let queue = PostgresDocumentAdapter::new(db.pool.clone());
    let id = queue.enqueue(&[new_job(310)]).await.unwrap()[0];

    let job = queue.claim_next(Utc::now()).await.unwrap().unwrap();
    let run_after = Utc::now() + chrono::Duration::minutes(5);
    let requeue = FailureTransition::Requeue { attempts: 1, run_after };
    assert!(queue
        .record_failure(job.id, job.claimed_at.unwrap(), requeue, "gateway down")
        .await
        .unwrap());
    assert!(queue.claim_next(Utc::now()).await.unwrap().is_none());

    let job = queue.claim_next(run_after).await.unwrap().unwrap();
    let fail = FailureTransition::Fail { attempts: 3 };
    assert!(queue
        .record_failure(job.id, job.claimed_at.unwrap(), fail, "gateway down")
        .await
        .unwrap());

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    let failures = queue.recent_failures(20).await.unwrap();
    assert_eq!(failures[0].id, id);
    assert_eq!(failures[0].last_error.as_deref(), Some("gateway down"));

    assert!(queue.retry_failed(id).await.unwrap());
    assert!(!queue.retry_failed(id).await.unwrap());
    let job = queue.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_late_failure_does_not_undo_reclaimed_done_job() {
    let db = create_isolated_test_database().await.unwrap();
    let queue = PostgresDocumentAdapter::new(db.pool.clone());
    let id = queue.enqueue(&[new_job(311)]).await.unwrap()[0];

    let slow = queue.claim_next(Utc::now()).await.unwrap().unwrap();
    let later = Utc::now() + chrono::Duration::minutes(20);
    assert_eq!(queue.requeue_stale(later).await.unwrap(), 1);

    let second = queue.claim_next(later).await.unwrap().unwrap();
    assert_eq!(second.id, id);
    assert!(queue.mark_done(second.id, second.claimed_at.unwrap()).await.unwrap());

    let late = FailureTransition::Fail { attempts: 3 };
    assert!(!queue
        .record_failure(slow.id, slow.claimed_at.unwrap(), late, "timed out")
        .await
        .unwrap());

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.done, 1);
    assert_eq!(counts.failed, 0);
    assert!(queue.recent_failures(20).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stale_processing_job_is_requeued() {
    let db = create_isolated_test_database().await.unwrap();
    let queue = PostgresDocumentAdapter::new(db.pool.clone());
    queue.enqueue(&[new_job(320)]).await.unwrap();

    let claimed = queue.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(queue.requeue_stale(Utc::now() - chrono::Duration::minutes(15)).await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.requeue_stale(Utc::now()).await.unwrap(), 1);

    let reclaimed = queue.claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_document_upsert_overwrites_by_target() {
    let db = create_isolated_test_database().await.unwrap();
    let documents = PostgresDocumentAdapter::new(db.pool.clone());
    let upsert = |bytes: &[u8]| DocumentUpsert {
        target_document_id: 330,
        document_number: Some("1330".to_string()),
        billing_entity_id: BillingEntityId::new(5),
        period: TemporalFixtures::march_window(),
        file_name: "worklog.html".to_string(),
        rendered: RenderedDocument::new(bytes.to_vec(), "text/html"),
    };

    let first = documents.upsert(&upsert(b"<p>v1</p>")).await.unwrap();
    documents.set_archive_id(first, "archive-1").await.unwrap();
    let second = documents.upsert(&upsert(b"<p>v2</p>")).await.unwrap();
    assert_eq!(first, second);

    let stored = documents.documents().find_by_target(330).await.unwrap().unwrap();
    assert_eq!(stored.content, b"<p>v2</p>".to_vec());
    assert_eq!(stored.content_hash, domain_documents::content_hash(b"<p>v2</p>"));
    assert!(stored.external_archive_id.is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_recipients_are_read_per_entity() {
    let db = seeded().await;
    db.seed_recipient(&EntityFixtures::standalone(), "billing@acme.test").await.unwrap();
    let documents = PostgresDocumentAdapter::new(db.pool.clone());

    let to = documents.recipients(EntityFixtures::STANDALONE).await.unwrap();
    assert_eq!(to, vec!["billing@acme.test".to_string()]);
    assert!(documents.recipients(EntityFixtures::OWNER).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_hours_survive_numeric_round_trip() {
    let db = seeded().await;
    db.seed_records(&[TimeRecordBuilder::new(60)
        .entity(EntityFixtures::STANDALONE)
        .hours(dec!(0.25))
        .build()])
        .await
        .unwrap();
    let collector = BillingCollector::new(Arc::new(PostgresBillingAdapter::new(db.pool.clone())));

    let envelopes = collector
        .collect(&CollectQuery::new(TemporalFixtures::march_window()))
        .await
        .unwrap();
    let standalone = envelopes
        .iter()
        .find(|e| e.key == BucketKey::Entity(EntityFixtures::STANDALONE))
        .unwrap();
    assert_eq!(standalone.total.hours, dec!(2.75));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cleared_database_collects_nothing() {
    let db = seeded().await;
    db.clear_data().await.unwrap();

    let collector = BillingCollector::new(Arc::new(PostgresBillingAdapter::new(db.pool().clone())));
    let envelopes = collector
        .collect(&CollectQuery::new(TemporalFixtures::march_window()).with_status(StatusFilter::All))
        .await
        .unwrap();
    assert!(envelopes.is_empty());
}
