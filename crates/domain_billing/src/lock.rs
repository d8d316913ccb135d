//! Lock-and-mark
//!
//! Moves a caller-supplied id set from unbilled to billed. The store does the
//! row locking and the count check; this layer validates input and turns a
//! rejected batch into [`BillingError::Conflict`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use core_kernel::{MaterialItemId, TimeRecordId};

use crate::error::BillingError;
use crate::ports::{BillingLockStore, LockResult};

/// Successful lock result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOutcome {
    pub affected: u64,
}

/// Applies lock-and-mark against the lock store
#[derive(Clone)]
pub struct BillingLockManager {
    store: Arc<dyn BillingLockStore>,
}

impl BillingLockManager {
    pub fn new(store: Arc<dyn BillingLockStore>) -> Self {
        Self { store }
    }

    /// Marks the given time records billed under `invoice_number`
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn lock_hours(
        &self,
        ids: &[TimeRecordId],
        invoice_number: &str,
    ) -> Result<LockOutcome, BillingError> {
        let ids = prepare(ids, TimeRecordId::is_valid, "time record")?;
        let invoice_number = invoice(invoice_number)?;

        let result = self.store.lock_hours(&ids, invoice_number).await?;
        settle(result, "hours", invoice_number)
    }

    /// Stamps the given material items with `invoice_number`
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn lock_items(
        &self,
        ids: &[MaterialItemId],
        invoice_number: &str,
    ) -> Result<LockOutcome, BillingError> {
        let ids = prepare(ids, MaterialItemId::is_valid, "material item")?;
        let invoice_number = invoice(invoice_number)?;

        let result = self.store.lock_items(&ids, invoice_number).await?;
        settle(result, "items", invoice_number)
    }
}

fn prepare<T: Copy + Ord>(
    ids: &[T],
    valid: impl Fn(&T) -> bool,
    kind: &str,
) -> Result<Vec<T>, BillingError> {
    if ids.is_empty() {
        return Err(BillingError::validation(format!("no {} ids to lock", kind)));
    }
    if !ids.iter().all(valid) {
        return Err(BillingError::validation(format!("{} ids must be positive", kind)));
    }
    Ok(ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect())
}

fn invoice(invoice_number: &str) -> Result<&str, BillingError> {
    let trimmed = invoice_number.trim();
    if trimmed.is_empty() {
        return Err(BillingError::validation("invoice number is required"));
    }
    Ok(trimmed)
}

fn settle(result: LockResult, kind: &str, invoice_number: &str) -> Result<LockOutcome, BillingError> {
    match result {
        LockResult::Applied { affected } => {
            info!(kind, invoice_number, affected, "Rows locked");
            Ok(LockOutcome { affected })
        }
        LockResult::Rejected { requested, eligible } => {
            warn!(kind, invoice_number, requested, eligible, "Lock rejected");
            Err(BillingError::Conflict { requested, eligible })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::InMemoryBillingStore;

    fn manager() -> BillingLockManager {
        BillingLockManager::new(Arc::new(InMemoryBillingStore::new()))
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_io() {
        let result = manager().lock_hours(&[], "1001").await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_blank_invoice_number_rejected() {
        let result = manager().lock_items(&[MaterialItemId::new(1)], "   ").await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    #[tokio::test]
    async fn test_non_positive_ids_rejected() {
        let result = manager().lock_hours(&[TimeRecordId::new(0)], "1001").await;
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }

    async fn seeded_store() -> Arc<InMemoryBillingStore> {
        use chrono::NaiveDate;
        use core_kernel::UserId;
        use rust_decimal_macros::dec;
        use crate::timesheet::{MaterialItem, TimeRecord};

        let store = Arc::new(InMemoryBillingStore::new());
        for id in 10..=13 {
            let billed = id == 11;
            store
                .insert_record(TimeRecord {
                    id: TimeRecordId::new(id),
                    owner_user_id: UserId::new(1),
                    billing_entity_id: None,
                    project_id: None,
                    category_id: None,
                    category_name: None,
                    date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    hours: dec!(1),
                    billable: true,
                    billed,
                    invoice_number: billed.then(|| "900".to_string()),
                    work_label: None,
                    description: None,
                })
                .await;
        }
        for id in 20..=21 {
            store
                .insert_item(MaterialItem {
                    id: MaterialItemId::new(id),
                    parent_time_record_id: TimeRecordId::new(10),
                    article_id: None,
                    article_name: None,
                    quantity: 1,
                    description: "Cable".to_string(),
                    invoice_number: None,
                })
                .await;
        }
        store
    }

    #[tokio::test]
    async fn test_partially_billed_batch_changes_nothing() {
        let store = seeded_store().await;
        let manager = BillingLockManager::new(store.clone());
        let ids = [TimeRecordId::new(10), TimeRecordId::new(11), TimeRecordId::new(12)];

        let result = manager.lock_hours(&ids, "1001").await;

        assert!(matches!(
            result,
            Err(BillingError::Conflict { requested: 3, eligible: 2 })
        ));
        let r10 = store.record(TimeRecordId::new(10)).await.unwrap();
        let r11 = store.record(TimeRecordId::new(11)).await.unwrap();
        let r12 = store.record(TimeRecordId::new(12)).await.unwrap();
        assert!(!r10.billed && r10.invoice_number.is_none());
        assert!(r11.billed && r11.invoice_number.as_deref() == Some("900"));
        assert!(!r12.billed && r12.invoice_number.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_ids_count_once() {
        let store = seeded_store().await;
        let manager = BillingLockManager::new(store.clone());
        let ids = [TimeRecordId::new(12), TimeRecordId::new(12), TimeRecordId::new(13)];

        let outcome = manager.lock_hours(&ids, " 1002 ").await.unwrap();

        assert_eq!(outcome, LockOutcome { affected: 2 });
        let r12 = store.record(TimeRecordId::new(12)).await.unwrap();
        assert_eq!(r12.invoice_number.as_deref(), Some("1002"));
    }

    #[tokio::test]
    async fn test_item_lock_is_independent_of_parent_hours() {
        let store = seeded_store().await;
        let manager = BillingLockManager::new(store.clone());

        let outcome = manager
            .lock_items(&[MaterialItemId::new(20), MaterialItemId::new(21)], "1003")
            .await
            .unwrap();
        assert_eq!(outcome.affected, 2);
        assert!(!store.record(TimeRecordId::new(10)).await.unwrap().billed);

        let again = manager.lock_items(&[MaterialItemId::new(20)], "1004").await;
        assert!(again.unwrap_err().is_conflict());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_locks_single_winner() {
        let store = seeded_store().await;
        let manager = BillingLockManager::new(store.clone());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .lock_hours(&[TimeRecordId::new(10), TimeRecordId::new(12)], "A-1")
                    .await
            })
        };
        let second = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .lock_hours(&[TimeRecordId::new(12), TimeRecordId::new(13)], "B-1")
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let winner = if results[0].is_ok() { "A-1" } else { "B-1" };
        let r12 = store.record(TimeRecordId::new(12)).await.unwrap();
        assert_eq!(r12.invoice_number.as_deref(), Some(winner));

        let loser_only = if winner == "A-1" { 13 } else { 10 };
        assert!(!store.record(TimeRecordId::new(loser_only)).await.unwrap().billed);
    }

    #[test]
    fn test_prepare_deduplicates() {
        let ids = [TimeRecordId::new(3), TimeRecordId::new(1), TimeRecordId::new(3)];
        let prepared = prepare(&ids, TimeRecordId::is_valid, "time record").unwrap();
        assert_eq!(prepared, vec![TimeRecordId::new(1), TimeRecordId::new(3)]);
    }
}
