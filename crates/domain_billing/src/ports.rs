//! Billing Domain Ports
//!
//! Port interfaces the settlement core needs from the record store. The
//! PostgreSQL adapters live in `infra_db`; the in-memory mock here reproduces
//! the same transactional contracts for tests.
//!
//! # Locking contract
//!
//! `BillingLockStore::lock_hours` / `lock_items` must run as one transaction
//! scoped to exactly the given ids: lock the rows that are still unbilled,
//! compare the locked count with the requested count, and either update every
//! row or none. An empty id list matches nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingEntityId, DateWindow, DomainPort, MaterialItemId, PortError, TimeRecordId, UserId,
};

use crate::timesheet::{BillingEntity, MaterialItemRow, StatusFilter, TimeRecord};

/// Row selection for a collection call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub window: DateWindow,
    pub status: StatusFilter,
    pub only_billable: bool,
    /// Restrict to one owner's records; `None` is the administrator view
    pub scope: Option<UserId>,
}

/// Unbilled/billed activity around the window for one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityActivity {
    /// `None` aggregates records with no linked entity
    pub billing_entity_id: Option<BillingEntityId>,
    pub unbilled_before: bool,
    pub unbilled_after: bool,
    pub billed_in_range: bool,
}

/// Result of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// Every requested row was updated
    Applied { affected: u64 },
    /// Some rows were ineligible; nothing was updated
    Rejected { requested: usize, eligible: usize },
}

/// Read access to time records, material items and billing entities
#[async_trait]
pub trait RecordStore: DomainPort {
    /// Time records dated inside the window that pass the filter
    async fn time_records(&self, filter: &RecordFilter) -> Result<Vec<TimeRecord>, PortError>;

    /// Material items whose parent record is dated inside the window
    ///
    /// The status filter applies to the item's own invoice number.
    async fn material_items(&self, filter: &RecordFilter) -> Result<Vec<MaterialItemRow>, PortError>;

    /// Loads the given entities; unknown ids are skipped
    async fn billing_entities(&self, ids: &[BillingEntityId]) -> Result<Vec<BillingEntity>, PortError>;

    /// Activity flags for every entity with records near the window
    async fn entity_activity(&self, filter: &RecordFilter) -> Result<Vec<EntityActivity>, PortError>;

    /// Loads time records by id regardless of date or status; unknown ids are skipped
    async fn time_records_by_id(&self, ids: &[TimeRecordId]) -> Result<Vec<TimeRecord>, PortError>;

    /// Loads material items by id with their parent's entity; unknown ids are skipped
    async fn material_items_by_id(&self, ids: &[MaterialItemId]) -> Result<Vec<MaterialItemRow>, PortError>;
}

/// Transactional unbilled → billed transition
#[async_trait]
pub trait BillingLockStore: DomainPort {
    /// Marks time records billed under `invoice_number`, all or nothing
    async fn lock_hours(
        &self,
        ids: &[TimeRecordId],
        invoice_number: &str,
    ) -> Result<LockResult, PortError>;

    /// Stamps material items with `invoice_number`, all or nothing
    async fn lock_items(
        &self,
        ids: &[MaterialItemId],
        invoice_number: &str,
    ) -> Result<LockResult, PortError>;
}

/// In-memory implementations for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::RwLock;

    use core_kernel::{HealthCheckResult, HealthCheckable};
    use crate::timesheet::MaterialItem;

    #[derive(Debug, Default)]
    struct State {
        records: BTreeMap<TimeRecordId, TimeRecord>,
        items: BTreeMap<MaterialItemId, MaterialItem>,
        entities: HashMap<BillingEntityId, BillingEntity>,
    }

    /// In-memory record store
    ///
    /// Lock operations run under one write guard, which gives them the same
    /// all-or-nothing visibility as the row-locking transaction.
    #[derive(Debug, Default)]
    pub struct InMemoryBillingStore {
        state: RwLock<State>,
        unavailable: AtomicBool,
    }

    impl InMemoryBillingStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_entity(&self, entity: BillingEntity) {
            self.state.write().await.entities.insert(entity.id, entity);
        }

        pub async fn insert_record(&self, record: TimeRecord) {
            self.state.write().await.records.insert(record.id, record);
        }

        pub async fn insert_item(&self, item: MaterialItem) {
            self.state.write().await.items.insert(item.id, item);
        }

        pub async fn record(&self, id: TimeRecordId) -> Option<TimeRecord> {
            self.state.read().await.records.get(&id).cloned()
        }

        pub async fn item(&self, id: MaterialItemId) -> Option<MaterialItem> {
            self.state.read().await.items.get(&id).cloned()
        }

        /// Makes every call fail with a connection error
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<(), PortError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(PortError::connection("record store unavailable"));
            }
            Ok(())
        }

        fn record_matches(record: &TimeRecord, filter: &RecordFilter) -> bool {
            filter.scope.map_or(true, |user| record.owner_user_id == user)
                && (!filter.only_billable || record.billable)
        }
    }

    impl DomainPort for InMemoryBillingStore {}

    #[async_trait]
    impl HealthCheckable for InMemoryBillingStore {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult::healthy("in-memory-billing-store")
        }
    }

    #[async_trait]
    impl RecordStore for InMemoryBillingStore {
        async fn time_records(&self, filter: &RecordFilter) -> Result<Vec<TimeRecord>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(state
                .records
                .values()
                .filter(|r| filter.window.contains(r.date))
                .filter(|r| Self::record_matches(r, filter))
                .filter(|r| filter.status.admits(r.billed))
                .cloned()
                .collect())
        }

        async fn material_items(&self, filter: &RecordFilter) -> Result<Vec<MaterialItemRow>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(state
                .items
                .values()
                .filter(|item| filter.status.admits(item.is_billed()))
                .filter_map(|item| {
                    let parent = state.records.get(&item.parent_time_record_id)?;
                    if !filter.window.contains(parent.date) || !Self::record_matches(parent, filter) {
                        return None;
                    }
                    Some(MaterialItemRow {
                        item: item.clone(),
                        billing_entity_id: parent.billing_entity_id,
                        project_id: parent.project_id,
                        date: parent.date,
                    })
                })
                .collect())
        }

        async fn billing_entities(&self, ids: &[BillingEntityId]) -> Result<Vec<BillingEntity>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(ids.iter().filter_map(|id| state.entities.get(id).cloned()).collect())
        }

        async fn entity_activity(&self, filter: &RecordFilter) -> Result<Vec<EntityActivity>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            let mut activity: BTreeMap<Option<BillingEntityId>, EntityActivity> = BTreeMap::new();

            for record in state.records.values().filter(|r| Self::record_matches(r, filter)) {
                let entry = activity.entry(record.billing_entity_id).or_insert(EntityActivity {
                    billing_entity_id: record.billing_entity_id,
                    ..Default::default()
                });
                if !record.billed && filter.window.is_before(record.date) {
                    entry.unbilled_before = true;
                }
                if !record.billed && filter.window.is_after(record.date) {
                    entry.unbilled_after = true;
                }
                if record.billed && filter.window.contains(record.date) {
                    entry.billed_in_range = true;
                }
            }

            for item in state.items.values().filter(|i| i.is_billed()) {
                if let Some(parent) = state.records.get(&item.parent_time_record_id) {
                    if filter.window.contains(parent.date) && Self::record_matches(parent, filter) {
                        activity
                            .entry(parent.billing_entity_id)
                            .or_insert(EntityActivity {
                                billing_entity_id: parent.billing_entity_id,
                                ..Default::default()
                            })
                            .billed_in_range = true;
                    }
                }
            }

            Ok(activity.into_values().collect())
        }

        async fn time_records_by_id(&self, ids: &[TimeRecordId]) -> Result<Vec<TimeRecord>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(ids.iter().filter_map(|id| state.records.get(id).cloned()).collect())
        }

        async fn material_items_by_id(&self, ids: &[MaterialItemId]) -> Result<Vec<MaterialItemRow>, PortError> {
            self.check_available()?;
            let state = self.state.read().await;
            Ok(ids
                .iter()
                .filter_map(|id| {
                    let item = state.items.get(id)?;
                    let parent = state.records.get(&item.parent_time_record_id)?;
                    Some(MaterialItemRow {
                        item: item.clone(),
                        billing_entity_id: parent.billing_entity_id,
                        project_id: parent.project_id,
                        date: parent.date,
                    })
                })
                .collect())
        }
    }

    #[async_trait]
    impl BillingLockStore for InMemoryBillingStore {
        async fn lock_hours(
            &self,
            ids: &[TimeRecordId],
            invoice_number: &str,
        ) -> Result<LockResult, PortError> {
            self.check_available()?;
            if ids.is_empty() {
                return Ok(LockResult::Rejected { requested: 0, eligible: 0 });
            }

            let mut state = self.state.write().await;
            let eligible = ids
                .iter()
                .filter(|id| state.records.get(*id).is_some_and(|r| !r.billed))
                .count();
            if eligible != ids.len() {
                return Ok(LockResult::Rejected { requested: ids.len(), eligible });
            }

            for id in ids {
                if let Some(record) = state.records.get_mut(id) {
                    record.billed = true;
                    record.invoice_number = Some(invoice_number.to_string());
                }
            }
            Ok(LockResult::Applied { affected: ids.len() as u64 })
        }

        async fn lock_items(
            &self,
            ids: &[MaterialItemId],
            invoice_number: &str,
        ) -> Result<LockResult, PortError> {
            self.check_available()?;
            if ids.is_empty() {
                return Ok(LockResult::Rejected { requested: 0, eligible: 0 });
            }

            let mut state = self.state.write().await;
            let eligible = ids
                .iter()
                .filter(|id| state.items.get(*id).is_some_and(|i| !i.is_billed()))
                .count();
            if eligible != ids.len() {
                return Ok(LockResult::Rejected { requested: ids.len(), eligible });
            }

            for id in ids {
                if let Some(item) = state.items.get_mut(id) {
                    item.invoice_number = Some(invoice_number.to_string());
                }
            }
            Ok(LockResult::Applied { affected: ids.len() as u64 })
        }
    }
}
