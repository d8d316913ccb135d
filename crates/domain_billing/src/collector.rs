//! Billing collection
//!
//! Reads time and material rows for a window and builds one envelope per
//! billing entity. Rows whose entity is missing or unknown land in a single
//! unlinked bucket so they stay visible.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument};

use core_kernel::{BillingEntityId, DateWindow, UserId};

use crate::bill_target::{BillTarget, BillTargetResolver};
use crate::envelope::{BillingEnvelope, BucketKey, LockSet};
use crate::error::BillingError;
use crate::grouping::{GroupingPolicy, InvoiceLineGrouper};
use crate::ports::{EntityActivity, RecordFilter, RecordStore};
use crate::timesheet::{BillingEntity, MaterialItemRow, StatusFilter, TimeRecord};

/// Parameters of a collection call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectQuery {
    pub window: DateWindow,
    pub status: StatusFilter,
    pub only_billable: bool,
    pub scope: Option<UserId>,
    pub grouping: GroupingPolicy,
}

impl CollectQuery {
    /// Creates an administrator-scoped query over unbilled rows
    pub fn new(window: DateWindow) -> Self {
        Self {
            window,
            status: StatusFilter::Unbilled,
            only_billable: false,
            scope: None,
            grouping: GroupingPolicy::default(),
        }
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn only_billable(mut self, only_billable: bool) -> Self {
        self.only_billable = only_billable;
        self
    }

    pub fn scoped_to(mut self, user: UserId) -> Self {
        self.scope = Some(user);
        self
    }

    pub fn with_grouping(mut self, grouping: GroupingPolicy) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn filter(&self) -> RecordFilter {
        RecordFilter {
            window: self.window,
            status: self.status,
            only_billable: self.only_billable,
            scope: self.scope,
        }
    }
}

/// Everything the aggregation needs, already loaded
#[derive(Debug, Clone, Default)]
pub struct CollectionInput {
    pub records: Vec<TimeRecord>,
    pub items: Vec<MaterialItemRow>,
    /// Entities referenced by rows plus their owners
    pub entities: Vec<BillingEntity>,
    pub activity: Vec<EntityActivity>,
}

/// Builds billing envelopes from the record store
pub struct BillingCollector {
    store: Arc<dyn RecordStore>,
}

impl BillingCollector {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Loads rows for the query and aggregates them
    #[instrument(skip(self), fields(window = %query.window, status = query.status.as_str()))]
    pub async fn collect(&self, query: &CollectQuery) -> Result<Vec<BillingEnvelope>, BillingError> {
        let filter = query.filter();

        let records = self.store.time_records(&filter).await?;
        let items = self.store.material_items(&filter).await?;
        let activity = self.store.entity_activity(&filter).await?;

        let referenced: BTreeSet<BillingEntityId> = records
            .iter()
            .filter_map(|r| r.billing_entity_id)
            .chain(items.iter().filter_map(|i| i.billing_entity_id))
            .chain(activity.iter().filter_map(|a| a.billing_entity_id))
            .collect();
        let referenced: Vec<BillingEntityId> = referenced.into_iter().collect();

        let mut entities = self.store.billing_entities(&referenced).await?;
        let owners: Vec<BillingEntityId> = entities
            .iter()
            .filter_map(|e| e.owner_entity_id)
            .filter(|owner| !referenced.contains(owner))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !owners.is_empty() {
            entities.extend(self.store.billing_entities(&owners).await?);
        }

        debug!(
            records = records.len(),
            items = items.len(),
            entities = entities.len(),
            "Loaded billing rows"
        );

        Ok(aggregate(
            CollectionInput {
                records,
                items,
                entities,
                activity,
            },
            query.grouping,
        ))
    }
}

/// Pure aggregation of loaded rows into envelopes
///
/// Buckets are ordered by entity name (case-insensitive, then id) with the
/// unlinked bucket last. Rows inside a bucket are ordered by date, then id.
/// Entities that only show up in `activity` get an empty envelope so their
/// out-of-window flags are still visible.
pub fn aggregate(input: CollectionInput, grouping: GroupingPolicy) -> Vec<BillingEnvelope> {
    let resolver = BillTargetResolver::new(input.entities);
    let grouper = InvoiceLineGrouper::new(grouping);

    let mut buckets: HashMap<BucketKey, BillingEnvelope> = HashMap::new();
    let bucket_for = |id: Option<BillingEntityId>| -> BucketKey {
        match id {
            Some(id) if resolver.entity(id).is_some() => BucketKey::Entity(id),
            _ => BucketKey::Unlinked,
        }
    };
    let open = |key: BucketKey| -> BillingEnvelope {
        match key {
            BucketKey::Entity(id) => {
                let entity = resolver.entity(id).cloned();
                let target = resolver.resolve_id(id);
                BillingEnvelope::new(key, entity, target)
            }
            BucketKey::Unlinked => BillingEnvelope::new(key, None, BillTarget::none()),
        }
    };

    let mut records = input.records;
    records.sort_by_key(|r| (r.date, r.id));
    for record in records {
        let key = bucket_for(record.billing_entity_id);
        buckets.entry(key).or_insert_with(|| open(key)).push_record(record);
    }

    let mut items = input.items;
    items.sort_by_key(|i| (i.date, i.item.id));
    for row in items {
        let key = bucket_for(row.billing_entity_id);
        buckets.entry(key).or_insert_with(|| open(key)).push_item(row);
    }

    for activity in &input.activity {
        let key = bucket_for(activity.billing_entity_id);
        let has_flags = activity.unbilled_before || activity.unbilled_after || activity.billed_in_range;
        if !has_flags && !buckets.contains_key(&key) {
            continue;
        }
        let envelope = buckets.entry(key).or_insert_with(|| open(key));
        envelope.meta.unbilled_before |= activity.unbilled_before;
        envelope.meta.unbilled_after |= activity.unbilled_after;
        envelope.meta.has_billed_in_range |= activity.billed_in_range;
    }

    let mut envelopes: Vec<BillingEnvelope> = buckets.into_values().collect();
    for envelope in &mut envelopes {
        finish(envelope, &grouper);
    }

    envelopes.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    envelopes
}

fn finish(envelope: &mut BillingEnvelope, grouper: &InvoiceLineGrouper) {
    let records = envelope.unbilled_records();
    let items = envelope.unbilled_items();

    envelope.meta.has_billed_in_range |= envelope.contains_billed_rows();
    envelope.meta.mixed =
        envelope.meta.has_billed_in_range && !(records.is_empty() && items.is_empty());

    envelope.lines = grouper.group(&records, &items);
    envelope.locks = LockSet {
        time_report_ids: records.iter().map(|r| r.id).collect(),
        time_report_item_ids: items.iter().map(|i| i.item.id).collect(),
    };
}

fn sort_key(envelope: &BillingEnvelope) -> (bool, String, i64) {
    match envelope.key {
        BucketKey::Entity(id) => (
            false,
            envelope.name().unwrap_or_default().to_lowercase(),
            id.get(),
        ),
        BucketKey::Unlinked => (true, String::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_kernel::{MaterialItemId, TimeRecordId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use crate::timesheet::MaterialItem;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(id: i64, entity: Option<i64>, date: NaiveDate, hours: Decimal, billed: bool) -> TimeRecord {
        TimeRecord {
            id: TimeRecordId::new(id),
            owner_user_id: UserId::new(1),
            billing_entity_id: entity.map(BillingEntityId::new),
            project_id: None,
            category_id: None,
            category_name: None,
            date,
            hours,
            billable: true,
            billed,
            invoice_number: billed.then(|| "1001".to_string()),
            work_label: None,
            description: None,
        }
    }

    fn item(id: i64, parent: i64, entity: Option<i64>, billed: bool) -> MaterialItemRow {
        MaterialItemRow {
            item: MaterialItem {
                id: MaterialItemId::new(id),
                parent_time_record_id: TimeRecordId::new(parent),
                article_id: None,
                article_name: None,
                quantity: 2,
                description: "Fuse".to_string(),
                invoice_number: billed.then(|| "1001".to_string()),
            },
            billing_entity_id: entity.map(BillingEntityId::new),
            project_id: None,
            date: day(5),
        }
    }

    fn entities() -> Vec<BillingEntity> {
        vec![
            BillingEntity::new(BillingEntityId::new(1), "beta AB")
                .with_accounting_id("10")
                .as_billing_owner(),
            BillingEntity::new(BillingEntityId::new(2), "Alpha AB")
                .owned_by(BillingEntityId::new(1)),
        ]
    }

    #[test]
    fn test_one_bucket_per_entity_with_unlinked_last() {
        let input = CollectionInput {
            records: vec![
                record(1, Some(1), day(3), dec!(2), false),
                record(2, Some(2), day(2), dec!(1), false),
                record(3, None, day(4), dec!(1), false),
                record(4, Some(99), day(4), dec!(3), false),
                record(5, Some(1), day(1), dec!(1.5), false),
            ],
            entities: entities(),
            ..Default::default()
        };

        let envelopes = aggregate(input, GroupingPolicy::default());

        assert_eq!(envelopes.len(), 3);
        assert_eq!(envelopes[0].name(), Some("Alpha AB"));
        assert_eq!(envelopes[1].name(), Some("beta AB"));
        assert_eq!(envelopes[2].key, BucketKey::Unlinked);
        assert_eq!(envelopes[2].total.record_count, 2);
        assert_eq!(envelopes[2].total.hours, dec!(4));

        let beta = &envelopes[1];
        assert_eq!(beta.total.hours, dec!(3.5));
        assert_eq!(beta.timecards[0].id, TimeRecordId::new(5));
        assert_eq!(
            beta.locks.time_report_ids,
            vec![TimeRecordId::new(5), TimeRecordId::new(1)]
        );
    }

    #[test]
    fn test_owner_target_resolved_per_envelope() {
        let input = CollectionInput {
            records: vec![record(1, Some(2), day(3), dec!(2), false)],
            entities: entities(),
            ..Default::default()
        };

        let envelopes = aggregate(input, GroupingPolicy::default());
        assert_eq!(envelopes[0].billing_info.target.as_deref(), Some("10"));
        assert!(envelopes[0].meta.billable);
    }

    #[test]
    fn test_billed_rows_are_shown_but_never_locked() {
        let input = CollectionInput {
            records: vec![
                record(1, Some(1), day(3), dec!(2), true),
                record(2, Some(1), day(4), dec!(1), false),
            ],
            items: vec![item(7, 1, Some(1), true), item(8, 2, Some(1), false)],
            entities: entities(),
            ..Default::default()
        };

        let envelopes = aggregate(input, GroupingPolicy::default());
        let beta = &envelopes[0];

        assert!(beta.meta.has_billed_in_range);
        assert!(beta.meta.mixed);
        assert_eq!(beta.locks.time_report_ids, vec![TimeRecordId::new(2)]);
        assert_eq!(beta.locks.time_report_item_ids, vec![MaterialItemId::new(8)]);
        assert_eq!(beta.total.item_count, 2);
        assert_eq!(beta.lines.len(), 2);
    }

    #[test]
    fn test_activity_flags_merge_and_open_empty_buckets() {
        let input = CollectionInput {
            records: vec![record(1, Some(1), day(3), dec!(2), false)],
            entities: entities(),
            activity: vec![
                EntityActivity {
                    billing_entity_id: Some(BillingEntityId::new(1)),
                    unbilled_before: true,
                    ..Default::default()
                },
                EntityActivity {
                    billing_entity_id: Some(BillingEntityId::new(2)),
                    unbilled_after: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let envelopes = aggregate(input, GroupingPolicy::default());
        assert_eq!(envelopes.len(), 2);

        let alpha = &envelopes[0];
        assert!(alpha.meta.unbilled_after);
        assert!(alpha.timecards.is_empty());
        assert!(alpha.locks.is_empty());

        let beta = &envelopes[1];
        assert!(beta.meta.unbilled_before);
        assert!(!beta.meta.mixed);
    }

    #[test]
    fn test_unlinked_bucket_has_no_target() {
        let input = CollectionInput {
            records: vec![record(1, None, day(3), dec!(2), false)],
            ..Default::default()
        };

        let envelopes = aggregate(input, GroupingPolicy::default());
        assert_eq!(envelopes.len(), 1);
        assert!(!envelopes[0].meta.billable);
        assert!(envelopes[0].company.is_none());
        assert_eq!(envelopes[0].locks.time_report_ids.len(), 1);
    }
}
