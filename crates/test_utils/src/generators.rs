//! Property-Based Test Generators
//!
//! Provides proptest strategies for billing rows that keep the invariants the
//! record store guarantees: positive ids, quarter-hour durations and dates
//! inside a known window.

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::{BillingEntityId, DateWindow};
use domain_billing::{BillingEntity, CollectionInput, MaterialItemRow, TimeRecord};

use crate::builders::{MaterialItemBuilder, TimeRecordBuilder};
use crate::fixtures::TemporalFixtures;

/// Strategy for dates inside March 2024
pub fn march_date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..31).prop_map(|offset| TemporalFixtures::march(1) + Duration::days(offset))
}

/// Strategy for valid windows starting in 2024
pub fn window_strategy() -> impl Strategy<Value = DateWindow> {
    (0i64..365, 0i64..90).prop_map(|(start, len)| {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN)
            + Duration::days(start);
        DateWindow {
            start,
            end: start + Duration::days(len),
        }
    })
}

/// Strategy for quarter-hour durations between 0.25 and 12 hours
pub fn quarter_hours_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=48).prop_map(|quarters| Decimal::new(quarters * 25, 2))
}

/// Strategy for an entity graph of `owners` billing owners and their children
///
/// Ids run from 1; every child points at one of the owners and some bill
/// directly. Entities with an id divisible by seven have no accounting id.
pub fn entity_graph_strategy(owners: usize, children: usize) -> impl Strategy<Value = Vec<BillingEntity>> {
    let owners = owners.max(1);
    prop::collection::vec((0..owners, any::<bool>()), children).prop_map(move |links| {
        let mut entities: Vec<BillingEntity> = (1..=owners as i64)
            .map(|id| entity(id).as_billing_owner())
            .collect();
        for (offset, (owner, bill_direct)) in links.into_iter().enumerate() {
            let id = (owners + offset + 1) as i64;
            entities.push(
                entity(id)
                    .owned_by(BillingEntityId::new(owner as i64 + 1))
                    .with_bill_direct(bill_direct),
            );
        }
        entities
    })
}

fn entity(id: i64) -> BillingEntity {
    let base = BillingEntity::new(BillingEntityId::new(id), format!("Entity {:03}", id));
    if id % 7 == 0 {
        base
    } else {
        base.with_accounting_id(format!("{}", 900 + id))
    }
}

/// Strategy for time records with unique ids spread over `entity_count`
/// entities plus an unlinked share
pub fn time_records_strategy(
    entity_count: i64,
    max_records: usize,
) -> impl Strategy<Value = Vec<TimeRecord>> {
    prop::collection::vec(
        (
            prop::option::weighted(0.9, 1..=entity_count.max(1)),
            march_date_strategy(),
            quarter_hours_strategy(),
            any::<bool>(),
            prop::bool::weighted(0.2),
        ),
        0..=max_records,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .zip(1i64..)
            .map(|((entity, date, hours, billable, billed), id)| {
                let mut builder = TimeRecordBuilder::new(id).on(date).hours(hours);
                if let Some(entity) = entity {
                    builder = builder.entity(BillingEntityId::new(entity));
                }
                if !billable {
                    builder = builder.non_billable();
                }
                if billed {
                    builder = builder.billed("1000");
                }
                builder.build()
            })
            .collect()
    })
}

/// Strategy for material item rows hanging off the given records
///
/// Each row copies its parent's entity and date.
pub fn material_items_strategy(records: Vec<TimeRecord>) -> BoxedStrategy<Vec<MaterialItemRow>> {
    if records.is_empty() {
        return Just(Vec::new()).boxed();
    }
    let parents = records.len();
    prop::collection::vec(
        (
            0..parents,
            prop::option::of(1i64..5),
            1i32..10,
            prop::bool::weighted(0.2),
        ),
        0..=parents * 2,
    )
    .prop_map(move |rows| {
        rows.into_iter()
            .zip(1i64..)
            .map(|((parent, article, quantity, billed), id)| {
                let parent = &records[parent];
                let mut builder = MaterialItemBuilder::new(id, parent.id.get())
                    .quantity(quantity)
                    .description(format!("Custom {}", id % 3));
                if let Some(article) = article {
                    builder = builder.article(article, format!("Article {}", article));
                }
                if billed {
                    builder = builder.billed("1000");
                }
                MaterialItemRow {
                    item: builder.build(),
                    billing_entity_id: parent.billing_entity_id,
                    project_id: parent.project_id,
                    date: parent.date,
                }
            })
            .collect()
    })
    .boxed()
}

/// Strategy for a full aggregation input over a generated entity graph
pub fn collection_input_strategy() -> impl Strategy<Value = CollectionInput> {
    (1usize..4, 0usize..6)
        .prop_flat_map(|(owners, children)| {
            let entity_count = (owners + children) as i64;
            (
                entity_graph_strategy(owners, children),
                // One id past the graph exercises the unknown-entity path
                time_records_strategy(entity_count + 1, 24),
            )
        })
        .prop_flat_map(|(entities, records)| {
            (
                Just(entities),
                Just(records.clone()),
                material_items_strategy(records),
            )
        })
        .prop_map(|(entities, records, items)| CollectionInput {
            records,
            items,
            entities,
            activity: Vec::new(),
        })
}
