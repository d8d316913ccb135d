//! Pre-built Test Fixtures
//!
//! Consistent data for the common billing scenarios: a billing owner with an
//! owned child, a child that bills directly, an entity with no accounting id,
//! and a standalone customer. All dates fall in March 2024.

use chrono::NaiveDate;
use rust_decimal_macros::dec;

use core_kernel::{BillingEntityId, DateWindow, UserId};
use domain_billing::{BillingEntity, TimeRecord};

use crate::builders::TimeRecordBuilder;

/// Fixture for calendar data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// A day in March 2024
    pub fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap_or(NaiveDate::MIN)
    }

    /// 2024-03-01 to 2024-03-31
    pub fn march_window() -> DateWindow {
        DateWindow {
            start: Self::march(1),
            end: Self::march(31),
        }
    }

    /// 2024-02-01 to 2024-02-29
    pub fn february_window() -> DateWindow {
        DateWindow {
            start: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap_or(NaiveDate::MIN),
        }
    }
}

/// Fixture for billing entities
pub struct EntityFixtures;

impl EntityFixtures {
    pub const OWNER: BillingEntityId = BillingEntityId::new(1);
    pub const OWNED_CHILD: BillingEntityId = BillingEntityId::new(2);
    pub const DIRECT_CHILD: BillingEntityId = BillingEntityId::new(3);
    pub const NO_ACCOUNT: BillingEntityId = BillingEntityId::new(4);
    pub const STANDALONE: BillingEntityId = BillingEntityId::new(5);

    /// Billing owner with accounting id `900`
    pub fn owner() -> BillingEntity {
        BillingEntity::new(Self::OWNER, "Nordic Holding AB")
            .with_accounting_id("900")
            .as_billing_owner()
    }

    /// Child billed through its owner
    pub fn owned_child() -> BillingEntity {
        BillingEntity::new(Self::OWNED_CHILD, "Nordic Service AB")
            .with_accounting_id("901")
            .owned_by(Self::OWNER)
    }

    /// Child with `bill_direct`, billed on its own account
    pub fn direct_child() -> BillingEntity {
        BillingEntity::new(Self::DIRECT_CHILD, "Nordic Retail AB")
            .with_accounting_id("902")
            .owned_by(Self::OWNER)
            .with_bill_direct(true)
    }

    /// Entity that cannot be invoiced
    pub fn no_account() -> BillingEntity {
        BillingEntity::new(Self::NO_ACCOUNT, "Prospect AB")
    }

    /// Customer with its own account `500` and no owner
    pub fn standalone() -> BillingEntity {
        BillingEntity::new(Self::STANDALONE, "Acme AB")
            .with_accounting_id("500")
            .as_billing_owner()
    }

    pub fn all() -> Vec<BillingEntity> {
        vec![
            Self::owner(),
            Self::owned_child(),
            Self::direct_child(),
            Self::no_account(),
            Self::standalone(),
        ]
    }
}

/// Fixture for time records
pub struct RecordFixtures;

impl RecordFixtures {
    pub const TECHNICIAN: UserId = UserId::new(7);
    pub const APPRENTICE: UserId = UserId::new(8);

    /// One unbilled March record per entity plus an unlinked one
    ///
    /// Ids are 1..=6 with 2.5 hours each.
    pub fn march_unbilled() -> Vec<TimeRecord> {
        let entities = [
            Some(EntityFixtures::OWNER),
            Some(EntityFixtures::OWNED_CHILD),
            Some(EntityFixtures::DIRECT_CHILD),
            Some(EntityFixtures::NO_ACCOUNT),
            Some(EntityFixtures::STANDALONE),
            None,
        ];
        entities
            .into_iter()
            .zip(1i64..)
            .map(|(entity, id)| {
                let mut builder = TimeRecordBuilder::new(id)
                    .owner(if id % 2 == 0 { Self::APPRENTICE } else { Self::TECHNICIAN })
                    .on(TemporalFixtures::march(id as u32 + 3))
                    .hours(dec!(2.5));
                if let Some(entity) = entity {
                    builder = builder.entity(entity);
                }
                builder.build()
            })
            .collect()
    }
}
