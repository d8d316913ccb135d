//! Property tests for identifiers and date windows

use chrono::{Days, NaiveDate};
use proptest::prelude::*;

use core_kernel::{BillingEntityId, DateWindow, TimeRecordId};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

proptest! {
    #[test]
    fn prop_id_display_roundtrips(raw in 1i64..i64::MAX) {
        let id = TimeRecordId::new(raw);
        let parsed: TimeRecordId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    #[test]
    fn prop_window_classifies_every_date_exactly_once(
        start_offset in 0u64..365,
        len in 0u64..90,
        offset in 0u64..600,
    ) {
        let start = base_date() + Days::new(start_offset);
        let end = start + Days::new(len);
        let window = DateWindow::new(start, end).unwrap();
        let date = base_date() + Days::new(offset);

        let hits = [window.is_before(date), window.contains(date), window.is_after(date)]
            .iter()
            .filter(|b| **b)
            .count();
        prop_assert_eq!(hits, 1);
    }
}

#[test]
fn test_entity_id_validity() {
    assert!(BillingEntityId::new(1).is_valid());
    assert!(!BillingEntityId::new(0).is_valid());
    assert!(!BillingEntityId::new(-4).is_valid());
}
