//! Custom Test Assertions
//!
//! Assertion helpers for billing envelopes and document jobs that report
//! which bucket or row broke, not just that something did.

use std::collections::HashSet;

use rust_decimal::Decimal;

use core_kernel::{DocumentJobId, MaterialItemId, TimeRecordId};
use domain_billing::{BillingEnvelope, TimeRecord};
use domain_documents::{DocumentJob, JobStatus};

/// Asserts that envelope totals add up to the hours of the input records
///
/// # Panics
///
/// Panics if any record's hours are lost or counted twice
pub fn assert_hours_conserved(records: &[TimeRecord], envelopes: &[BillingEnvelope]) {
    let expected: Decimal = records.iter().map(|r| r.hours).sum();
    let actual: Decimal = envelopes.iter().map(|e| e.total.hours).sum();
    assert_eq!(
        actual, expected,
        "Hours not conserved: envelopes hold {}, records hold {}",
        actual, expected
    );

    let labor: Decimal = envelopes
        .iter()
        .flat_map(|e| e.lines.iter().filter(|l| l.is_labor()))
        .map(|l| l.quantity)
        .sum();
    let unbilled: Decimal = envelopes.iter().map(|e| e.total.unbilled_hours).sum();
    assert_eq!(
        labor, unbilled,
        "Labor lines carry {} hours, unbilled total is {}",
        labor, unbilled
    );
}

/// Asserts that every id appears in exactly one envelope's timecards or items
pub fn assert_each_id_once(envelopes: &[BillingEnvelope]) {
    let mut records = HashSet::new();
    let mut items = HashSet::new();
    for envelope in envelopes {
        for record in &envelope.timecards {
            assert!(
                records.insert(record.id),
                "Time record {} appears in more than one envelope",
                record.id
            );
        }
        for row in &envelope.items {
            assert!(
                items.insert(row.item.id),
                "Material item {} appears in more than one envelope",
                row.item.id
            );
        }
    }
}

/// Asserts that lock sets only name unbilled rows of their own envelope
pub fn assert_locks_unbilled(envelopes: &[BillingEnvelope]) {
    for envelope in envelopes {
        let unbilled: HashSet<TimeRecordId> =
            envelope.unbilled_records().iter().map(|r| r.id).collect();
        let locks: HashSet<TimeRecordId> =
            envelope.locks.time_report_ids.iter().copied().collect();
        assert_eq!(
            locks, unbilled,
            "Lock set of {:?} does not match its unbilled records",
            envelope.key
        );

        let unbilled_items: HashSet<MaterialItemId> =
            envelope.unbilled_items().iter().map(|r| r.item.id).collect();
        let item_locks: HashSet<MaterialItemId> =
            envelope.locks.time_report_item_ids.iter().copied().collect();
        assert_eq!(
            item_locks, unbilled_items,
            "Item lock set of {:?} does not match its unbilled items",
            envelope.key
        );
    }
}

/// Asserts a job's status and attempt count
pub fn assert_job_status(job: Option<&DocumentJob>, id: DocumentJobId, status: JobStatus, attempts: u32) {
    let Some(job) = job else {
        panic!("Job {} not found", id);
    };
    assert_eq!(job.status, status, "Job {} has status {:?}", id, job.status);
    assert_eq!(
        job.attempts, attempts,
        "Job {} has {} attempts, expected {}",
        id, job.attempts, attempts
    );
}
