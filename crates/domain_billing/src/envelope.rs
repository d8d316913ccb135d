//! Billing envelopes
//!
//! One envelope per billing entity per collection call. Envelopes live for a
//! single request and are never persisted.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ArticleId, BillingEntityId, MaterialItemId, TimeRecordId};
use crate::bill_target::BillTarget;
use crate::grouping::InvoiceLine;
use crate::timesheet::{normalize_description, BillingEntity, MaterialItemRow, TimeRecord};

/// Identifies the bucket a row lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum BucketKey {
    Entity(BillingEntityId),
    /// Rows whose entity is missing or unknown
    Unlinked,
}

/// Running totals of a bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketTotals {
    pub hours: Decimal,
    pub billable_hours: Decimal,
    pub unbilled_hours: Decimal,
    pub record_count: usize,
    pub item_count: usize,
    pub item_quantity: i64,
}

/// Registered article tally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleCount {
    pub article_id: ArticleId,
    pub name: Option<String>,
    pub quantity: i64,
    pub occurrences: usize,
}

/// Custom item tally keyed by normalized description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomItemCount {
    pub key: String,
    /// Description as first seen
    pub label: String,
    pub quantity: i64,
    pub occurrences: usize,
}

/// Histogram of material items, split into registered and custom articles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleHistogram {
    pub registered: Vec<ArticleCount>,
    pub custom: Vec<CustomItemCount>,
    #[serde(skip)]
    registered_index: HashMap<ArticleId, usize>,
    #[serde(skip)]
    custom_index: HashMap<String, usize>,
}

impl ArticleHistogram {
    /// Tallies one item
    pub fn record(&mut self, row: &MaterialItemRow) {
        let quantity = i64::from(row.item.quantity);

        match row.item.registered_article() {
            Some(article_id) => {
                let position = *self.registered_index.entry(article_id).or_insert_with(|| {
                    self.registered.push(ArticleCount {
                        article_id,
                        name: row.item.article_name.clone(),
                        quantity: 0,
                        occurrences: 0,
                    });
                    self.registered.len() - 1
                });
                let entry = &mut self.registered[position];
                entry.quantity += quantity;
                entry.occurrences += 1;
            }
            None => {
                let key = normalize_description(&row.item.description);
                let position = *self.custom_index.entry(key.clone()).or_insert_with(|| {
                    self.custom.push(CustomItemCount {
                        key,
                        label: row.item.description.trim().to_string(),
                        quantity: 0,
                        occurrences: 0,
                    });
                    self.custom.len() - 1
                });
                let entry = &mut self.custom[position];
                entry.quantity += quantity;
                entry.occurrences += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.custom.is_empty()
    }
}

/// The exact ids a settlement of this envelope would lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LockSet {
    pub time_report_ids: Vec<TimeRecordId>,
    pub time_report_item_ids: Vec<MaterialItemId>,
}

impl LockSet {
    pub fn is_empty(&self) -> bool {
        self.time_report_ids.is_empty() && self.time_report_item_ids.is_empty()
    }
}

/// Read-only display flags
///
/// Derived for the administrator's view only; the lock operation re-checks
/// eligibility itself and never consults these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    /// Unbilled work exists strictly before the window
    pub unbilled_before: bool,
    /// Unbilled work exists strictly after the window
    pub unbilled_after: bool,
    /// Some in-range row is already billed
    pub has_billed_in_range: bool,
    /// Billed and unbilled rows coexist in range
    pub mixed: bool,
    /// The entity resolves to an accounting target
    pub billable: bool,
}

/// Aggregate of one billing entity's rows for one collection call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEnvelope {
    pub key: BucketKey,
    /// `None` for the unlinked bucket
    pub company: Option<BillingEntity>,
    pub billing_info: BillTarget,
    pub total: BucketTotals,
    pub timecards: Vec<TimeRecord>,
    pub items: Vec<MaterialItemRow>,
    pub articles: ArticleHistogram,
    pub lines: Vec<InvoiceLine>,
    pub locks: LockSet,
    pub meta: EnvelopeMeta,
}

impl BillingEnvelope {
    /// Creates an empty bucket
    pub fn new(key: BucketKey, company: Option<BillingEntity>, billing_info: BillTarget) -> Self {
        let billable = billing_info.is_billable();
        Self {
            key,
            company,
            billing_info,
            total: BucketTotals::default(),
            timecards: Vec::new(),
            items: Vec::new(),
            articles: ArticleHistogram::default(),
            lines: Vec::new(),
            locks: LockSet::default(),
            meta: EnvelopeMeta {
                billable,
                ..Default::default()
            },
        }
    }

    /// Adds a time record to the bucket
    pub fn push_record(&mut self, record: TimeRecord) {
        self.total.hours += record.hours;
        self.total.record_count += 1;
        if record.billable {
            self.total.billable_hours += record.hours;
        }
        if record.is_lockable() {
            self.total.unbilled_hours += record.hours;
        }
        self.timecards.push(record);
    }

    /// Adds a material item to the bucket
    pub fn push_item(&mut self, row: MaterialItemRow) {
        self.total.item_count += 1;
        self.total.item_quantity += i64::from(row.item.quantity);
        self.articles.record(&row);
        self.items.push(row);
    }

    /// Entity display name; the unlinked bucket has none
    pub fn name(&self) -> Option<&str> {
        self.company.as_ref().map(|c| c.name.as_str())
    }

    /// Unbilled time records in bucket order
    pub fn unbilled_records(&self) -> Vec<TimeRecord> {
        self.timecards.iter().filter(|r| r.is_lockable()).cloned().collect()
    }

    /// Unbilled material items in bucket order
    pub fn unbilled_items(&self) -> Vec<MaterialItemRow> {
        self.items.iter().filter(|r| !r.item.is_billed()).cloned().collect()
    }

    /// Returns true when any collected row is already billed
    pub fn contains_billed_rows(&self) -> bool {
        self.timecards.iter().any(|r| r.billed) || self.items.iter().any(|r| r.item.is_billed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_kernel::{MaterialItemId, TimeRecordId};
    use crate::timesheet::MaterialItem;

    fn item(id: i64, article: Option<i64>, description: &str, quantity: i32) -> MaterialItemRow {
        MaterialItemRow {
            item: MaterialItem {
                id: MaterialItemId::new(id),
                parent_time_record_id: TimeRecordId::new(1),
                article_id: article.map(ArticleId::new),
                article_name: None,
                quantity,
                description: description.to_string(),
                invoice_number: None,
            },
            billing_entity_id: None,
            project_id: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_histogram_splits_registered_and_custom() {
        let mut histogram = ArticleHistogram::default();
        histogram.record(&item(1, Some(4), "Pipe", 2));
        histogram.record(&item(2, None, " Tape ", 1));
        histogram.record(&item(3, Some(4), "Pipe", 3));
        histogram.record(&item(4, None, "TAPE", 5));

        assert_eq!(histogram.registered.len(), 1);
        assert_eq!(histogram.registered[0].quantity, 5);
        assert_eq!(histogram.registered[0].occurrences, 2);
        assert_eq!(histogram.custom.len(), 1);
        assert_eq!(histogram.custom[0].key, "tape");
        assert_eq!(histogram.custom[0].label, "Tape");
        assert_eq!(histogram.custom[0].quantity, 6);
    }

    #[test]
    fn test_unlinked_key_serialization() {
        let json = serde_json::to_value(BucketKey::Unlinked).unwrap();
        assert_eq!(json["kind"], "unlinked");
    }
}
