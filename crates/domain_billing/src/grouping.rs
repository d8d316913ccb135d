//! Invoice line grouping
//!
//! Turns a bucket's raw labor and material rows into invoice-line candidates.
//! Grouping keys are tagged enums so the policy stays exhaustive; each line
//! keeps the exact ids that contributed to it so a later lock can be traced
//! back to the source rows.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ArticleId, CategoryId, MaterialItemId, ProjectId, TimeRecordId};
use crate::timesheet::{normalize_description, MaterialItemRow, TimeRecord};

/// Description used when a work label is missing
pub const NO_LABEL: &str = "(no label)";

/// Description used for single-line labor grouping
pub const WORK_LINE: &str = "Work";

/// How labor hours are folded into lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaborGrouping {
    /// All hours on one line
    #[default]
    Single,
    /// One line per category
    ByCategory,
    /// One line per free-text work label
    ByWorkLabel,
}

/// How material items are folded into lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemGrouping {
    /// Registered items by article, custom items by description
    #[default]
    ByArticle,
    /// Every item by normalized description
    ByDescription,
}

/// Grouping policy applied to one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingPolicy {
    #[serde(default)]
    pub labor: LaborGrouping,
    #[serde(default)]
    pub items: ItemGrouping,
    #[serde(default)]
    pub include_project_dimension: bool,
}

/// Labor grouping selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum LaborKey {
    All,
    Category(Option<CategoryId>),
    WorkLabel(String),
}

/// Material grouping selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ItemKey {
    Article(ArticleId),
    Custom(String),
}

/// Full key of an invoice line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LineKey {
    Labor {
        selector: LaborKey,
        project: Option<ProjectId>,
    },
    Material {
        selector: ItemKey,
        project: Option<ProjectId>,
    },
}

/// An invoice-line candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub key: LineKey,
    pub description: String,
    /// Hours for labor lines, item count for material lines
    pub quantity: Decimal,
    pub article_id: Option<ArticleId>,
    pub time_record_ids: Vec<TimeRecordId>,
    pub item_ids: Vec<MaterialItemId>,
}

impl InvoiceLine {
    pub fn is_labor(&self) -> bool {
        matches!(self.key, LineKey::Labor { .. })
    }
}

/// Folds rows into lines, preserving first-seen order of keys
struct LineAccumulator {
    lines: Vec<InvoiceLine>,
    index: HashMap<LineKey, usize>,
}

impl LineAccumulator {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn entry(&mut self, key: LineKey, describe: impl FnOnce() -> (String, Option<ArticleId>)) -> &mut InvoiceLine {
        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                let (description, article_id) = describe();
                self.lines.push(InvoiceLine {
                    key: key.clone(),
                    description,
                    quantity: Decimal::ZERO,
                    article_id,
                    time_record_ids: Vec::new(),
                    item_ids: Vec::new(),
                });
                self.index.insert(key, self.lines.len() - 1);
                self.lines.len() - 1
            }
        };
        &mut self.lines[position]
    }

    fn finish(self) -> Vec<InvoiceLine> {
        self.lines
    }
}

/// Groups a bucket's rows into invoice-line candidates
#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceLineGrouper {
    policy: GroupingPolicy,
}

impl InvoiceLineGrouper {
    pub fn new(policy: GroupingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> GroupingPolicy {
        self.policy
    }

    /// Emits labor lines followed by material lines
    pub fn group(&self, records: &[TimeRecord], items: &[MaterialItemRow]) -> Vec<InvoiceLine> {
        let mut lines = self.group_labor(records);
        lines.extend(self.group_items(items));
        lines
    }

    /// Labor lines in first-seen key order
    pub fn group_labor(&self, records: &[TimeRecord]) -> Vec<InvoiceLine> {
        let mut acc = LineAccumulator::new();

        for record in records {
            let selector = self.labor_selector(record);
            let key = LineKey::Labor {
                selector: selector.clone(),
                project: self.project(record.project_id),
            };
            let line = acc.entry(key, || (labor_description(&selector, record), None));
            line.quantity += record.hours;
            line.time_record_ids.push(record.id);
        }

        acc.finish()
    }

    /// Material lines in first-seen key order
    pub fn group_items(&self, items: &[MaterialItemRow]) -> Vec<InvoiceLine> {
        let mut acc = LineAccumulator::new();

        for row in items {
            let selector = self.item_selector(row);
            let key = LineKey::Material {
                selector: selector.clone(),
                project: self.project(row.project_id),
            };
            let line = acc.entry(key, || {
                let description = row
                    .item
                    .article_name
                    .clone()
                    .filter(|_| matches!(selector, ItemKey::Article(_)))
                    .unwrap_or_else(|| row.item.description.trim().to_string());
                (description, row.item.registered_article())
            });
            // A merged line names an article only when every item shares it
            if line.article_id != row.item.registered_article() {
                line.article_id = None;
            }
            line.quantity += Decimal::from(row.item.quantity);
            line.item_ids.push(row.item.id);
        }

        acc.finish()
    }

    fn labor_selector(&self, record: &TimeRecord) -> LaborKey {
        match self.policy.labor {
            LaborGrouping::Single => LaborKey::All,
            LaborGrouping::ByCategory => LaborKey::Category(record.category_id),
            LaborGrouping::ByWorkLabel => LaborKey::WorkLabel(
                record
                    .work_label
                    .as_deref()
                    .map(normalize_description)
                    .unwrap_or_default(),
            ),
        }
    }

    fn item_selector(&self, row: &MaterialItemRow) -> ItemKey {
        match (self.policy.items, row.item.registered_article()) {
            (ItemGrouping::ByArticle, Some(article)) => ItemKey::Article(article),
            _ => ItemKey::Custom(normalize_description(&row.item.description)),
        }
    }

    fn project(&self, project: Option<ProjectId>) -> Option<ProjectId> {
        if self.policy.include_project_dimension {
            project
        } else {
            None
        }
    }
}

fn labor_description(selector: &LaborKey, first: &TimeRecord) -> String {
    match selector {
        LaborKey::All => WORK_LINE.to_string(),
        LaborKey::Category(id) => first
            .category_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| id.map(|id| format!("Category {}", id.get())))
            .unwrap_or_else(|| WORK_LINE.to_string()),
        LaborKey::WorkLabel(label) if label.is_empty() => NO_LABEL.to_string(),
        LaborKey::WorkLabel(_) => first
            .work_label
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
    }
}
