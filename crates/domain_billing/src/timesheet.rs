//! Time records, material items and billing entities
//!
//! These are the raw rows the settlement core reads from the record store.
//! Only the lock manager ever mutates their billed state.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{
    ArticleId, BillingEntityId, CategoryId, MaterialItemId, ProjectId, TimeRecordId, UserId,
};

/// A reported block of hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRecord {
    pub id: TimeRecordId,
    pub owner_user_id: UserId,
    /// `None` when the record was never linked to a company
    pub billing_entity_id: Option<BillingEntityId>,
    pub project_id: Option<ProjectId>,
    pub category_id: Option<CategoryId>,
    /// Category display name, joined in by the store
    pub category_name: Option<String>,
    pub date: NaiveDate,
    pub hours: Decimal,
    pub billable: bool,
    pub billed: bool,
    pub invoice_number: Option<String>,
    /// Free-text label the user attached to the work
    pub work_label: Option<String>,
    pub description: Option<String>,
}

impl TimeRecord {
    /// Returns true when the record may still be locked
    pub fn is_lockable(&self) -> bool {
        !self.billed
    }
}

/// A material line hanging off a time record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialItem {
    pub id: MaterialItemId,
    pub parent_time_record_id: TimeRecordId,
    /// `None` or a non-positive id marks a custom free-text item
    pub article_id: Option<ArticleId>,
    /// Registered article name, joined in by the store
    pub article_name: Option<String>,
    pub quantity: i32,
    pub description: String,
    pub invoice_number: Option<String>,
}

impl MaterialItem {
    /// The article this item refers to, if it is a registered article
    pub fn registered_article(&self) -> Option<ArticleId> {
        self.article_id.filter(|id| id.is_valid())
    }

    /// Items track billing independently through their own invoice number
    pub fn is_billed(&self) -> bool {
        self.invoice_number
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty())
    }
}

/// A material item together with the parent fields it is bucketed by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialItemRow {
    pub item: MaterialItem,
    pub billing_entity_id: Option<BillingEntityId>,
    pub project_id: Option<ProjectId>,
    pub date: NaiveDate,
}

/// A company that time and materials are attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEntity {
    pub id: BillingEntityId,
    pub name: String,
    /// Customer number in the external accounting system
    pub external_accounting_id: Option<String>,
    pub is_billing_owner: bool,
    /// Single-hop reference to the entity that pays for this one
    pub owner_entity_id: Option<BillingEntityId>,
    pub bill_direct: bool,
}

impl BillingEntity {
    /// Creates an entity with no account, no owner and no billing flags
    pub fn new(id: BillingEntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            external_accounting_id: None,
            is_billing_owner: false,
            owner_entity_id: None,
            bill_direct: false,
        }
    }

    /// Sets the external accounting id
    pub fn with_accounting_id(mut self, id: impl Into<String>) -> Self {
        self.external_accounting_id = Some(id.into());
        self
    }

    /// Marks the entity as a billing owner
    pub fn as_billing_owner(mut self) -> Self {
        self.is_billing_owner = true;
        self
    }

    /// Links the entity to its owner
    pub fn owned_by(mut self, owner: BillingEntityId) -> Self {
        self.owner_entity_id = Some(owner);
        self
    }

    /// Sets the bill-direct override
    pub fn with_bill_direct(mut self, bill_direct: bool) -> Self {
        self.bill_direct = bill_direct;
        self
    }
}

/// Which rows a collection should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    Unbilled,
    Billed,
    All,
}

impl StatusFilter {
    /// Checks a row's billed state against the filter
    pub fn admits(&self, billed: bool) -> bool {
        match self {
            StatusFilter::Unbilled => !billed,
            StatusFilter::Billed => billed,
            StatusFilter::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Unbilled => "unbilled",
            StatusFilter::Billed => "billed",
            StatusFilter::All => "all",
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unbilled" => Ok(StatusFilter::Unbilled),
            "billed" => Ok(StatusFilter::Billed),
            "all" => Ok(StatusFilter::All),
            other => Err(format!("unknown status filter '{}'", other)),
        }
    }
}

/// Normalizes a free-text description into a grouping key
///
/// Trims, collapses internal whitespace and lowercases.
pub fn normalize_description(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
