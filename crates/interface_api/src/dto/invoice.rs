//! Invoice DTOs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use domain_billing::{GroupingPolicy, LockSet, SettlementOutcome, SettlementRequest, StatusFilter};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub only_billable: bool,
    #[serde(default)]
    pub grouping: GroupingPolicy,
    /// Restrict to one record owner; billing administrators only
    #[validate(range(min = 1))]
    pub user_id: Option<i64>,
}

/// Body of both lock-and-mark routes
///
/// The hours route reads `locks.timeReportIds`, the items route reads
/// `locks.timeReportItemIds`; the other list is ignored.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    #[validate(length(min = 1, max = 64))]
    pub invoice_number: String,
    #[serde(default)]
    pub locks: LockSet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub ok: bool,
    pub affected: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SettleRequest {
    #[validate(length(min = 1, max = 200))]
    pub items: Vec<SettlementRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SettleResponse {
    pub complete: usize,
    pub failed: usize,
    pub outcomes: Vec<SettlementOutcome>,
}

impl From<Vec<SettlementOutcome>> for SettleResponse {
    fn from(outcomes: Vec<SettlementOutcome>) -> Self {
        let complete = outcomes.iter().filter(|o| o.is_complete()).count();
        Self {
            complete,
            failed: outcomes.len() - complete,
            outcomes,
        }
    }
}
