//! Worklog queue DTOs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use domain_documents::{EnqueueItem, Language, WorklogRow};

#[derive(Debug, Deserialize, Validate)]
pub struct QueueRequest {
    #[validate(length(max = 500))]
    pub items: Vec<QueueItem>,
}

/// One worklog to generate
///
/// Fields are optional so a bad item is counted as rejected instead of
/// failing the whole request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub invoice_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub customer_name: Option<String>,
    #[serde(default)]
    pub rows: Vec<WorklogRow>,
    pub period: Option<Period>,
    pub company_id: Option<i64>,
    pub language: Option<Language>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Period {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl From<QueueItem> for EnqueueItem {
    fn from(item: QueueItem) -> Self {
        let period = item.period.unwrap_or_default();
        EnqueueItem {
            invoice_id: item.invoice_id,
            invoice_number: item.invoice_number,
            customer_name: item.customer_name,
            rows: item.rows,
            period_from: period.from,
            period_to: period.to,
            company_id: item.company_id,
            language: item.language,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub ok: bool,
    pub id: i64,
}
