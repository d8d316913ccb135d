//! Worklog document queue handlers

use axum::{
    extract::{Path, State},
    Json,
};

use core_kernel::DocumentJobId;
use domain_documents::{EnqueueItem, EnqueueSummary, QueueStatus};

use crate::dto::worklog::*;
use crate::error::ApiError;
use crate::extract::ValidatedJson;
use crate::AppState;

/// Queues worklog jobs; invalid items are counted as rejected
pub async fn enqueue(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<QueueRequest>,
) -> Result<Json<EnqueueSummary>, ApiError> {
    let items = request.items.into_iter().map(EnqueueItem::from).collect();
    Ok(Json(state.jobs.enqueue(items).await?))
}

/// Job counts per status plus the latest terminal failures
pub async fn status(State(state): State<AppState>) -> Result<Json<QueueStatus>, ApiError> {
    Ok(Json(state.jobs.status().await?))
}

/// Returns a failed job to the queue with its attempts reset
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RetryResponse>, ApiError> {
    let job_id = DocumentJobId::new(id);
    if !job_id.is_valid() {
        return Err(ApiError::BadRequest(format!("invalid job id {id}")));
    }
    state.jobs.retry(job_id).await?;
    Ok(Json(RetryResponse { ok: true, id }))
}
