//! Invoice handlers: collection, lock-and-mark and settlement

use axum::{extract::State, Extension, Json};
use tracing::info;

use core_kernel::{DateWindow, UserId};
use domain_billing::{BillingEnvelope, CollectQuery};

use crate::auth::{has_role, permissions, Claims};
use crate::dto::invoice::*;
use crate::error::ApiError;
use crate::extract::ValidatedJson;
use crate::AppState;

/// Builds one billing envelope per entity for the requested window
///
/// Billing administrators see every user's records, optionally narrowed by
/// `userId`. Everyone else is scoped to their own records.
pub async fn collect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidatedJson(request): ValidatedJson<CollectRequest>,
) -> Result<Json<Vec<BillingEnvelope>>, ApiError> {
    let window = DateWindow::new(request.start, request.end)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut query = CollectQuery::new(window)
        .with_status(request.status)
        .only_billable(request.only_billable)
        .with_grouping(request.grouping);
    if let Some(user) = collection_scope(&claims, request.user_id)? {
        query = query.scoped_to(user);
    }

    let envelopes = state.collector.collect(&query).await?;
    Ok(Json(envelopes))
}

/// Marks time records billed
pub async fn lock_hours(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LockRequest>,
) -> Result<Json<LockResponse>, ApiError> {
    let outcome = state
        .locks
        .lock_hours(&request.locks.time_report_ids, &request.invoice_number)
        .await?;
    Ok(Json(LockResponse {
        ok: true,
        affected: outcome.affected,
    }))
}

/// Stamps material items with the invoice number, independent of hours
pub async fn lock_items(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LockRequest>,
) -> Result<Json<LockResponse>, ApiError> {
    let outcome = state
        .locks
        .lock_items(&request.locks.time_report_item_ids, &request.invoice_number)
        .await?;
    Ok(Json(LockResponse {
        ok: true,
        affected: outcome.affected,
    }))
}

/// Creates invoices and queues their worklogs, entity by entity
///
/// Always `200`; per-entity failures are reported in the outcomes.
pub async fn settle(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ValidatedJson(request): ValidatedJson<SettleRequest>,
) -> Result<Json<SettleResponse>, ApiError> {
    let response = SettleResponse::from(state.settlement.settle(request.items).await);
    info!(
        user = %claims.sub,
        complete = response.complete,
        failed = response.failed,
        "Settlement requested"
    );
    Ok(Json(response))
}

fn collection_scope(claims: &Claims, requested: Option<i64>) -> Result<Option<UserId>, ApiError> {
    if has_role(claims, permissions::BILLING_ADMIN) {
        return Ok(requested.map(UserId::new));
    }

    let own = claims
        .user_id()
        .ok_or_else(|| ApiError::Forbidden("token subject is not a user".to_string()))?;
    match requested {
        Some(other) if other != own.get() => Err(ApiError::Forbidden(
            "cannot collect another user's records".to_string(),
        )),
        _ => Ok(Some(own)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, roles: &[&str]) -> Claims {
        Claims {
            sub: sub.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_admin_scope_is_optional() {
        let admin = claims("1", &[permissions::BILLING_ADMIN]);
        assert_eq!(collection_scope(&admin, None).unwrap(), None);
        assert_eq!(collection_scope(&admin, Some(9)).unwrap(), Some(UserId::new(9)));
    }

    #[test]
    fn test_user_is_scoped_to_self() {
        let user = claims("7", &[]);
        assert_eq!(collection_scope(&user, None).unwrap(), Some(UserId::new(7)));
        assert_eq!(collection_scope(&user, Some(7)).unwrap(), Some(UserId::new(7)));
        assert!(matches!(collection_scope(&user, Some(8)), Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn test_non_numeric_subject_forbidden() {
        let service = claims("reporting-bot", &[]);
        assert!(matches!(collection_scope(&service, None), Err(ApiError::Forbidden(_))));
    }
}
