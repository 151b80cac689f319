//! Admin routes: refund initiation, refund status, manual status poll.
//!
//! The platform's auth middleware (outside this service) authenticates the
//! operator and forwards an opaque identity in `x-admin-id`; requests
//! without it are refused.

use crate::api::contributions::ContributionResponse;
use crate::api::AppState;
use crate::error::{AppError, ErrorCode};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ADMIN_ID_HEADER: &str = "x-admin-id";

fn admin_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(ADMIN_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_string())
        .ok_or(AppError {
            status: StatusCode::UNAUTHORIZED,
            code: ErrorCode::AuthError,
            message: "Missing admin identity".to_string(),
            retryable: false,
        })
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub contribution_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub contribution: ContributionResponse,
    /// Advisory completion window, e.g. "the refund usually lands within
    /// 5-15 minutes".
    pub advisory_window_secs: u64,
    pub reversal_originator_id: Option<String>,
    pub reversal_conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundStatusResponse {
    pub contribution: ContributionResponse,
    pub elapsed_secs: u64,
    pub overdue: bool,
}

pub async fn request_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), AppError> {
    let admin = admin_id(&headers)?;
    let initiated = state
        .refunds
        .request_refund(request.contribution_id, &request.reason, &admin)
        .await?;

    let advisory_window_secs = initiated.advisory_window.as_secs();
    let reversal_originator_id = initiated.contribution.reversal_originator_id.clone();
    let reversal_conversation_id = initiated.contribution.reversal_conversation_id.clone();
    Ok((
        StatusCode::ACCEPTED,
        Json(RefundResponse {
            contribution: initiated.contribution.into(),
            advisory_window_secs,
            reversal_originator_id,
            reversal_conversation_id,
        }),
    ))
}

pub async fn refund_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(contribution_id): Path<Uuid>,
) -> Result<Json<RefundStatusResponse>, AppError> {
    admin_id(&headers)?;
    let status = state.refunds.refund_status(contribution_id).await?;
    Ok(Json(RefundStatusResponse {
        contribution: status.contribution.into(),
        elapsed_secs: status.elapsed.as_secs(),
        overdue: status.overdue,
    }))
}

pub async fn query_charge_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ContributionResponse>, AppError> {
    admin_id(&headers)?;
    let contribution = state.contributions.poll_charge_status(id).await?;
    Ok(Json(contribution.into()))
}
