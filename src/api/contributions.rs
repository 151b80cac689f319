//! Platform-facing contribution routes.

use crate::api::AppState;
use crate::database::store::Contribution;
use crate::error::AppError;
use crate::services::contributions::ContributionRequest;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateContributionRequest {
    pub campaign_id: Uuid,
    pub contributor_id: Option<Uuid>,
    pub phone_number: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub is_anonymous: bool,
    pub note: Option<String>,
    pub source_channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContributionResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: &'static str,
    pub checkout_request_id: Option<String>,
    pub mpesa_receipt: Option<String>,
    pub result_desc: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub refunded_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Contribution> for ContributionResponse {
    fn from(c: Contribution) -> Self {
        ContributionResponse {
            id: c.id,
            campaign_id: c.campaign_id,
            amount: c.amount,
            currency: c.currency,
            status: c.status.as_str(),
            checkout_request_id: c.checkout_request_id,
            mpesa_receipt: c.mpesa_receipt,
            result_desc: c.result_desc,
            created_at: c.created_at,
            processed_at: c.processed_at,
            refunded_at: c.refunded_at,
        }
    }
}

pub async fn create_contribution(
    State(state): State<AppState>,
    Json(request): Json<CreateContributionRequest>,
) -> Result<(StatusCode, Json<ContributionResponse>), AppError> {
    let contribution = state
        .contributions
        .create_contribution(ContributionRequest {
            campaign_id: request.campaign_id,
            contributor_id: request.contributor_id,
            phone_number: request.phone_number,
            amount: request.amount,
            is_anonymous: request.is_anonymous,
            note: request.note,
            source_channel: request.source_channel,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(contribution.into())))
}

pub async fn get_contribution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContributionResponse>, AppError> {
    let contribution = state.contributions.get_contribution(id).await?;
    Ok(Json(contribution.into()))
}
