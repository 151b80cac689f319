//! API-level error mapping.
//!
//! Service errors are converted into one JSON error shape with a
//! machine-readable code, an HTTP status, and a `retryable` hint so the
//! platform knows whether re-submitting the same request can succeed.
//! Callback routes never use this path; they always acknowledge 200.

use crate::database::error::StoreError;
use crate::payments::error::GatewayError;
use crate::services::contributions::ContributionError;
use crate::services::refunds::RefundError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "AUTH_ERROR")]
    AuthError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,
    #[serde(rename = "GATEWAY_REJECTED")]
    GatewayRejected,
    #[serde(rename = "GATEWAY_UNAVAILABLE")]
    GatewayUnavailable,
    #[serde(rename = "CONTRIBUTION_NOT_FOUND")]
    ContributionNotFound,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Standardized error response structure returned for every API error.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub timestamp: String,
    pub retryable: bool,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl AppError {
    fn new(status: StatusCode, code: ErrorCode, message: String, retryable: bool) -> Self {
        Self {
            status,
            code,
            message,
            retryable,
        }
    }

    fn from_gateway(e: &GatewayError) -> Self {
        let status = StatusCode::from_u16(e.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match e {
            GatewayError::Validation { .. } => ErrorCode::ValidationError,
            GatewayError::Auth { .. } => ErrorCode::AuthError,
            GatewayError::Timeout { .. } => ErrorCode::GatewayTimeout,
            GatewayError::Rejected { .. } => ErrorCode::GatewayRejected,
            GatewayError::Unavailable { .. }
            | GatewayError::Network { .. }
            | GatewayError::InvalidResponse { .. } => ErrorCode::GatewayUnavailable,
        };
        Self::new(status, code, e.user_message(), e.is_retryable())
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::from_gateway(&e)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => AppError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::ContributionNotFound,
                format!("Contribution {} was not found", id),
                false,
            ),
            StoreError::Backend(message) => {
                tracing::error!("Storage backend error: {}", message);
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DatabaseError,
                    "A storage error occurred. Please try again later.".to_string(),
                    true,
                )
            }
        }
    }
}

impl From<ContributionError> for AppError {
    fn from(e: ContributionError) -> Self {
        match e {
            ContributionError::NotFound { id } => AppError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::ContributionNotFound,
                format!("Contribution {} was not found", id),
                false,
            ),
            ContributionError::Validation(inner) => AppError::from_gateway(&inner),
            ContributionError::Gateway(inner) => AppError::from_gateway(&inner),
            ContributionError::NotPollable { state } => AppError::new(
                StatusCode::CONFLICT,
                ErrorCode::InvalidState,
                format!(
                    "Only pending contributions can be polled; this one is '{}'",
                    state.as_str()
                ),
                false,
            ),
            ContributionError::Store(inner) => inner.into(),
        }
    }
}

impl From<RefundError> for AppError {
    fn from(e: RefundError) -> Self {
        match e {
            RefundError::NotFound { id } => AppError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::ContributionNotFound,
                format!("Contribution {} was not found", id),
                false,
            ),
            RefundError::NotRefundable { state } => AppError::new(
                StatusCode::CONFLICT,
                ErrorCode::RefundNotAllowed,
                format!(
                    "Only completed contributions can be refunded; this one is '{}'",
                    state.as_str()
                ),
                false,
            ),
            RefundError::MissingReceipt => AppError::new(
                StatusCode::CONFLICT,
                ErrorCode::RefundNotAllowed,
                "Contribution has no settlement receipt to reverse".to_string(),
                false,
            ),
            RefundError::NoRefundAttempt => AppError::new(
                StatusCode::NOT_FOUND,
                ErrorCode::RefundNotAllowed,
                "No refund has been requested for this contribution".to_string(),
                false,
            ),
            RefundError::Gateway(inner) => AppError::from_gateway(&inner),
            RefundError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code,
            message: self.message,
            timestamp: Utc::now().to_rfc3339(),
            retryable: self.retryable,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_504_retryable() {
        let err: AppError = GatewayError::Timeout { seconds: 30 }.into();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code, ErrorCode::GatewayTimeout);
        assert!(err.retryable);
    }

    #[test]
    fn rejection_maps_to_402_not_retryable() {
        let err: AppError = GatewayError::Rejected {
            code: "1".to_string(),
            description: "insufficient funds".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);
        assert!(!err.retryable);
    }

    #[test]
    fn refund_conflict_names_the_observed_state() {
        let err: AppError = RefundError::NotRefundable {
            state: crate::database::store::ContributionStatus::RefundPending,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(err.message.contains("refund_pending"));
    }
}
