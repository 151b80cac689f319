use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure taxonomy for the upstream mobile-money gateway.
///
/// The split between `Timeout`/`Unavailable` (retryable, the contribution
/// stays pending) and `Rejected` (definitive, the contribution fails at
/// initiation) is load-bearing: only callbacks settle payments, so a
/// transport-level failure must never be read as a payment outcome.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Gateway authentication failed: {message}")]
    Auth { message: String },

    #[error("Gateway request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Gateway rejected request: code={code}, description={description}")]
    Rejected { code: String, description: String },

    #[error("Gateway unavailable: {message}")]
    Unavailable { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Validation { .. } => false,
            GatewayError::Auth { .. } => true,
            GatewayError::Timeout { .. } => true,
            GatewayError::Rejected { .. } => false,
            GatewayError::Unavailable { .. } => true,
            GatewayError::Network { .. } => true,
            GatewayError::InvalidResponse { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            GatewayError::Validation { .. } => 400,
            GatewayError::Auth { .. } => 503,
            GatewayError::Timeout { .. } => 504,
            GatewayError::Rejected { .. } => 402,
            GatewayError::Unavailable { .. } => 503,
            GatewayError::Network { .. } => 503,
            GatewayError::InvalidResponse { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Validation { message, .. } => message.clone(),
            GatewayError::Auth { .. } => {
                "Payment service is temporarily unavailable. Please retry shortly".to_string()
            }
            GatewayError::Timeout { .. } => {
                "The payment request timed out. If you completed the prompt, the payment may still go through".to_string()
            }
            GatewayError::Rejected { description, .. } => description.clone(),
            GatewayError::Unavailable { .. } | GatewayError::Network { .. } => {
                "Payment service is temporarily unavailable. Please retry shortly".to_string()
            }
            GatewayError::InvalidResponse { .. } => {
                "The payment service returned an unexpected response".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable_but_rejection_is_not() {
        assert!(GatewayError::Timeout { seconds: 30 }.is_retryable());
        assert!(!GatewayError::Rejected {
            code: "1032".to_string(),
            description: "Request cancelled by user".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn http_status_mapping_distinguishes_failure_kinds() {
        assert_eq!(
            GatewayError::Validation {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(GatewayError::Timeout { seconds: 30 }.http_status_code(), 504);
        assert_eq!(
            GatewayError::Unavailable {
                message: "down".to_string()
            }
            .http_status_code(),
            503
        );
    }
}
