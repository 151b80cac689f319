//! Daraja (M-Pesa) gateway client.
//!
//! Implements STK push charges, transaction reversals and the status query
//! endpoint against the Daraja REST API. All requests carry a cached bearer
//! token; request bodies follow the upstream's exact field names, including
//! its misspellings.

use crate::config::MpesaConfig;
use crate::payments::auth::TokenCache;
use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::http::GatewayHttpClient;
use crate::payments::phone::{normalize_phone, truncate_remarks, validate_amount};
use crate::payments::types::{
    result_code_as_i64, ChargeInitiation, ChargeRequest, ChargeStatus, ReversalApiRequest,
    ReversalApiResponse, ReversalInitiation, ReversalRequest, StkPushRequest, StkPushResponse,
    StkQueryRequest, StkQueryResponse,
};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct MpesaGateway {
    config: MpesaConfig,
    http: GatewayHttpClient,
    tokens: Arc<TokenCache>,
}

impl MpesaGateway {
    pub fn new(
        config: MpesaConfig,
        redis: Option<crate::cache::RedisPool>,
    ) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let tokens = Arc::new(TokenCache::new(&config, http.clone(), redis));
        Ok(Self {
            config,
            http,
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Timestamp in the `YYYYMMDDHHMMSS` form the password derivation uses.
    fn request_timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    async fn post_authed<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> GatewayResult<T> {
        let token = self.tokens.get_token().await?;
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&token),
                None,
                Some(&body),
            )
            .await
    }
}

/// STK push password: base64 of shortcode, passkey and timestamp concatenated.
fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn initiate_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeInitiation> {
        let phone = normalize_phone(&request.phone_number)?;
        let amount = validate_amount(&request.amount, self.config.max_charge_amount)?;

        let timestamp = Self::request_timestamp();
        let body = StkPushRequest {
            business_short_code: self.config.shortcode.clone(),
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount,
            party_a: phone.clone(),
            party_b: self.config.shortcode.clone(),
            phone_number: phone,
            callback_url: self.config.charge_callback_url(),
            account_reference: request.reference.clone(),
            transaction_desc: request.description.clone(),
        };

        let payload = serde_json::to_value(&body).map_err(|e| GatewayError::Validation {
            message: format!("failed to encode charge request: {}", e),
            field: None,
        })?;

        info!(reference = %request.reference, amount, "Initiating STK push charge");
        let response: StkPushResponse = self
            .post_authed("/mpesa/stkpush/v1/processrequest", payload)
            .await?;

        if response.response_code.as_deref() == Some("0") {
            match (response.merchant_request_id, response.checkout_request_id) {
                (Some(merchant_request_id), Some(checkout_request_id)) => Ok(ChargeInitiation {
                    merchant_request_id,
                    checkout_request_id,
                    customer_message: response.customer_message.unwrap_or_default(),
                }),
                _ => Err(GatewayError::InvalidResponse {
                    message: "charge accepted but correlation ids are missing".to_string(),
                }),
            }
        } else {
            Err(GatewayError::Rejected {
                code: response.response_code.unwrap_or_else(|| "unknown".to_string()),
                description: response
                    .response_description
                    .or(response.error_message)
                    .unwrap_or_else(|| "charge rejected by gateway".to_string()),
            })
        }
    }

    async fn initiate_reversal(
        &self,
        request: &ReversalRequest,
    ) -> GatewayResult<ReversalInitiation> {
        if request.transaction_id.trim().is_empty() {
            return Err(GatewayError::Validation {
                message: "reversal requires the original transaction receipt".to_string(),
                field: Some("transaction_id".to_string()),
            });
        }
        let amount = validate_amount(&request.amount, self.config.max_charge_amount)?;

        let body = ReversalApiRequest {
            initiator: self.config.initiator_name.clone(),
            security_credential: self.config.security_credential.clone(),
            command_id: "TransactionReversal".to_string(),
            transaction_id: request.transaction_id.clone(),
            amount,
            receiver_party: self.config.shortcode.clone(),
            receiver_identifier_type: "11".to_string(),
            result_url: self.config.reversal_callback_url(),
            queue_timeout_url: self.config.reversal_callback_url(),
            remarks: truncate_remarks(&request.remarks),
            occasion: String::new(),
        };

        let payload = serde_json::to_value(&body).map_err(|e| GatewayError::Validation {
            message: format!("failed to encode reversal request: {}", e),
            field: None,
        })?;

        info!(
            transaction_id = %request.transaction_id,
            amount,
            "Initiating transaction reversal"
        );
        let response: ReversalApiResponse =
            self.post_authed("/mpesa/reversal/v1/request", payload).await?;

        if response.response_code.as_deref() == Some("0") {
            match (
                response.originator_conversation_id,
                response.conversation_id,
            ) {
                (Some(originator_conversation_id), Some(conversation_id)) => {
                    Ok(ReversalInitiation {
                        originator_conversation_id,
                        conversation_id,
                    })
                }
                _ => Err(GatewayError::InvalidResponse {
                    message: "reversal accepted but conversation ids are missing".to_string(),
                }),
            }
        } else {
            warn!(
                transaction_id = %request.transaction_id,
                code = ?response.response_code,
                "Gateway rejected reversal"
            );
            Err(GatewayError::Rejected {
                code: response.response_code.unwrap_or_else(|| "unknown".to_string()),
                description: response
                    .response_description
                    .or(response.error_message)
                    .unwrap_or_else(|| "reversal rejected by gateway".to_string()),
            })
        }
    }

    async fn query_charge_status(&self, checkout_request_id: &str) -> GatewayResult<ChargeStatus> {
        let timestamp = Self::request_timestamp();
        let body = StkQueryRequest {
            business_short_code: self.config.shortcode.clone(),
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let payload = serde_json::to_value(&body).map_err(|e| GatewayError::Validation {
            message: format!("failed to encode status query: {}", e),
            field: None,
        })?;

        let response: StkQueryResponse = self
            .post_authed("/mpesa/stkpushquery/v1/query", payload)
            .await?;

        match response.result_code.as_ref().and_then(result_code_as_i64) {
            Some(result_code) => Ok(ChargeStatus {
                result_code,
                result_desc: response.result_desc.unwrap_or_default(),
            }),
            // The upstream answers with an error body while the prompt is
            // still on the payer's phone.
            None => Err(GatewayError::Unavailable {
                message: response
                    .error_message
                    .unwrap_or_else(|| "charge status not yet available".to_string()),
            }),
        }
    }
}
