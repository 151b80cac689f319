//! Domain and wire types for the Daraja gateway.
//!
//! Wire structs mirror the upstream JSON field names exactly; domain structs
//! are what the rest of the service sees.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// A request to prompt a payer's phone for a campaign contribution.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub phone_number: String,
    pub amount: BigDecimal,
    /// Account reference shown on the payer's statement; we use the
    /// contribution id.
    pub reference: String,
    pub description: String,
}

/// Correlation identifiers returned when the gateway accepts a charge.
///
/// Acceptance is "queued for processing", never evidence of payment; only
/// the asynchronous callback settles the charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeInitiation {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

/// A request to return settled funds to the payer.
#[derive(Debug, Clone)]
pub struct ReversalRequest {
    /// The settled receipt number from the original charge callback.
    pub transaction_id: String,
    /// Must equal the originally settled amount; the upstream enforces this.
    pub amount: BigDecimal,
    pub remarks: String,
}

/// Conversation identifiers returned when the gateway accepts a reversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalInitiation {
    pub originator_conversation_id: String,
    pub conversation_id: String,
}

/// Outcome of a manual STK push status query.
#[derive(Debug, Clone)]
pub struct ChargeStatus {
    pub result_code: i64,
    pub result_desc: String,
}

// ---------------------------------------------------------------------------
// Upstream request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReversalApiRequest {
    #[serde(rename = "Initiator")]
    pub initiator: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "ReceiverParty")]
    pub receiver_party: String,
    // Field name carries the upstream's own spelling.
    #[serde(rename = "RecieverIdentifierType")]
    pub receiver_identifier_type: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "Occasion")]
    pub occasion: String,
}

// ---------------------------------------------------------------------------
// Upstream response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// Returned as a string by the sandbox, a number in some environments.
    pub expires_in: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResultCode")]
    pub result_code: Option<JsonValue>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReversalApiResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ConversationID")]
    pub conversation_id: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound callback payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: ChargeCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: JsonValue,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversalCallbackEnvelope {
    #[serde(rename = "Result")]
    pub result: ReversalResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReversalResult {
    #[serde(rename = "ResultType")]
    pub result_type: Option<JsonValue>,
    #[serde(rename = "ResultCode")]
    pub result_code: JsonValue,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: Option<String>,
    #[serde(rename = "ConversationID")]
    pub conversation_id: Option<String>,
    #[serde(rename = "TransactionID")]
    pub transaction_id: Option<String>,
    #[serde(rename = "ResultParameters")]
    pub result_parameters: Option<ResultParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultParameters {
    #[serde(rename = "ResultParameter", default)]
    pub result_parameter: Vec<ResultParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultParameter {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: Option<JsonValue>,
}

/// Result codes arrive as numbers from production and as numeric strings
/// from the sandbox; normalize both.
pub fn result_code_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Fields extracted from the unordered charge callback metadata list.
#[derive(Debug, Clone, Default)]
pub struct SettlementMetadata {
    pub receipt: Option<String>,
    pub amount: Option<BigDecimal>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
}

impl SettlementMetadata {
    pub fn from_items(items: &[CallbackItem]) -> Self {
        use bigdecimal::FromPrimitive;

        let mut out = SettlementMetadata::default();
        for item in items {
            let value = match &item.value {
                Some(v) => v,
                None => continue,
            };
            match item.name.as_str() {
                "MpesaReceiptNumber" => {
                    out.receipt = value.as_str().map(|s| s.to_string());
                }
                "Amount" => {
                    out.amount = value
                        .as_f64()
                        .and_then(BigDecimal::from_f64)
                        .or_else(|| value.as_str().and_then(|s| s.parse().ok()));
                }
                "TransactionDate" => {
                    out.transaction_date = parse_mpesa_timestamp(value);
                }
                "PhoneNumber" => {
                    out.phone_number = value
                        .as_str()
                        .map(|s| s.to_string())
                        .or_else(|| value.as_i64().map(|n| n.to_string()));
                }
                _ => {}
            }
        }
        out
    }
}

/// Settlement timestamps arrive as numeric `YYYYMMDDHHMMSS` values.
fn parse_mpesa_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    let raw = match value {
        JsonValue::Number(n) => n.as_i64()?.to_string(),
        JsonValue::String(s) => s.trim().to_string(),
        _ => return None,
    };
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn charge_callback_envelope_parses_daraja_shape() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 1500.00},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "TransactionDate", "Value": 20191219102115_i64},
                            {"Name": "PhoneNumber", "Value": 254708374149_i64}
                        ]
                    }
                }
            }
        });

        let envelope: ChargeCallbackEnvelope =
            serde_json::from_value(payload).expect("callback should parse");
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(result_code_as_i64(&callback.result_code), Some(0));

        let metadata =
            SettlementMetadata::from_items(&callback.callback_metadata.unwrap().item);
        assert_eq!(metadata.receipt.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(metadata.phone_number.as_deref(), Some("254708374149"));
        assert!(metadata.transaction_date.is_some());
    }

    #[test]
    fn failed_callback_has_no_metadata() {
        let payload = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": "1032",
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let envelope: ChargeCallbackEnvelope =
            serde_json::from_value(payload).expect("callback should parse");
        let callback = envelope.body.stk_callback;
        assert_eq!(result_code_as_i64(&callback.result_code), Some(1032));
        assert!(callback.callback_metadata.is_none());
    }

    #[test]
    fn reversal_envelope_parses_result_parameters() {
        let payload = json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 21,
                "ResultDesc": "The service request is processed successfully",
                "OriginatorConversationID": "8521-4298025-1",
                "ConversationID": "AG_20181005_00004d7ee675c0c7ee0b",
                "TransactionID": "MJ561H6X5O",
                "ResultParameters": {
                    "ResultParameter": [
                        {"Key": "Amount", "Value": 100},
                        {"Key": "OriginalTransactionID", "Value": "MJ551H6X5D"}
                    ]
                }
            }
        });

        let envelope: ReversalCallbackEnvelope =
            serde_json::from_value(payload).expect("reversal callback should parse");
        let result = envelope.result;
        assert_eq!(result_code_as_i64(&result.result_code), Some(21));
        assert_eq!(
            result.conversation_id.as_deref(),
            Some("AG_20181005_00004d7ee675c0c7ee0b")
        );
        assert_eq!(
            result
                .result_parameters
                .unwrap()
                .result_parameter
                .iter()
                .find(|p| p.key == "OriginalTransactionID")
                .and_then(|p| p.value.as_ref())
                .and_then(|v| v.as_str()),
            Some("MJ551H6X5D")
        );
    }

    #[test]
    fn stk_push_request_serializes_with_upstream_field_names() {
        let request = StkPushRequest {
            business_short_code: "174379".to_string(),
            password: "cGFzcw==".to_string(),
            timestamp: "20260825120000".to_string(),
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: 150,
            party_a: "254712345678".to_string(),
            party_b: "174379".to_string(),
            phone_number: "254712345678".to_string(),
            callback_url: "https://api.example/payments/mpesa/callback/contributions"
                .to_string(),
            account_reference: "c0ffee".to_string(),
            transaction_desc: "Campaign contribution".to_string(),
        };
        let json = serde_json::to_value(&request).expect("serialization should succeed");
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["CallBackURL"].as_str().unwrap().contains("callback"), true);
        assert_eq!(json["Amount"], 150);
    }
}
