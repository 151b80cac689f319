//! Gateway callback routes.
//!
//! These endpoints always answer `200` with a JSON acknowledgment: the
//! upstream's retry behavior on error responses cannot be relied upon, so
//! receipt is acknowledged separately from reconciliation success. All
//! internal failures are logged with the payload and absorbed.

use crate::api::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, warn};

fn ack() -> Json<JsonValue> {
    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

pub async fn charge_callback(State(state): State<AppState>, body: Bytes) -> Json<JsonValue> {
    let payload: JsonValue = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                body = %String::from_utf8_lossy(&body),
                "Charge callback body is not JSON: {}",
                e
            );
            return ack();
        }
    };

    match state.reconciler.handle_charge_callback(payload.clone()).await {
        Ok(outcome) => {
            info!(?outcome, "Charge callback reconciled");
        }
        Err(e) => {
            error!(
                payload = %payload,
                "Charge callback reconciliation failed, state unchanged: {}",
                e
            );
        }
    }
    ack()
}

pub async fn reversal_callback(State(state): State<AppState>, body: Bytes) -> Json<JsonValue> {
    let payload: JsonValue = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(
                body = %String::from_utf8_lossy(&body),
                "Reversal callback body is not JSON: {}",
                e
            );
            return ack();
        }
    };

    match state.reconciler.handle_reversal_callback(payload.clone()).await {
        Ok(outcome) => {
            info!(?outcome, "Reversal callback reconciled");
        }
        Err(e) => {
            error!(
                payload = %payload,
                "Reversal callback reconciliation failed, state unchanged: {}",
                e
            );
        }
    }
    ack()
}
