//! Liveness and readiness probes.

use crate::api::AppState;
use crate::cache;
use crate::database;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};

pub async fn live() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<JsonValue>) {
    let db_ok = match &state.db_pool {
        Some(pool) => database::health_check(pool).await.is_ok(),
        // Memory-store deployments have no database to wait for.
        None => true,
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "ready": db_ok })))
}

pub async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    let database = match &state.db_pool {
        Some(pool) => {
            if database::health_check(pool).await.is_ok() {
                "up"
            } else {
                "down"
            }
        }
        None => "memory",
    };
    let redis = match &state.redis_pool {
        Some(pool) => {
            if cache::health_check(pool).await.is_ok() {
                "up"
            } else {
                "down"
            }
        }
        None => "disabled",
    };

    Json(json!({
        "status": "ok",
        "database": database,
        "cache": redis,
    }))
}
