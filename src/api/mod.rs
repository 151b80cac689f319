//! HTTP surface: platform routes, admin routes, gateway callbacks, health.

pub mod admin;
pub mod callbacks;
pub mod contributions;
pub mod health;

use crate::cache::RedisPool;
use crate::services::{CallbackReconciler, ContributionService, RefundService};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub contributions: Arc<ContributionService>,
    pub refunds: Arc<RefundService>,
    pub reconciler: Arc<CallbackReconciler>,
    pub db_pool: Option<PgPool>,
    pub redis_pool: Option<RedisPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Gateway callbacks: no auth, always acknowledged 200.
        .route(
            "/payments/mpesa/callback/contributions",
            post(callbacks::charge_callback),
        )
        .route(
            "/payments/mpesa/callback/reversal",
            post(callbacks::reversal_callback),
        )
        // Platform-facing routes.
        .route("/api/contributions", post(contributions::create_contribution))
        .route("/api/contributions/{id}", get(contributions::get_contribution))
        // Admin routes; identity arrives as an opaque header from the
        // platform's auth middleware.
        .route("/api/admin/refunds", post(admin::request_refund))
        .route(
            "/api/admin/refunds/{contribution_id}",
            get(admin::refund_status),
        )
        .route(
            "/api/admin/contributions/{id}/query",
            post(admin::query_charge_status),
        )
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
