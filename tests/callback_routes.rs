//! HTTP-level tests for the callback routes' always-200 acknowledgment
//! policy and the admin identity requirement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bigdecimal::BigDecimal;
use http::{Request, StatusCode};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

use harambee_backend::api::{self, AppState};
use harambee_backend::config::ReconcilerConfig;
use harambee_backend::database::memory::MemoryContributionStore;
use harambee_backend::database::store::{ContributionStatus, ContributionStore};
use harambee_backend::payments::error::GatewayResult;
use harambee_backend::payments::gateway::PaymentGateway;
use harambee_backend::payments::types::{
    ChargeInitiation, ChargeRequest, ChargeStatus, ReversalInitiation, ReversalRequest,
};
use harambee_backend::services::{
    CallbackReconciler, ContributionService, NotificationSink, RefundService,
};

struct AcceptAllGateway;

#[async_trait]
impl PaymentGateway for AcceptAllGateway {
    async fn initiate_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeInitiation> {
        Ok(ChargeInitiation {
            merchant_request_id: format!("mr-{}", request.reference),
            checkout_request_id: format!("ws_CO_{}", request.reference),
            customer_message: "Success".to_string(),
        })
    }

    async fn initiate_reversal(
        &self,
        request: &ReversalRequest,
    ) -> GatewayResult<ReversalInitiation> {
        Ok(ReversalInitiation {
            originator_conversation_id: format!("orig-{}", request.transaction_id),
            conversation_id: format!("AG_{}", request.transaction_id),
        })
    }

    async fn query_charge_status(
        &self,
        _checkout_request_id: &str,
    ) -> GatewayResult<ChargeStatus> {
        Ok(ChargeStatus {
            result_code: 0,
            result_desc: "processed".to_string(),
        })
    }
}

fn test_app() -> (axum::Router, Arc<MemoryContributionStore>) {
    let store = Arc::new(MemoryContributionStore::new());
    let gateway: Arc<dyn PaymentGateway> = Arc::new(AcceptAllGateway);
    let notifier = NotificationSink::disabled();
    let config = ReconcilerConfig {
        reversal_match_window: Duration::from_secs(3600),
        strict_reversal_match: false,
        refund_advisory_window: Duration::from_secs(900),
        notify_url: None,
    };

    let state = AppState {
        contributions: Arc::new(ContributionService::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            300_000,
        )),
        refunds: Arc::new(RefundService::new(
            store.clone(),
            gateway,
            Duration::from_secs(900),
            notifier.clone(),
        )),
        reconciler: Arc::new(CallbackReconciler::new(store.clone(), config, notifier)),
        db_pool: None,
        redis_pool: None,
    };
    (api::router(state), store)
}

fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn callback_routes_ack_garbage_with_200() {
    let (app, _) = test_app();

    for uri in [
        "/payments/mpesa/callback/contributions",
        "/payments/mpesa/callback/reversal",
    ] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from("not json at all"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "uri {}", uri);
        let body = body_json(response).await;
        assert_eq!(body["ResultCode"], 0);
    }
}

#[tokio::test]
async fn charge_callback_for_unknown_record_still_acks() {
    let (app, _) = test_app();
    let payload = json!({
        "Body": {
            "stkCallback": {
                "CheckoutRequestID": "ws_CO_never_issued",
                "ResultCode": 0,
                "ResultDesc": "ok"
            }
        }
    });
    let response = app
        .oneshot(post_json("/payments/mpesa/callback/contributions", payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn contribution_flow_over_http_settles_on_callback() {
    let (app, store) = test_app();

    let create = post_json(
        "/api/contributions",
        json!({
            "campaign_id": Uuid::new_v4(),
            "phone_number": "0712345678",
            "amount": 1000
        }),
    );
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "pending");
    let checkout_id = created["checkout_request_id"].as_str().unwrap().to_string();
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let callback = post_json(
        "/payments/mpesa/callback/contributions",
        json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": checkout_id,
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 1000.0},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"}
                        ]
                    }
                }
            }
        }),
    );
    let response = app.clone().oneshot(callback).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, ContributionStatus::Completed);
    assert_eq!(
        store.campaign_total(stored.campaign_id).await.unwrap(),
        BigDecimal::from(1000)
    );

    let get = Request::builder()
        .uri(format!("/api/contributions/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["status"], "completed");
    assert_eq!(fetched["mpesa_receipt"], "NLJ7RT61SV");
}

#[tokio::test]
async fn invalid_amount_is_rejected_with_retryable_hint() {
    let (app, _) = test_app();
    let response = app
        .oneshot(post_json(
            "/api/contributions",
            json!({
                "campaign_id": Uuid::new_v4(),
                "phone_number": "0712345678",
                "amount": 0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn admin_routes_require_identity_header() {
    let (app, _) = test_app();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/admin/refunds",
            json!({ "contribution_id": Uuid::new_v4(), "reason": "test" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refund_over_http_reports_advisory_window() {
    let (app, store) = test_app();

    // Seed a completed contribution through the HTTP surface.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/contributions",
            json!({
                "campaign_id": Uuid::new_v4(),
                "phone_number": "0712345678",
                "amount": 250
            }),
        ))
        .await
        .unwrap();
    let created = body_json(response).await;
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    let checkout_id = created["checkout_request_id"].as_str().unwrap().to_string();

    app.clone()
        .oneshot(post_json(
            "/payments/mpesa/callback/contributions",
            json!({
                "Body": {
                    "stkCallback": {
                        "CheckoutRequestID": checkout_id,
                        "ResultCode": 0,
                        "ResultDesc": "ok",
                        "CallbackMetadata": {
                            "Item": [
                                {"Name": "MpesaReceiptNumber", "Value": "RCPT250"}
                            ]
                        }
                    }
                }
            }),
        ))
        .await
        .unwrap();

    let refund = Request::builder()
        .method("POST")
        .uri("/api/admin/refunds")
        .header("content-type", "application/json")
        .header("x-admin-id", "ops-42")
        .body(Body::from(
            json!({ "contribution_id": id, "reason": "duplicate charge" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(refund).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["contribution"]["status"], "refund_pending");
    assert_eq!(body["advisory_window_secs"], 900);

    let stored = store.find_by_id(id).await.unwrap().unwrap();
    assert!(stored.reversal_conversation_id.is_some());

    let status = Request::builder()
        .uri(format!("/api/admin/refunds/{}", id))
        .header("x-admin-id", "ops-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(status).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["overdue"], false);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (app, _) = test_app();

    let live = Request::builder()
        .uri("/health/live")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(live).await.unwrap().status(),
        StatusCode::OK
    );

    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(health).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["database"], "memory");
    assert_eq!(body["cache"], "disabled");
}
