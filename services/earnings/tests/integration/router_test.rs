use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use bytes::Bytes;
use serde_json::{Value, json};

use payday_core::health::Readiness;
use payday_earnings::domain::types::PayoutStatus;
use payday_earnings::router::build_router;
use payday_earnings::state::AppState;
use payday_testing::events::{envelope, payout_object, to_bytes};
use payday_testing::webhook::{STRIPE_SIGNATURE, WebhookSigner};

use crate::helpers::{
    Harness, TEST_GENERATED_BY, TEST_PLATFORM_SECRET, processing_payout, test_worker,
};

fn server_with(h: &Harness, readiness: Readiness) -> TestServer {
    let state = AppState {
        reconciler: std::sync::Arc::new(h.reconciler()),
        readiness,
    };
    TestServer::new(build_router(state)).unwrap()
}

fn server(h: &Harness) -> TestServer {
    let readiness = Readiness::default();
    readiness.mark_ready();
    server_with(h, readiness)
}

fn signature_header(payload: &[u8], secret: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(STRIPE_SIGNATURE),
        HeaderValue::from_str(&WebhookSigner::new(secret).sign_now(payload)).unwrap(),
    )
}

#[tokio::test]
async fn should_answer_health_checks() {
    let h = Harness::new(vec![], test_worker());
    let server = server(&h);

    assert_eq!(server.get("/healthz").await.status_code(), StatusCode::OK);
    assert_eq!(server.get("/readyz").await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn should_report_unready_until_marked() {
    let h = Harness::new(vec![], test_worker());
    let readiness = Readiness::default();
    let server = server_with(&h, readiness.clone());

    assert_eq!(server.get("/healthz").await.status_code(), StatusCode::OK);
    assert_eq!(
        server.get("/readyz").await.status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    readiness.mark_ready();
    assert_eq!(server.get("/readyz").await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn should_apply_signed_webhook() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let server = server(&h);
    let payload = to_bytes(&envelope(
        "evt_1",
        "payout.paid",
        payout_object("po_live", TEST_GENERATED_BY, &payout.id.to_string(), None),
    ));
    let (name, value) = signature_header(&payload, TEST_PLATFORM_SECRET);

    let response = server
        .post("/earnings/stripe/webhook")
        .add_header(name, value)
        .bytes(Bytes::from(payload))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Paid);
}

#[tokio::test]
async fn should_return_bad_request_for_bad_signature() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let server = server(&h);
    let payload = to_bytes(&envelope(
        "evt_1",
        "payout.paid",
        payout_object("po_live", TEST_GENERATED_BY, &payout.id.to_string(), None),
    ));
    let (name, value) = signature_header(&payload, "whsec_wrong");

    let response = server
        .post("/earnings/stripe/webhook")
        .add_header(name, value)
        .bytes(Bytes::from(payload))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "INVALID_SIGNATURE");
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Processing);
}

#[tokio::test]
async fn should_return_bad_request_without_signature() {
    let h = Harness::new(vec![], test_worker());
    let server = server(&h);

    let response = server
        .post("/earnings/stripe/webhook")
        .bytes(Bytes::from_static(b"{}"))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["kind"], "MISSING_SIGNATURE");
}

#[tokio::test]
async fn should_acknowledge_events_it_ignores() {
    let h = Harness::new(vec![], test_worker());
    let server = server(&h);
    let payload = to_bytes(&envelope("evt_2", "customer.created", json!({ "id": "cus_1" })));
    let (name, value) = signature_header(&payload, TEST_PLATFORM_SECRET);

    let response = server
        .post("/earnings/stripe/webhook")
        .add_header(name, value)
        .bytes(Bytes::from(payload))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn should_confirm_webhook_delivery_check_once() {
    let h = Harness::new(vec![], test_worker());
    let server = server(&h);
    let tag = format!("webhook_check-{TEST_GENERATED_BY}");
    let payload = to_bytes(&envelope(
        "evt_3",
        "payment_intent.created",
        json!({ "id": "pi_check", "metadata": { "generated_by": tag } }),
    ));
    let (name, value) = signature_header(&payload, TEST_PLATFORM_SECRET);

    let missing = server
        .get("/earnings/stripe/webhook/check")
        .add_query_param("id", "pi_check")
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    server
        .post("/earnings/stripe/webhook")
        .add_header(name, value)
        .bytes(Bytes::from(payload))
        .await;

    let found = server
        .get("/earnings/stripe/webhook/check")
        .add_query_param("id", "pi_check")
        .await;
    assert_eq!(found.status_code(), StatusCode::OK);

    let consumed = server
        .get("/earnings/stripe/webhook/check")
        .add_query_param("id", "pi_check")
        .await;
    assert_eq!(consumed.status_code(), StatusCode::NOT_FOUND);
}
