use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use payday_earnings::domain::failure::reason;
use payday_earnings::domain::types::{PayoutNotification, PayoutStatus, WorkerPayout};
use payday_earnings::error::EarningsServiceError;
use payday_earnings::usecase::reconcile::TRANSFERS_CAPABILITY_INACTIVE;
use payday_earnings::usecase::recovery::RecoveryConfig;
use payday_testing::events::{
    account_object, capability_object, envelope, payout_object, to_bytes,
};
use payday_testing::fixture::Fixture;
use payday_testing::webhook::WebhookSigner;

use crate::helpers::{
    Harness, TEST_ACCOUNT_ID, TEST_CONNECT_SECRET, TEST_GENERATED_BY, TEST_PLATFORM_SECRET,
    TestReconciler, failed_payout, processing_payout, reconciler, test_payout, test_worker,
    transfer_balance_transaction,
};

async fn deliver(reconciler: &TestReconciler, event: &Value) -> Result<(), EarningsServiceError> {
    let payload = to_bytes(event);
    let signature = WebhookSigner::new(TEST_PLATFORM_SECRET).sign_now(&payload);
    reconciler.receive(&payload, Some(&signature)).await
}

fn paid_event(external_id: &str, payout: &WorkerPayout) -> Value {
    envelope(
        &format!("evt_paid_{external_id}"),
        "payout.paid",
        payout_object(external_id, TEST_GENERATED_BY, &payout.id.to_string(), None),
    )
}

fn failed_event(external_id: &str, payout: &WorkerPayout, code: &str) -> Value {
    envelope(
        &format!("evt_failed_{external_id}"),
        "payout.failed",
        payout_object(
            external_id,
            TEST_GENERATED_BY,
            &payout.id.to_string(),
            Some(code),
        ),
    )
}

/// Load a recorded event and point its transfer metadata at `payout`.
fn legacy_fixture(path: &str, payout: &WorkerPayout) -> Value {
    let raw = Fixture::load(path)
        .to_string()
        .replace("GENERATED_BY", TEST_GENERATED_BY)
        .replace("PAYOUT_ID", &payout.id.to_string())
        .replace("WORKER_ID", &payout.worker_id.to_string());
    serde_json::from_str(&raw).unwrap()
}

// ── Authentication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn should_reject_missing_signature_without_state_change() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let payload = to_bytes(&paid_event("po_live", &payout));

    let result = h.reconciler().receive(&payload, None).await;

    assert!(matches!(result, Err(EarningsServiceError::MissingSignature)));
    assert_eq!(h.payouts.get(payout.id), payout);
}

#[tokio::test]
async fn should_reject_signature_from_unknown_secret() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let payload = to_bytes(&paid_event("po_live", &payout));
    let signature = WebhookSigner::new("whsec_someone_else").sign_now(&payload);

    let result = h.reconciler().receive(&payload, Some(&signature)).await;

    assert!(matches!(result, Err(EarningsServiceError::InvalidSignature)));
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Processing);
}

#[tokio::test]
async fn should_reject_expired_signature() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let payload = to_bytes(&paid_event("po_live", &payout));
    let stale = Utc::now().timestamp() - 600;
    let signature = WebhookSigner::new(TEST_PLATFORM_SECRET).signature(&payload, stale);

    let result = h.reconciler().receive(&payload, Some(&signature)).await;

    assert!(matches!(result, Err(EarningsServiceError::InvalidSignature)));
}

#[tokio::test]
async fn should_accept_connect_endpoint_signature() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let payload = to_bytes(&paid_event("po_live", &payout));
    let signature = WebhookSigner::new(TEST_CONNECT_SECRET).sign_now(&payload);

    h.reconciler().receive(&payload, Some(&signature)).await.unwrap();

    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Paid);
}

#[tokio::test]
async fn should_reject_unparsable_payload() {
    let h = Harness::new(vec![], test_worker());
    let payload = b"definitely not json";
    let signature = WebhookSigner::new(TEST_PLATFORM_SECRET).sign_now(payload);

    let result = h.reconciler().receive(payload, Some(&signature)).await;

    assert!(matches!(result, Err(EarningsServiceError::InvalidPayload)));
}

#[tokio::test]
async fn should_acknowledge_unknown_event_types() {
    let h = Harness::new(vec![], test_worker());
    let event = envelope("evt_x", "charge.refunded", json!({ "id": "ch_1" }));

    assert!(deliver(&h.reconciler(), &event).await.is_ok());
}

// ── payout.paid / payout.failed ──────────────────────────────────────────────

#[tokio::test]
async fn should_mark_processing_payout_paid() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let r = h.reconciler();

    deliver(&r, &paid_event("po_live", &payout)).await.unwrap();
    deliver(&r, &paid_event("po_live", &payout)).await.unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Paid);
    assert_eq!(stored.row_version, payout.row_version + 1);
}

#[tokio::test]
async fn should_fail_payout_and_notify_worker() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker.clone());

    deliver(&h.reconciler(), &failed_event("po_live", &payout, reason::ACCOUNT_CLOSED))
        .await
        .unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Failed);
    assert_eq!(stored.last_failure_reason.as_deref(), Some(reason::ACCOUNT_CLOSED));
    assert_eq!(stored.next_attempt_at, None);
    assert!(matches!(
        h.notifier.sent().as_slice(),
        [PayoutNotification::ActionRequired { email, .. }] if *email == worker.email
    ));
}

#[tokio::test]
async fn should_record_unknown_failure_when_code_missing() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let mut event = failed_event("po_live", &payout, "x");
    event["data"]["object"]["failure_code"] = Value::Null;

    deliver(&h.reconciler(), &event).await.unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Failed);
    assert_eq!(
        stored.last_failure_reason.as_deref(),
        Some(reason::UNKNOWN_PAYOUT_FAILURE)
    );
}

#[tokio::test]
async fn should_ignore_events_from_other_deployments() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let event = envelope(
        "evt_foreign",
        "payout.paid",
        payout_object("po_live", "earnings-staging-1", &payout.id.to_string(), None),
    );

    deliver(&h.reconciler(), &event).await.unwrap();

    assert_eq!(h.payouts.get(payout.id), payout);
}

#[tokio::test]
async fn should_ignore_events_for_unknown_payouts() {
    let h = Harness::new(vec![], test_worker());
    let ghost = test_payout(Uuid::now_v7(), PayoutStatus::Processing);

    assert!(deliver(&h.reconciler(), &paid_event("po_ghost", &ghost)).await.is_ok());
}

#[tokio::test]
async fn should_trace_legacy_event_through_expanded_transfer() {
    let worker = test_worker();
    let payout = test_payout(worker.id, PayoutStatus::Processing);
    let h = Harness::new(vec![payout.clone()], worker);
    let event = legacy_fixture("contracts/stripe/payout_paid_legacy.json", &payout);

    deliver(&h.reconciler(), &event).await.unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Paid);
    assert_eq!(stored.stripe_payout_id.as_deref(), Some("po_1PzLegacy"));
    assert_eq!(h.gateway.state.lock().unwrap().balance_lookups, 0);
}

#[tokio::test]
async fn should_fetch_balance_transaction_for_unexpanded_legacy_event() {
    let worker = test_worker();
    let payout = test_payout(worker.id, PayoutStatus::Processing);
    let h = Harness::new(vec![payout.clone()], worker);
    h.gateway.add_balance_transaction(transfer_balance_transaction(
        "txn_1PzLegacyFailed",
        "tr_1PzLegacyFailed",
        TEST_GENERATED_BY,
        payout.id,
    ));
    let event = legacy_fixture("contracts/stripe/payout_failed_unexpanded.json", &payout);

    deliver(&h.reconciler(), &event).await.unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Failed);
    assert_eq!(stored.last_failure_reason.as_deref(), Some(reason::ACCOUNT_CLOSED));
    assert_eq!(stored.stripe_transfer_id.as_deref(), Some("tr_1PzLegacyFailed"));
    assert_eq!(stored.stripe_payout_id.as_deref(), Some("po_1PzLegacyFailed"));
    assert_eq!(h.gateway.state.lock().unwrap().balance_lookups, 1);
}

#[tokio::test]
async fn should_acknowledge_untraceable_legacy_event() {
    let worker = test_worker();
    let payout = test_payout(worker.id, PayoutStatus::Processing);
    let h = Harness::new(vec![payout.clone()], worker);
    let event = legacy_fixture("contracts/stripe/payout_failed_unexpanded.json", &payout);

    assert!(deliver(&h.reconciler(), &event).await.is_ok());
    assert_eq!(h.payouts.get(payout.id), payout);
}

#[tokio::test]
async fn should_ignore_failure_replayed_after_requeue() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker);
    let r = h.reconciler();
    let failure = failed_event("po_live", &payout, reason::ACCOUNT_CLOSED);

    deliver(&r, &failure).await.unwrap();
    let fixed = envelope("evt_acct", "account.updated", account_object(TEST_ACCOUNT_ID, true));
    deliver(&r, &fixed).await.unwrap();
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Pending);

    deliver(&r, &failure).await.unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Pending);
    assert_eq!(stored.retry_count, 0);
}

#[tokio::test]
async fn should_pay_under_fresh_key_after_account_fix() {
    let worker = test_worker();
    let payout = test_payout(worker.id, PayoutStatus::Pending);
    let h = Harness::new(vec![payout.clone()], worker);
    let r = h.reconciler();

    h.processor.process_pending_payouts().await.unwrap();
    assert_eq!(
        h.payouts.get(payout.id).stripe_payout_id.as_deref(),
        Some("po_1")
    );
    let old_failure = failed_event("po_1", &payout, reason::ACCOUNT_CLOSED);
    deliver(&r, &old_failure).await.unwrap();
    let fixed = envelope("evt_acct", "account.updated", account_object(TEST_ACCOUNT_ID, true));
    deliver(&r, &fixed).await.unwrap();
    assert_eq!(h.payouts.get(payout.id).retry_count, 0);

    // The reset retry count reuses `-payout-0`, which answers with po_1 again.
    let report = h.processor.process_pending_payouts().await.unwrap();
    assert_eq!(report.initiated, 0);
    let replayed = h.payouts.get(payout.id);
    assert_eq!(replayed.status, PayoutStatus::Failed);
    assert_eq!(
        replayed.last_failure_reason.as_deref(),
        Some(reason::PAYOUT_INITIATION_FAILED)
    );
    assert_eq!(replayed.stripe_payout_id, None);
    assert_eq!(replayed.stripe_transfer_id.as_deref(), Some("tr_1"));
    assert_eq!(replayed.retry_count, 1);
    assert!(replayed.next_attempt_at.is_some());

    deliver(&r, &old_failure).await.unwrap();
    assert_eq!(h.payouts.get(payout.id), replayed);

    {
        let handle = h.payouts.payouts_handle();
        let mut rows = handle.lock().unwrap();
        let row = rows.get_mut(&payout.id).unwrap();
        row.next_attempt_at = Some(Utc::now() - chrono::Duration::minutes(1));
    }
    let report = h.processor.process_pending_payouts().await.unwrap();
    assert_eq!(report.initiated, 1);
    let retried = h.payouts.get(payout.id);
    assert_eq!(retried.status, PayoutStatus::Processing);
    assert_eq!(retried.stripe_payout_id.as_deref(), Some("po_2"));
    assert_eq!(
        h.gateway.payout_keys(),
        vec![
            format!("{}-payout-0", payout.id),
            format!("{}-payout-0", payout.id),
            format!("{}-payout-1", payout.id),
        ]
    );
    assert_eq!(h.gateway.transfer_call_count(), 1);

    deliver(&r, &paid_event("po_2", &payout)).await.unwrap();
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Paid);
}

#[tokio::test]
async fn should_ignore_failure_replayed_after_balance_requeue() {
    let worker = test_worker();
    let mut payout = processing_payout(worker.id, "po_live");
    payout.status = PayoutStatus::Failed;
    payout.last_failure_reason = Some(reason::BALANCE_INSUFFICIENT.to_owned());
    let h = Harness::new(vec![payout.clone()], worker);
    let idle = RecoveryConfig {
        initial_delay: Duration::from_secs(3600),
        ..RecoveryConfig::default()
    };
    let r = reconciler(Arc::clone(&h.processor), idle);

    deliver(&r, &envelope("evt_bal", "balance.available", json!({ "object": "balance" })))
        .await
        .unwrap();
    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Pending);

    deliver(&r, &failed_event("po_live", &payout, reason::COULD_NOT_PROCESS))
        .await
        .unwrap();

    assert_eq!(h.payouts.get(payout.id).status, PayoutStatus::Pending);
}

#[tokio::test]
async fn should_ignore_failure_for_superseded_external_payout() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_second");
    let h = Harness::new(vec![payout.clone()], worker);

    deliver(&h.reconciler(), &failed_event("po_first", &payout, reason::COULD_NOT_PROCESS))
        .await
        .unwrap();

    let stored = h.payouts.get(payout.id);
    assert_eq!(stored.status, PayoutStatus::Processing);
    assert_eq!(stored.stripe_payout_id.as_deref(), Some("po_second"));
}

// ── Account and capability events ────────────────────────────────────────────

#[tokio::test]
async fn should_requeue_actionable_failures_when_payouts_enabled() {
    let worker = test_worker();
    let actionable = failed_payout(worker.id, reason::ACCOUNT_CLOSED);
    let mut platform = failed_payout(worker.id, reason::INSUFFICIENT_FUNDS);
    platform.week_start_date -= chrono::Duration::days(7);
    let h = Harness::new(vec![actionable.clone(), platform.clone()], worker);

    let event = envelope("evt_acct", "account.updated", account_object(TEST_ACCOUNT_ID, true));
    deliver(&h.reconciler(), &event).await.unwrap();

    let requeued = h.payouts.get(actionable.id);
    assert_eq!(requeued.status, PayoutStatus::Pending);
    assert_eq!(requeued.retry_count, 0);
    assert_eq!(requeued.next_attempt_at, None);
    assert_eq!(h.payouts.get(platform.id).status, PayoutStatus::Failed);
}

#[tokio::test]
async fn should_leave_failures_while_payouts_still_disabled() {
    let worker = test_worker();
    let actionable = failed_payout(worker.id, reason::ACCOUNT_CLOSED);
    let h = Harness::new(vec![actionable.clone()], worker);

    let event = envelope("evt_acct", "account.updated", account_object(TEST_ACCOUNT_ID, false));
    deliver(&h.reconciler(), &event).await.unwrap();

    assert_eq!(h.payouts.get(actionable.id), actionable);
}

#[tokio::test]
async fn should_requeue_when_transfers_capability_activates() {
    let worker = test_worker();
    let actionable = failed_payout(worker.id, reason::STRIPE_ACCOUNT_PAYOUTS_DISABLED);
    let h = Harness::new(vec![actionable.clone()], worker);

    let event = envelope(
        "evt_cap",
        "capability.updated",
        capability_object(TEST_ACCOUNT_ID, "transfers", "active"),
    );
    deliver(&h.reconciler(), &event).await.unwrap();

    assert_eq!(h.payouts.get(actionable.id).status, PayoutStatus::Pending);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn should_only_notify_when_transfers_capability_goes_inactive() {
    let worker = test_worker();
    let payout = processing_payout(worker.id, "po_live");
    let h = Harness::new(vec![payout.clone()], worker.clone());
    let r = h.reconciler();
    let event = envelope(
        "evt_cap_off",
        "capability.updated",
        capability_object(TEST_ACCOUNT_ID, "transfers", "inactive"),
    );

    deliver(&r, &event).await.unwrap();
    deliver(&r, &event).await.unwrap();

    assert_eq!(h.payouts.get(payout.id), payout);
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        PayoutNotification::ActionRequired { worker_id, payout_id: None, reason, reference, .. }
            if *worker_id == worker.id
                && reason == TRANSFERS_CAPABILITY_INACTIVE
                && *reference == format!("{TEST_ACCOUNT_ID}-evt_cap_off")
    ));
}

#[tokio::test]
async fn should_not_notify_workers_still_onboarding() {
    let mut worker = test_worker();
    worker.onboarding_complete = false;
    let h = Harness::new(vec![], worker);

    let event = envelope(
        "evt_cap_off",
        "capability.updated",
        capability_object(TEST_ACCOUNT_ID, "transfers", "inactive"),
    );
    deliver(&h.reconciler(), &event).await.unwrap();

    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn should_ignore_other_capabilities() {
    let worker = test_worker();
    let actionable = failed_payout(worker.id, reason::ACCOUNT_CLOSED);
    let h = Harness::new(vec![actionable.clone()], worker);

    let event = envelope(
        "evt_cap",
        "capability.updated",
        capability_object(TEST_ACCOUNT_ID, "card_payments", "active"),
    );
    deliver(&h.reconciler(), &event).await.unwrap();

    assert_eq!(h.payouts.get(actionable.id), actionable);
}

// ── Other events ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_log_transfer_reversal_without_state_change() {
    let worker = test_worker();
    let mut payout = test_payout(worker.id, PayoutStatus::Paid);
    payout.stripe_transfer_id = Some("tr_1PzReversed".to_owned());
    let h = Harness::new(vec![payout.clone()], worker);
    let event = legacy_fixture("contracts/stripe/transfer_reversed.json", &payout);

    deliver(&h.reconciler(), &event).await.unwrap();

    assert_eq!(h.payouts.get(payout.id), payout);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn should_record_webhook_delivery_check() {
    let h = Harness::new(vec![], test_worker());
    let r = h.reconciler();
    let tag = r.checks.tag().to_owned();
    let event = envelope(
        "evt_pi",
        "payment_intent.created",
        json!({ "id": "pi_check_1", "object": "payment_intent", "metadata": { "generated_by": tag } }),
    );

    deliver(&r, &event).await.unwrap();

    assert!(r.checks.consume("pi_check_1"));
    assert!(!r.checks.consume("pi_check_1"));
}
