//! Builders for processor event envelopes.

use serde_json::{Value, json};

/// Wrap `object` in an event envelope of the given type.
pub fn envelope(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "object": "event",
        "type": event_type,
        "created": 1_700_000_000,
        "data": { "object": object },
    })
}

/// `payout.paid` / `payout.failed` object carrying this service's metadata.
pub fn payout_object(
    external_payout_id: &str,
    generated_by: &str,
    payout_id: &str,
    failure_code: Option<&str>,
) -> Value {
    json!({
        "id": external_payout_id,
        "object": "payout",
        "amount": 1500,
        "currency": "usd",
        "status": if failure_code.is_some() { "failed" } else { "paid" },
        "failure_code": failure_code,
        "metadata": {
            "generated_by": generated_by,
            "payout_id": payout_id,
        },
    })
}

pub fn account_object(account_id: &str, payouts_enabled: bool) -> Value {
    json!({
        "id": account_id,
        "object": "account",
        "payouts_enabled": payouts_enabled,
    })
}

pub fn capability_object(account_id: &str, capability: &str, status: &str) -> Value {
    json!({
        "id": capability,
        "object": "capability",
        "account": account_id,
        "status": status,
    })
}

pub fn to_bytes(event: &Value) -> Vec<u8> {
    serde_json::to_vec(event).unwrap()
}
