use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use serde::Deserialize;

use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkerRepository,
};
use crate::error::EarningsServiceError;
use crate::state::AppState;

pub const STRIPE_SIGNATURE: &str = "stripe-signature";

// ── POST /earnings/stripe/webhook ────────────────────────────────────────────

/// The raw body is kept as bytes; the signature covers it exactly.
pub async fn stripe_webhook<P, W, G, N>(
    State(state): State<AppState<P, W, G, N>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, EarningsServiceError>
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    let signature = headers
        .get(STRIPE_SIGNATURE)
        .and_then(|value| value.to_str().ok());
    state.reconciler.receive(&body, signature).await?;
    Ok(StatusCode::OK)
}

// ── GET /earnings/stripe/webhook/check ───────────────────────────────────────

#[derive(Deserialize)]
pub struct WebhookCheckQuery {
    pub id: String,
}

pub async fn webhook_check<P, W, G, N>(
    State(state): State<AppState<P, W, G, N>>,
    Query(query): Query<WebhookCheckQuery>,
) -> Result<StatusCode, EarningsServiceError>
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    if state.reconciler.checks.consume(&query.id) {
        Ok(StatusCode::OK)
    } else {
        Err(EarningsServiceError::WebhookCheckNotFound)
    }
}
