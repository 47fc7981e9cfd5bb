use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, sea_query::OnConflict};
use serde::Serialize;
use uuid::Uuid;

use payday_core::serde::to_rfc3339_ms;
use payday_earnings_schema::outbox_events;

use crate::domain::repository::NotificationPort;
use crate::domain::types::{OutboxEvent, PayoutNotification};
use crate::error::EarningsServiceError;

#[derive(Serialize)]
struct ActionRequiredPayload<'a> {
    worker_id: Uuid,
    email: &'a str,
    first_name: &'a str,
    payout_id: Option<Uuid>,
    amount_cents: Option<i64>,
    reason: &'a str,
    #[serde(serialize_with = "to_rfc3339_ms")]
    requested_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PlatformIssuePayload<'a> {
    payout_id: Uuid,
    worker_id: Uuid,
    amount_cents: i64,
    reason: &'a str,
    #[serde(serialize_with = "to_rfc3339_ms")]
    requested_at: DateTime<Utc>,
}

/// Build the outbox row for `notification`.
pub fn outbox_event(
    notification: &PayoutNotification,
    now: DateTime<Utc>,
) -> Result<OutboxEvent, serde_json::Error> {
    let payload = match notification {
        PayoutNotification::ActionRequired {
            worker_id,
            email,
            first_name,
            payout_id,
            amount_cents,
            reason,
            ..
        } => serde_json::to_value(ActionRequiredPayload {
            worker_id: *worker_id,
            email,
            first_name,
            payout_id: *payout_id,
            amount_cents: *amount_cents,
            reason,
            requested_at: now,
        })?,
        PayoutNotification::PlatformIssue {
            payout_id,
            worker_id,
            amount_cents,
            reason,
            ..
        } => serde_json::to_value(PlatformIssuePayload {
            payout_id: *payout_id,
            worker_id: *worker_id,
            amount_cents: *amount_cents,
            reason,
            requested_at: now,
        })?,
    };
    Ok(OutboxEvent {
        id: Uuid::now_v7(),
        kind: notification.kind().to_owned(),
        worker_id: notification.worker_id(),
        payout_id: notification.payout_id(),
        payload,
        idempotency_key: notification.idempotency_key(),
    })
}

/// Enqueues notifications in `outbox_events` for the notification service.
#[derive(Clone)]
pub struct OutboxNotifier {
    pub db: DatabaseConnection,
}

impl OutboxNotifier {
    async fn enqueue(&self, event: OutboxEvent) -> Result<(), EarningsServiceError> {
        let now = Utc::now();
        let model = outbox_events::ActiveModel {
            id: Set(event.id),
            kind: Set(event.kind),
            worker_id: Set(event.worker_id),
            payout_id: Set(event.payout_id),
            payload: Set(event.payload),
            idempotency_key: Set(event.idempotency_key),
            attempts: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            next_attempt_at: Set(now),
            processed_at: Set(None),
            failed_at: Set(None),
        };
        // Same key means the notification was already enqueued.
        outbox_events::Entity::insert(model)
            .on_conflict(
                OnConflict::column(outbox_events::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("insert outbox event")?;
        Ok(())
    }
}

impl NotificationPort for OutboxNotifier {
    async fn notify(&self, notification: PayoutNotification) {
        let event = match outbox_event(&notification, Utc::now()) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, kind = notification.kind(), "failed to encode notification");
                return;
            }
        };
        let key = event.idempotency_key.clone();
        match self.enqueue(event).await {
            Ok(()) => tracing::info!(
                kind = notification.kind(),
                reason = notification.reason(),
                idempotency_key = %key,
                "notification enqueued"
            ),
            Err(e) => tracing::error!(
                error = ?e,
                kind = notification.kind(),
                idempotency_key = %key,
                "failed to enqueue notification"
            ),
        }
    }
}
