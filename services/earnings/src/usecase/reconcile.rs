use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::event::{
    AccountObject, CapabilityObject, EventKind, EventParseError, Expandable, Metadata,
    PaymentIntentObject, PayoutObject, TransferObject, WebhookEvent,
};
use crate::domain::failure::reason;
use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkerRepository,
};
use crate::domain::signature::WebhookSecrets;
use crate::domain::types::{META_GENERATED_BY, META_PAYOUT_ID, PayoutNotification};
use crate::error::EarningsServiceError;
use crate::usecase::process::PayoutProcessor;
use crate::usecase::recovery::BalanceRecovery;
use crate::usecase::webhook_check::WebhookCheckRegistry;

/// Notification reason sent when a worker's transfers capability goes inactive.
pub const TRANSFERS_CAPABILITY_INACTIVE: &str = "transfers_capability_inactive";

/// Where a payout event points in our ledger.
#[derive(Debug, PartialEq)]
enum PayoutRef {
    Ours {
        payout_id: Uuid,
        transfer_id: Option<String>,
    },
    /// Created by another deployment sharing the processor account.
    Foreign(String),
    Untraceable(&'static str),
}

/// Verifies processor webhooks and turns them into payout state transitions.
pub struct WebhookReconciler<P, W, G, N> {
    pub processor: Arc<PayoutProcessor<P, W, G, N>>,
    pub recovery: BalanceRecovery<P, W, G, N>,
    pub secrets: Arc<WebhookSecrets>,
    pub checks: Arc<WebhookCheckRegistry>,
}

impl<P, W, G, N> WebhookReconciler<P, W, G, N>
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    /// Authenticate and apply one delivery.
    ///
    /// Errors only for a missing or invalid signature or an unparsable
    /// envelope. Anything that goes wrong while applying a verified event is
    /// logged and swallowed so the processor does not redeliver it.
    pub async fn receive(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<(), EarningsServiceError> {
        let signature = signature.ok_or(EarningsServiceError::MissingSignature)?;
        self.secrets
            .verify(payload, signature, Utc::now())
            .map_err(|e| {
                warn!(error = %e, "rejected webhook signature");
                EarningsServiceError::InvalidSignature
            })?;

        let event = match WebhookEvent::parse(payload) {
            Ok(event) => event,
            Err(EventParseError::Envelope(e)) => {
                warn!(error = %e, "rejected unparsable webhook payload");
                return Err(EarningsServiceError::InvalidPayload);
            }
            Err(e) => {
                error!(error = %e, "could not decode webhook object; acknowledging");
                return Ok(());
            }
        };

        let event_id = event.id.clone();
        if let Err(e) = self.handle_event(event).await {
            error!(%event_id, error = %e, "failed to apply webhook event");
        }
        Ok(())
    }

    pub async fn handle_event(&self, event: WebhookEvent) -> Result<(), EarningsServiceError> {
        debug!(event_id = %event.id, "handling webhook event");
        match event.kind {
            EventKind::PayoutPaid(payout) => self.on_payout(payout, true).await,
            EventKind::PayoutFailed(payout) => self.on_payout(payout, false).await,
            EventKind::AccountUpdated(account) => self.on_account_updated(account).await,
            EventKind::CapabilityUpdated(capability) => {
                self.on_capability_updated(&event.id, capability).await
            }
            EventKind::TransferReversed(transfer) => {
                self.on_transfer_reversed(&transfer);
                Ok(())
            }
            EventKind::BalanceAvailable => {
                self.recovery.on_balance_available().await?;
                Ok(())
            }
            EventKind::PaymentIntentCreated(intent) => {
                self.on_payment_intent(&intent);
                Ok(())
            }
            EventKind::Unknown(event_type) => {
                debug!(%event_type, "ignoring unhandled event type");
                Ok(())
            }
        }
    }

    async fn on_payout(&self, object: PayoutObject, paid: bool) -> Result<(), EarningsServiceError> {
        let (payout_id, transfer_id) = match self.locate(&object).await {
            PayoutRef::Ours {
                payout_id,
                transfer_id,
            } => (payout_id, transfer_id),
            PayoutRef::Foreign(generated_by) => {
                debug!(external_payout_id = %object.id, %generated_by, "ignoring payout from another deployment");
                return Ok(());
            }
            PayoutRef::Untraceable(why) => {
                warn!(external_payout_id = %object.id, why, "cannot trace payout event; ignoring");
                return Ok(());
            }
        };

        let result = if paid {
            self.processor
                .mark_paid(payout_id, &object.id)
                .await
                .map(|_| ())
        } else {
            let failure_reason = object
                .failure_code
                .as_deref()
                .unwrap_or(reason::UNKNOWN_PAYOUT_FAILURE);
            self.processor
                .handle_failure(
                    payout_id,
                    failure_reason,
                    transfer_id.as_deref(),
                    Some(&object.id),
                )
                .await
                .map(|_| ())
        };
        match result {
            Err(EarningsServiceError::PayoutNotFound(id)) => {
                warn!(payout_id = %id, external_payout_id = %object.id, "payout event for unknown payout; ignoring");
                Ok(())
            }
            other => other,
        }
    }

    // Current events carry our metadata on the payout itself. Older payouts
    // only have it on the transfer behind their balance transaction.
    async fn locate(&self, object: &PayoutObject) -> PayoutRef {
        if object.metadata.contains_key(META_GENERATED_BY) {
            return self.read_metadata(&object.metadata, None);
        }

        let txn_id = match &object.balance_transaction {
            None => return PayoutRef::Untraceable("no metadata and no balance transaction"),
            Some(Expandable::Object(txn)) => {
                if let Some(Expandable::Object(transfer)) = &txn.source {
                    return self.read_metadata(&transfer.metadata, Some(&transfer.id));
                }
                txn.id.clone()
            }
            Some(Expandable::Id(id)) => id.clone(),
        };

        match self.processor.gateway.get_balance_transaction(&txn_id).await {
            Ok(txn) => match txn.source {
                Some(Expandable::Object(transfer)) => {
                    self.read_metadata(&transfer.metadata, Some(&transfer.id))
                }
                _ => PayoutRef::Untraceable("balance transaction source is not a transfer"),
            },
            Err(e) => {
                warn!(balance_transaction = %txn_id, error = %e, "balance transaction lookup failed");
                PayoutRef::Untraceable("balance transaction lookup failed")
            }
        }
    }

    fn read_metadata(&self, metadata: &Metadata, transfer_id: Option<&str>) -> PayoutRef {
        let Some(generated_by) = metadata.get(META_GENERATED_BY) else {
            return PayoutRef::Untraceable("missing generated_by");
        };
        if *generated_by != self.processor.generated_by {
            return PayoutRef::Foreign(generated_by.clone());
        }
        match metadata
            .get(META_PAYOUT_ID)
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            Some(payout_id) => PayoutRef::Ours {
                payout_id,
                transfer_id: transfer_id.map(str::to_owned),
            },
            None => PayoutRef::Untraceable("missing or malformed payout_id"),
        }
    }

    async fn on_account_updated(&self, account: AccountObject) -> Result<(), EarningsServiceError> {
        if !account.payouts_enabled {
            debug!(account_id = %account.id, "account payouts still disabled");
            return Ok(());
        }
        let Some(worker) = self
            .processor
            .workers
            .find_by_connect_account_id(&account.id)
            .await?
        else {
            debug!(account_id = %account.id, "no worker for connected account");
            return Ok(());
        };
        self.processor
            .requeue_actionable_for_worker(worker.id)
            .await?;
        Ok(())
    }

    async fn on_capability_updated(
        &self,
        event_id: &str,
        capability: CapabilityObject,
    ) -> Result<(), EarningsServiceError> {
        if !capability.is_transfers() {
            return Ok(());
        }
        let account_id = capability.account_id();
        let Some(worker) = self
            .processor
            .workers
            .find_by_connect_account_id(account_id)
            .await?
        else {
            debug!(account_id, "no worker for connected account");
            return Ok(());
        };

        if capability.is_active() {
            self.processor
                .requeue_actionable_for_worker(worker.id)
                .await?;
            return Ok(());
        }

        if !(worker.is_active && worker.onboarding_complete) {
            debug!(worker_id = %worker.id, "skipping capability notice for inactive or onboarding worker");
            return Ok(());
        }
        info!(worker_id = %worker.id, account_id, status = %capability.status, "transfers capability inactive");
        self.processor
            .notifier
            .notify(PayoutNotification::ActionRequired {
                worker_id: worker.id,
                email: worker.email,
                first_name: worker.first_name,
                payout_id: None,
                amount_cents: None,
                reason: TRANSFERS_CAPABILITY_INACTIVE.to_owned(),
                reference: format!("{account_id}-{event_id}"),
            })
            .await;
        Ok(())
    }

    // Reversals are resolved by finance by hand; nothing is compensated here.
    fn on_transfer_reversed(&self, transfer: &TransferObject) {
        match self.read_metadata(&transfer.metadata, Some(&transfer.id)) {
            PayoutRef::Ours { payout_id, .. } => warn!(
                %payout_id,
                transfer_id = %transfer.id,
                "transfer reversed; requires manual investigation"
            ),
            _ => debug!(transfer_id = %transfer.id, "ignoring reversal of foreign transfer"),
        }
    }

    fn on_payment_intent(&self, intent: &PaymentIntentObject) {
        if self.checks.observe(intent) {
            info!(payment_intent_id = %intent.id, "webhook delivery check received");
        }
    }
}
