use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::failure::{self, FailureClass, reason};
use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkerRepository,
};
use crate::domain::types::{
    META_GENERATED_BY, META_PAYOUT_ID, META_WORKER_ID, PayoutNotification, PayoutRequest,
    PayoutStatus, TransferRequest, WorkerPayout,
};
use crate::error::EarningsServiceError;

/// Timer-based retry schedule for system-recoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Failures at or beyond this count get no further timer.
    pub max_retries: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::hours(1),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// `None` means no automatic retry. `retry_count` is the count after
    /// recording the failure.
    pub fn next_attempt_at(
        &self,
        failure_reason: &str,
        retry_count: i32,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !failure::classify(failure_reason).is_system_recoverable()
            || failure::awaits_balance_signal(failure_reason)
            || retry_count >= self.max_retries
        {
            return None;
        }
        let exponent = (retry_count - 1).clamp(0, 30) as u32;
        Some(now + self.base_delay * 2_i32.pow(exponent))
    }
}

/// Outcome of one `process_pending_payouts` pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub considered: usize,
    pub initiated: usize,
    pub failed: usize,
    /// Claimed by another instance or no longer due.
    pub skipped: usize,
    /// At least one transfer failed for lack of platform balance.
    pub balance_insufficient: bool,
}

enum Attempt {
    Initiated,
    Failed(String),
}

/// A payout moved to PROCESSING by this caller.
struct Claimed {
    payout: WorkerPayout,
    /// External payout recorded by an earlier attempt, cleared by the claim.
    superseded_payout_id: Option<String>,
}

/// Drives payouts from PENDING through the processor and records the results.
pub struct PayoutProcessor<P, W, G, N> {
    pub payouts: P,
    pub workers: W,
    pub gateway: G,
    pub notifier: N,
    /// Instance tag written into processor metadata.
    pub generated_by: String,
    pub retry_policy: RetryPolicy,
}

impl<P, W, G, N> PayoutProcessor<P, W, G, N>
where
    P: PayoutRepository,
    W: WorkerRepository,
    G: PaymentGateway,
    N: NotificationPort,
{
    /// Initiate every ready payout. Per-payout failures are recorded and never
    /// abort the pass; only failing to load the ready set is an error.
    pub async fn process_pending_payouts(&self) -> Result<ProcessReport, EarningsServiceError> {
        let ready = self.payouts.find_ready_for_payout(Utc::now()).await?;
        let mut report = ProcessReport {
            considered: ready.len(),
            ..ProcessReport::default()
        };

        for candidate in ready {
            let claimed = match self.claim(candidate.id).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(payout_id = %candidate.id, error = %e, "failed to claim payout");
                    report.failed += 1;
                    continue;
                }
            };
            let payout = claimed.payout;
            match self
                .initiate(&payout, claimed.superseded_payout_id.as_deref())
                .await
            {
                Ok(Attempt::Initiated) => report.initiated += 1,
                Ok(Attempt::Failed(failure_reason)) => {
                    report.failed += 1;
                    if failure::awaits_balance_signal(&failure_reason) {
                        report.balance_insufficient = true;
                    }
                }
                Err(e) => {
                    error!(payout_id = %payout.id, error = %e, "payout attempt aborted");
                    report.failed += 1;
                }
            }
        }

        info!(
            considered = report.considered,
            initiated = report.initiated,
            failed = report.failed,
            skipped = report.skipped,
            balance_insufficient = report.balance_insufficient,
            "processed pending payouts"
        );
        Ok(report)
    }

    /// PENDING / due FAILED → PROCESSING. `None` when another caller got there first.
    async fn claim(&self, id: Uuid) -> Result<Option<Claimed>, EarningsServiceError> {
        let now = Utc::now();
        let mut superseded_payout_id = None;
        let claimed = self
            .payouts
            .update_with_retry(id, |payout| {
                if !payout.is_claimable(now) {
                    return Err(EarningsServiceError::InvalidTransition {
                        id: payout.id,
                        status: payout.status,
                    });
                }
                payout.status = PayoutStatus::Processing;
                payout.last_attempt_at = Some(now);
                payout.next_attempt_at = None;
                superseded_payout_id = payout.stripe_payout_id.take();
                Ok(())
            })
            .await;
        match claimed {
            Ok(payout) => Ok(Some(Claimed {
                payout,
                superseded_payout_id,
            })),
            Err(EarningsServiceError::InvalidTransition { status, .. }) => {
                info!(payout_id = %id, %status, "payout no longer claimable, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn initiate(
        &self,
        payout: &WorkerPayout,
        superseded_payout_id: Option<&str>,
    ) -> Result<Attempt, EarningsServiceError> {
        let Some(worker) = self.workers.find_by_id(payout.worker_id).await? else {
            return self.fail(payout, reason::WORKER_RECORD_NOT_FOUND, None).await;
        };
        let Some(account_id) = worker
            .stripe_connect_account_id
            .as_deref()
            .filter(|id| !id.is_empty())
        else {
            return self
                .fail(payout, reason::WORKER_MISSING_STRIPE_CONNECT_ID, None)
                .await;
        };

        let account = match self.gateway.get_account(account_id).await {
            Ok(account) => account,
            Err(e) => {
                warn!(payout_id = %payout.id, account_id, error = %e, "connected account lookup failed");
                let code = e
                    .code()
                    .unwrap_or(reason::UNKNOWN_STRIPE_ERROR_FETCHING_ACCOUNT)
                    .to_owned();
                return self.fail(payout, &code, None).await;
            }
        };
        if !account.payouts_enabled {
            return self
                .fail(payout, reason::STRIPE_ACCOUNT_PAYOUTS_DISABLED, None)
                .await;
        }

        // Funds already moved by an earlier attempt stay on the connected
        // account; only the bank payout has to be retried.
        let transfer_id = match payout.stripe_transfer_id.clone() {
            Some(existing) => {
                info!(payout_id = %payout.id, transfer_id = %existing, "reusing recorded transfer");
                existing
            }
            None => {
                let request = TransferRequest {
                    amount_cents: payout.amount_cents,
                    destination: account_id.to_owned(),
                    metadata: self.metadata(payout, true),
                };
                match self
                    .gateway
                    .create_transfer(&request, &payout.transfer_idempotency_key())
                    .await
                {
                    Ok(transfer) => transfer.id,
                    Err(e) => {
                        warn!(payout_id = %payout.id, error = %e, "transfer creation failed");
                        let code = e
                            .code()
                            .unwrap_or(reason::UNKNOWN_STRIPE_TRANSFER_ERROR)
                            .to_owned();
                        return self.fail(payout, &code, None).await;
                    }
                }
            }
        };

        let request = PayoutRequest {
            amount_cents: payout.amount_cents,
            connected_account: account_id.to_owned(),
            metadata: self.metadata(payout, false),
        };
        let created = match self
            .gateway
            .create_payout(&request, &payout.payout_idempotency_key())
            .await
        {
            Ok(created) => created,
            Err(e) => {
                error!(
                    payout_id = %payout.id,
                    worker_id = %payout.worker_id,
                    transfer_id = %transfer_id,
                    amount_cents = payout.amount_cents,
                    error = %e,
                    "CRITICAL: transfer succeeded but payout initiation failed; funds remain on the connected account"
                );
                return self
                    .fail(
                        payout,
                        reason::PAYOUT_INITIATION_FAILED_AFTER_TRANSFER,
                        Some(&transfer_id),
                    )
                    .await;
            }
        };

        // A requeue that reset the retry count reuses an earlier key, and the
        // processor answers with the external payout that already failed.
        if superseded_payout_id == Some(created.id.as_str()) {
            warn!(
                payout_id = %payout.id,
                stripe_payout_id = %created.id,
                idempotency_key = %payout.payout_idempotency_key(),
                "processor replayed a superseded payout; retrying under a new key"
            );
            return self
                .fail(
                    payout,
                    reason::PAYOUT_INITIATION_FAILED,
                    Some(&transfer_id),
                )
                .await;
        }

        self.record_initiated(payout.id, &transfer_id, &created.id)
            .await?;
        info!(
            payout_id = %payout.id,
            transfer_id = %transfer_id,
            stripe_payout_id = %created.id,
            "payout initiated"
        );
        Ok(Attempt::Initiated)
    }

    fn metadata(&self, payout: &WorkerPayout, with_worker: bool) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::from([
            (META_GENERATED_BY.to_owned(), self.generated_by.clone()),
            (META_PAYOUT_ID.to_owned(), payout.id.to_string()),
        ]);
        if with_worker {
            metadata.insert(META_WORKER_ID.to_owned(), payout.worker_id.to_string());
        }
        metadata
    }

    // Success fields are only written while the row is still ours; a webhook
    // that already failed it keeps its status and gains only the external ids.
    async fn record_initiated(
        &self,
        id: Uuid,
        transfer_id: &str,
        stripe_payout_id: &str,
    ) -> Result<(), EarningsServiceError> {
        let updated = self
            .payouts
            .update_with_retry(id, |payout| {
                payout.backfill_transfer_id(Some(transfer_id));
                if payout.status == PayoutStatus::Processing {
                    payout.stripe_payout_id = Some(stripe_payout_id.to_owned());
                    payout.last_failure_reason = None;
                    payout.next_attempt_at = None;
                } else {
                    payout.backfill_payout_id(Some(stripe_payout_id));
                }
                Ok(())
            })
            .await?;
        if updated.status != PayoutStatus::Processing {
            warn!(
                payout_id = %id,
                status = %updated.status,
                "payout changed state while initiating; kept its status"
            );
        }
        Ok(())
    }

    async fn fail(
        &self,
        payout: &WorkerPayout,
        failure_reason: &str,
        transfer_id: Option<&str>,
    ) -> Result<Attempt, EarningsServiceError> {
        warn!(payout_id = %payout.id, reason = failure_reason, "payout attempt failed");
        self.handle_failure(payout.id, failure_reason, transfer_id, None)
            .await?;
        Ok(Attempt::Failed(failure_reason.to_owned()))
    }

    /// Record a failure for a PROCESSING payout and schedule what happens next.
    ///
    /// Returns `None` when the failure does not apply: the payout is not
    /// PROCESSING, or `external_payout_id` names an external payout other than
    /// the one on record.
    pub async fn handle_failure(
        &self,
        payout_id: Uuid,
        failure_reason: &str,
        transfer_id: Option<&str>,
        external_payout_id: Option<&str>,
    ) -> Result<Option<WorkerPayout>, EarningsServiceError> {
        let now = Utc::now();
        let policy = self.retry_policy;
        let result = self
            .payouts
            .update_with_retry(payout_id, |payout| {
                if payout.status != PayoutStatus::Processing {
                    return Err(EarningsServiceError::InvalidTransition {
                        id: payout.id,
                        status: payout.status,
                    });
                }
                if let (Some(reported), Some(recorded)) =
                    (external_payout_id, payout.stripe_payout_id.as_deref())
                {
                    if reported != recorded {
                        return Err(EarningsServiceError::StaleEvent(payout.id));
                    }
                }
                payout.status = PayoutStatus::Failed;
                payout.last_failure_reason = Some(failure_reason.to_owned());
                payout.backfill_transfer_id(transfer_id);
                payout.backfill_payout_id(external_payout_id);
                payout.retry_count += 1;
                payout.next_attempt_at =
                    policy.next_attempt_at(failure_reason, payout.retry_count, now);
                Ok(())
            })
            .await;

        let updated = match result {
            Ok(updated) => updated,
            Err(EarningsServiceError::InvalidTransition { status, .. }) => {
                info!(payout_id = %payout_id, %status, reason = failure_reason, "ignoring failure for payout that is not processing");
                return Ok(None);
            }
            Err(EarningsServiceError::StaleEvent(_)) => {
                warn!(
                    payout_id = %payout_id,
                    external_payout_id = external_payout_id.unwrap_or_default(),
                    "ignoring failure for a superseded external payout"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.notify_failure(&updated, failure_reason).await;
        Ok(Some(updated))
    }

    async fn notify_failure(&self, payout: &WorkerPayout, failure_reason: &str) {
        let reference = format!("{}-{}", payout.id, payout.retry_count);
        let class = failure::classify(failure_reason);

        if class == FailureClass::UserActionable {
            match self.workers.find_by_id(payout.worker_id).await {
                Ok(Some(worker)) => {
                    self.notifier
                        .notify(PayoutNotification::ActionRequired {
                            worker_id: worker.id,
                            email: worker.email,
                            first_name: worker.first_name,
                            payout_id: Some(payout.id),
                            amount_cents: Some(payout.amount_cents),
                            reason: failure_reason.to_owned(),
                            reference,
                        })
                        .await;
                }
                Ok(None) => {
                    warn!(payout_id = %payout.id, worker_id = %payout.worker_id, "cannot notify missing worker")
                }
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "worker lookup for notification failed")
                }
            }
            return;
        }

        if payout.next_attempt_at.is_some() {
            info!(
                payout_id = %payout.id,
                reason = failure_reason,
                retry_count = payout.retry_count,
                next_attempt_at = ?payout.next_attempt_at,
                "payout retry scheduled"
            );
            return;
        }

        // Unrecognized codes are final but stay internal until classified.
        if !failure::is_recognized(failure_reason) {
            warn!(payout_id = %payout.id, reason = failure_reason, "unrecognized payout failure reason; no retry");
            return;
        }

        self.notifier
            .notify(PayoutNotification::PlatformIssue {
                payout_id: payout.id,
                worker_id: payout.worker_id,
                amount_cents: payout.amount_cents,
                reason: failure_reason.to_owned(),
                reference,
            })
            .await;
    }

    /// PROCESSING → PAID. Returns `None` if the payout is in any other state.
    pub async fn mark_paid(
        &self,
        payout_id: Uuid,
        external_payout_id: &str,
    ) -> Result<Option<WorkerPayout>, EarningsServiceError> {
        let result = self
            .payouts
            .update_with_retry(payout_id, |payout| {
                if payout.status != PayoutStatus::Processing {
                    return Err(EarningsServiceError::InvalidTransition {
                        id: payout.id,
                        status: payout.status,
                    });
                }
                payout.status = PayoutStatus::Paid;
                payout.backfill_payout_id(Some(external_payout_id));
                payout.last_failure_reason = None;
                payout.next_attempt_at = None;
                Ok(())
            })
            .await;
        match result {
            Ok(updated) => {
                info!(payout_id = %payout_id, external_payout_id, "payout paid");
                Ok(Some(updated))
            }
            Err(EarningsServiceError::InvalidTransition { status, .. }) => {
                info!(payout_id = %payout_id, %status, "ignoring paid event for payout that is not processing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// FAILED → PENDING with no timer. Returns `false` if the payout is not FAILED.
    pub async fn requeue_failed(
        &self,
        payout_id: Uuid,
        reset_retry_count: bool,
    ) -> Result<bool, EarningsServiceError> {
        let result = self
            .payouts
            .update_with_retry(payout_id, |payout| {
                if payout.status != PayoutStatus::Failed {
                    return Err(EarningsServiceError::InvalidTransition {
                        id: payout.id,
                        status: payout.status,
                    });
                }
                payout.status = PayoutStatus::Pending;
                payout.next_attempt_at = None;
                if reset_retry_count {
                    payout.retry_count = 0;
                }
                Ok(())
            })
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(EarningsServiceError::InvalidTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Re-queue a worker's user-actionable failures after their account was fixed.
    pub async fn requeue_actionable_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<usize, EarningsServiceError> {
        let failures = self
            .payouts
            .find_actionable_failures_for_worker(worker_id)
            .await?;
        let mut requeued = 0;
        for payout in failures {
            match self.requeue_failed(payout.id, true).await {
                Ok(true) => requeued += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(payout_id = %payout.id, error = %e, "failed to re-queue payout")
                }
            }
        }
        info!(%worker_id, requeued, "re-queued actionable payout failures");
        Ok(requeued)
    }
}
