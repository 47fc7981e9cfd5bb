//! Ports the use cases depend on.
//!
//! Futures are declared `Send` so use cases can run on spawned tasks.
//! Implementations are free to use `async fn`.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::event::BalanceTransaction;
use crate::domain::types::{
    CompletedWorkItem, ConnectedAccount, CreatedPayout, CreatedTransfer, PayoutNotification,
    PayoutRequest, TransferRequest, Worker, WorkerPayout,
};
use crate::error::{EarningsServiceError, ProcessorError};

/// Read/mutate attempts made by [`PayoutRepository::update_with_retry`].
pub const MAX_UPDATE_ATTEMPTS: u32 = 3;

/// Durable, optimistically-versioned payout records.
pub trait PayoutRepository: Send + Sync {
    /// Insert unless a payout already exists for `(worker_id, week_start_date)`.
    /// Returns `true` if a row was inserted.
    fn create(
        &self,
        payout: &WorkerPayout,
    ) -> impl Future<Output = Result<bool, EarningsServiceError>> + Send;

    fn get_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<WorkerPayout>, EarningsServiceError>> + Send;

    fn get_by_worker_and_period(
        &self,
        worker_id: Uuid,
        week_start_date: NaiveDate,
    ) -> impl Future<Output = Result<Option<WorkerPayout>, EarningsServiceError>> + Send;

    /// Write every mutable field of `payout` if the stored row is still at
    /// `expected_version`, bumping the version. Returns rows affected (0 or 1).
    fn update_if_version(
        &self,
        payout: &WorkerPayout,
        expected_version: i64,
    ) -> impl Future<Output = Result<u64, EarningsServiceError>> + Send;

    /// PENDING rows plus FAILED rows whose retry timer elapsed, oldest first.
    fn find_ready_for_payout(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WorkerPayout>, EarningsServiceError>> + Send;

    fn find_failed_by_reason(
        &self,
        reason: &str,
    ) -> impl Future<Output = Result<Vec<WorkerPayout>, EarningsServiceError>> + Send;

    /// FAILED rows for `worker_id` with no retry timer and a user-actionable reason.
    fn find_actionable_failures_for_worker(
        &self,
        worker_id: Uuid,
    ) -> impl Future<Output = Result<Vec<WorkerPayout>, EarningsServiceError>> + Send;

    /// Read, apply `mutate` to a copy and write it back under the read version.
    ///
    /// A lost race re-reads and re-applies `mutate`, up to
    /// [`MAX_UPDATE_ATTEMPTS`] times, then fails with `Contention`. If `mutate`
    /// returns an error nothing is written and the error is returned. If it
    /// leaves the payout unchanged nothing is written and the stored payout is
    /// returned.
    fn update_with_retry<F>(
        &self,
        id: Uuid,
        mut mutate: F,
    ) -> impl Future<Output = Result<WorkerPayout, EarningsServiceError>> + Send
    where
        F: FnMut(&mut WorkerPayout) -> Result<(), EarningsServiceError> + Send,
    {
        async move {
            for attempt in 1..=MAX_UPDATE_ATTEMPTS {
                let current = self
                    .get_by_id(id)
                    .await?
                    .ok_or(EarningsServiceError::PayoutNotFound(id))?;
                let mut next = current.clone();
                mutate(&mut next)?;
                if next == current {
                    return Ok(current);
                }
                next.updated_at = Utc::now();
                let expected = current.row_version;
                if self.update_if_version(&next, expected).await? == 1 {
                    next.row_version = expected + 1;
                    return Ok(next);
                }
                tracing::debug!(payout_id = %id, attempt, "payout version conflict, retrying");
            }
            tracing::warn!(payout_id = %id, "payout update abandoned after repeated version conflicts");
            Err(EarningsServiceError::Contention(id))
        }
    }
}

/// Worker profiles, owned by the workers service.
pub trait WorkerRepository: Send + Sync {
    fn find_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Worker>, EarningsServiceError>> + Send;

    fn find_by_connect_account_id(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<Option<Worker>, EarningsServiceError>> + Send;
}

/// Completed work items, owned by the scheduling service.
pub trait WorkItemRepository: Send + Sync {
    /// Items completed in `[start, end)` by an assigned worker.
    fn list_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<CompletedWorkItem>, EarningsServiceError>> + Send;
}

/// The external payment processor.
pub trait PaymentGateway: Send + Sync {
    fn get_account(
        &self,
        account_id: &str,
    ) -> impl Future<Output = Result<ConnectedAccount, ProcessorError>> + Send;

    fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<CreatedTransfer, ProcessorError>> + Send;

    fn create_payout(
        &self,
        request: &PayoutRequest,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<CreatedPayout, ProcessorError>> + Send;

    /// Balance transaction with its `source` expanded.
    fn get_balance_transaction(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<BalanceTransaction, ProcessorError>> + Send;
}

/// Fire-and-forget notification sink. Implementations log their own failures.
pub trait NotificationPort: Send + Sync {
    fn notify(&self, notification: PayoutNotification) -> impl Future<Output = ()> + Send;
}
