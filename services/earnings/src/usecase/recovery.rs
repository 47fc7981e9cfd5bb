use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::failure::reason;
use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkerRepository,
};
use crate::error::EarningsServiceError;
use crate::usecase::process::PayoutProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Wait before the first attempt so the replenished balance settles.
    pub initial_delay: Duration,
    pub initial_backoff: Duration,
    pub max_attempts: u32,
    /// Upper bound on the whole recovery run.
    pub timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(10),
            max_attempts: 5,
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A pass finished without hitting the balance shortage again.
    Completed,
    /// Every attempt still ran short of balance.
    Exhausted,
    /// A pass failed for a reason other than balance.
    Aborted,
    TimedOut,
}

/// Re-drives balance-starved payouts once the platform balance is replenished.
pub struct BalanceRecovery<P, W, G, N> {
    processor: Arc<PayoutProcessor<P, W, G, N>>,
    guard: Arc<Mutex<()>>,
    config: RecoveryConfig,
}

impl<P, W, G, N> Clone for BalanceRecovery<P, W, G, N> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            guard: Arc::clone(&self.guard),
            config: self.config,
        }
    }
}

impl<P, W, G, N> BalanceRecovery<P, W, G, N>
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    pub fn new(processor: Arc<PayoutProcessor<P, W, G, N>>, config: RecoveryConfig) -> Self {
        Self {
            processor,
            guard: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Handle a balance-available signal.
    ///
    /// Signals arriving while another is re-queueing are dropped. Returns the
    /// spawned recovery task, or `None` if nothing was started.
    pub async fn on_balance_available(
        &self,
    ) -> Result<Option<JoinHandle<RecoveryOutcome>>, EarningsServiceError> {
        let Ok(guard) = self.guard.try_lock() else {
            info!("balance recovery already in progress; dropping signal");
            return Ok(None);
        };
        let requeued = requeue_balance_failures(&self.processor).await?;
        drop(guard);

        if requeued == 0 {
            debug!("no balance-starved payouts to recover");
            return Ok(None);
        }
        info!(requeued, "starting balance recovery");
        let processor = Arc::clone(&self.processor);
        let config = self.config;
        Ok(Some(tokio::spawn(run_recovery(processor, config))))
    }
}

async fn requeue_balance_failures<P, W, G, N>(
    processor: &PayoutProcessor<P, W, G, N>,
) -> Result<usize, EarningsServiceError>
where
    P: PayoutRepository,
    W: WorkerRepository,
    G: PaymentGateway,
    N: NotificationPort,
{
    let starved = processor
        .payouts
        .find_failed_by_reason(reason::BALANCE_INSUFFICIENT)
        .await?;
    let mut requeued = 0;
    for payout in starved {
        match processor.requeue_failed(payout.id, false).await {
            Ok(true) => requeued += 1,
            Ok(false) => {}
            Err(e) => {
                error!(payout_id = %payout.id, error = %e, "failed to re-queue balance-starved payout")
            }
        }
    }
    Ok(requeued)
}

async fn run_recovery<P, W, G, N>(
    processor: Arc<PayoutProcessor<P, W, G, N>>,
    config: RecoveryConfig,
) -> RecoveryOutcome
where
    P: PayoutRepository,
    W: WorkerRepository,
    G: PaymentGateway,
    N: NotificationPort,
{
    let outcome = tokio::time::timeout(config.timeout, recovery_loop(&processor, config))
        .await
        .unwrap_or(RecoveryOutcome::TimedOut);
    match outcome {
        RecoveryOutcome::Completed => info!("balance recovery completed"),
        other => error!(
            outcome = ?other,
            "balance recovery stopped; payouts need manual follow-up"
        ),
    }
    outcome
}

async fn recovery_loop<P, W, G, N>(
    processor: &PayoutProcessor<P, W, G, N>,
    config: RecoveryConfig,
) -> RecoveryOutcome
where
    P: PayoutRepository,
    W: WorkerRepository,
    G: PaymentGateway,
    N: NotificationPort,
{
    tokio::time::sleep(config.initial_delay).await;
    let mut backoff = config.initial_backoff;

    for attempt in 1..=config.max_attempts {
        match processor.process_pending_payouts().await {
            Ok(report) if !report.balance_insufficient => return RecoveryOutcome::Completed,
            Ok(_) => {
                warn!(attempt, "platform balance still insufficient");
                if attempt == config.max_attempts {
                    break;
                }
                if let Err(e) = requeue_balance_failures(processor).await {
                    error!(error = %e, "failed to re-queue balance-starved payouts");
                    return RecoveryOutcome::Aborted;
                }
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(attempt, error = %e, "recovery pass failed");
                return RecoveryOutcome::Aborted;
            }
        }
    }
    RecoveryOutcome::Exhausted
}
