//! Periodic batch jobs. Each run is bounded by its own deadline and a slow
//! run never queues a burst of catch-up runs.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::config::EarningsConfig;
use crate::domain::repository::{
    NotificationPort, PaymentGateway, PayoutRepository, WorkItemRepository, WorkerRepository,
};
use crate::error::EarningsServiceError;
use crate::usecase::aggregate::AggregatePayoutsUseCase;
use crate::usecase::process::PayoutProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub aggregation_interval: Duration,
    pub aggregation_timeout: Duration,
    pub processing_interval: Duration,
    pub processing_timeout: Duration,
}

impl JobSchedule {
    pub fn from_config(config: &EarningsConfig) -> Self {
        Self {
            aggregation_interval: config.aggregation_interval(),
            aggregation_timeout: Duration::from_secs(15 * 60),
            processing_interval: config.processing_interval(),
            processing_timeout: Duration::from_secs(10 * 60),
        }
    }
}

pub fn spawn_aggregation_job<P, J>(
    usecase: Arc<AggregatePayoutsUseCase<P, J>>,
    schedule: JobSchedule,
) -> JoinHandle<()>
where
    P: PayoutRepository + 'static,
    J: WorkItemRepository + 'static,
{
    tokio::spawn(run_every(
        "aggregate_payouts",
        schedule.aggregation_interval,
        schedule.aggregation_timeout,
        move || {
            let usecase = Arc::clone(&usecase);
            async move { usecase.execute(Utc::now()).await }
        },
    ))
}

pub fn spawn_processing_job<P, W, G, N>(
    processor: Arc<PayoutProcessor<P, W, G, N>>,
    schedule: JobSchedule,
) -> JoinHandle<()>
where
    P: PayoutRepository + 'static,
    W: WorkerRepository + 'static,
    G: PaymentGateway + 'static,
    N: NotificationPort + 'static,
{
    tokio::spawn(run_every(
        "process_pending_payouts",
        schedule.processing_interval,
        schedule.processing_timeout,
        move || {
            let processor = Arc::clone(&processor);
            async move { processor.process_pending_payouts().await }
        },
    ))
}

async fn run_every<F, Fut, T>(job: &'static str, period: Duration, deadline: Duration, mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EarningsServiceError>>,
    T: Debug,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match tokio::time::timeout(deadline, run()).await {
            Ok(Ok(report)) => debug!(job, ?report, "scheduled job finished"),
            Ok(Err(e)) => error!(job, error = %e, "scheduled job failed"),
            Err(_) => error!(
                job,
                deadline_secs = deadline.as_secs(),
                "scheduled job exceeded its deadline"
            ),
        }
    }
}
