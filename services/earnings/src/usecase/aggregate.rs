use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::domain::period::PayPeriod;
use crate::domain::repository::{PayoutRepository, WorkItemRepository};
use crate::domain::types::{MINIMUM_PAYOUT_AMOUNT_CENTS, WorkerPayout};
use crate::error::EarningsServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationReport {
    pub period: PayPeriod,
    pub created: usize,
    /// A payout for the worker and period already existed.
    pub existing: usize,
    pub below_minimum: usize,
    /// Workers skipped because the store failed; picked up on the next run.
    pub failed: usize,
}

/// Creates PENDING payouts for the most recently closed pay period.
pub struct AggregatePayoutsUseCase<P: PayoutRepository, J: WorkItemRepository> {
    pub payouts: P,
    pub work_items: J,
    pub use_short_pay_period: bool,
}

impl<P: PayoutRepository, J: WorkItemRepository> AggregatePayoutsUseCase<P, J> {
    pub async fn execute(
        &self,
        now: DateTime<Utc>,
    ) -> Result<AggregationReport, EarningsServiceError> {
        let period = PayPeriod::last_closed(now, self.use_short_pay_period);
        let items = self
            .work_items
            .list_completed_between(period.starts_at, period.ends_at)
            .await?;

        let mut per_worker: BTreeMap<Uuid, (i64, Vec<Uuid>)> = BTreeMap::new();
        for item in items {
            let entry = per_worker.entry(item.worker_id).or_default();
            entry.0 += item.pay_cents;
            entry.1.push(item.id);
        }

        let mut report = AggregationReport {
            period,
            created: 0,
            existing: 0,
            below_minimum: 0,
            failed: 0,
        };
        for (worker_id, (amount_cents, job_instance_ids)) in per_worker {
            if amount_cents <= MINIMUM_PAYOUT_AMOUNT_CENTS {
                debug!(%worker_id, amount_cents, "earnings below payout minimum");
                report.below_minimum += 1;
                continue;
            }
            match self
                .create_for_worker(worker_id, &period, amount_cents, job_instance_ids, now)
                .await
            {
                Ok(true) => report.created += 1,
                Ok(false) => report.existing += 1,
                Err(e) => {
                    error!(%worker_id, amount_cents, error = %e, "failed to create payout");
                    report.failed += 1;
                }
            }
        }

        info!(
            week_start_date = %period.start_date,
            created = report.created,
            existing = report.existing,
            below_minimum = report.below_minimum,
            failed = report.failed,
            "aggregated payouts"
        );
        Ok(report)
    }

    /// `false` when a payout for the worker and period already exists.
    async fn create_for_worker(
        &self,
        worker_id: Uuid,
        period: &PayPeriod,
        amount_cents: i64,
        job_instance_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool, EarningsServiceError> {
        if self
            .payouts
            .get_by_worker_and_period(worker_id, period.start_date)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        let payout = WorkerPayout::new(worker_id, period, amount_cents, job_instance_ids, now);
        // A concurrent aggregator may win the insert; that is not an error.
        self.payouts.create(&payout).await
    }
}
