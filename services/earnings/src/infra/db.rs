use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use payday_earnings_schema::{job_instances, worker_payouts, workers};

use crate::domain::failure::USER_ACTIONABLE_REASONS;
use crate::domain::repository::{PayoutRepository, WorkItemRepository, WorkerRepository};
use crate::domain::types::{CompletedWorkItem, PayoutStatus, Worker, WorkerPayout};
use crate::error::EarningsServiceError;

// ── Payout repository ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbPayoutRepository {
    pub db: DatabaseConnection,
}

impl PayoutRepository for DbPayoutRepository {
    async fn create(&self, payout: &WorkerPayout) -> Result<bool, EarningsServiceError> {
        let model = worker_payouts::ActiveModel {
            id: Set(payout.id),
            worker_id: Set(payout.worker_id),
            week_start_date: Set(payout.week_start_date),
            week_end_date: Set(payout.week_end_date),
            amount_cents: Set(payout.amount_cents),
            status: Set(payout.status.as_str().to_owned()),
            stripe_transfer_id: Set(payout.stripe_transfer_id.clone()),
            stripe_payout_id: Set(payout.stripe_payout_id.clone()),
            job_instance_ids: Set(payout.job_instance_ids.clone()),
            last_failure_reason: Set(payout.last_failure_reason.clone()),
            retry_count: Set(payout.retry_count),
            last_attempt_at: Set(payout.last_attempt_at),
            next_attempt_at: Set(payout.next_attempt_at),
            created_at: Set(payout.created_at),
            updated_at: Set(payout.updated_at),
            row_version: Set(payout.row_version),
        };
        let result = worker_payouts::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    worker_payouts::Column::WorkerId,
                    worker_payouts::Column::WeekStartDate,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("insert worker payout")?;
        Ok(result > 0)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<WorkerPayout>, EarningsServiceError> {
        let model = worker_payouts::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("get worker payout")?;
        model.map(payout_from_model).transpose()
    }

    async fn get_by_worker_and_period(
        &self,
        worker_id: Uuid,
        week_start_date: NaiveDate,
    ) -> Result<Option<WorkerPayout>, EarningsServiceError> {
        let model = worker_payouts::Entity::find()
            .filter(worker_payouts::Column::WorkerId.eq(worker_id))
            .filter(worker_payouts::Column::WeekStartDate.eq(week_start_date))
            .one(&self.db)
            .await
            .context("get worker payout by period")?;
        model.map(payout_from_model).transpose()
    }

    async fn update_if_version(
        &self,
        payout: &WorkerPayout,
        expected_version: i64,
    ) -> Result<u64, EarningsServiceError> {
        use worker_payouts::Column;
        let result = worker_payouts::Entity::update_many()
            .col_expr(Column::Status, Expr::value(payout.status.as_str()))
            .col_expr(
                Column::StripeTransferId,
                Expr::value(payout.stripe_transfer_id.clone()),
            )
            .col_expr(
                Column::StripePayoutId,
                Expr::value(payout.stripe_payout_id.clone()),
            )
            .col_expr(
                Column::LastFailureReason,
                Expr::value(payout.last_failure_reason.clone()),
            )
            .col_expr(Column::RetryCount, Expr::value(payout.retry_count))
            .col_expr(Column::LastAttemptAt, Expr::value(payout.last_attempt_at))
            .col_expr(Column::NextAttemptAt, Expr::value(payout.next_attempt_at))
            .col_expr(Column::UpdatedAt, Expr::value(payout.updated_at))
            .col_expr(Column::RowVersion, Expr::col(Column::RowVersion).add(1))
            .filter(Column::Id.eq(payout.id))
            .filter(Column::RowVersion.eq(expected_version))
            .exec(&self.db)
            .await
            .context("update worker payout if version")?;
        Ok(result.rows_affected)
    }

    async fn find_ready_for_payout(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkerPayout>, EarningsServiceError> {
        use worker_payouts::Column;
        let models = worker_payouts::Entity::find()
            .filter(
                Condition::any()
                    .add(Column::Status.eq(PayoutStatus::Pending.as_str()))
                    .add(
                        Condition::all()
                            .add(Column::Status.eq(PayoutStatus::Failed.as_str()))
                            .add(Column::NextAttemptAt.is_not_null())
                            .add(Column::NextAttemptAt.lte(now)),
                    ),
            )
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .context("find payouts ready for payout")?;
        models.into_iter().map(payout_from_model).collect()
    }

    async fn find_failed_by_reason(
        &self,
        reason: &str,
    ) -> Result<Vec<WorkerPayout>, EarningsServiceError> {
        use worker_payouts::Column;
        let models = worker_payouts::Entity::find()
            .filter(Column::Status.eq(PayoutStatus::Failed.as_str()))
            .filter(Column::LastFailureReason.eq(reason))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .context("find failed payouts by reason")?;
        models.into_iter().map(payout_from_model).collect()
    }

    async fn find_actionable_failures_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<Vec<WorkerPayout>, EarningsServiceError> {
        use worker_payouts::Column;
        let models = worker_payouts::Entity::find()
            .filter(Column::WorkerId.eq(worker_id))
            .filter(Column::Status.eq(PayoutStatus::Failed.as_str()))
            .filter(Column::NextAttemptAt.is_null())
            .filter(Column::LastFailureReason.is_in(USER_ACTIONABLE_REASONS.iter().copied()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .context("find actionable payout failures")?;
        models.into_iter().map(payout_from_model).collect()
    }
}

fn payout_from_model(model: worker_payouts::Model) -> Result<WorkerPayout, EarningsServiceError> {
    let status = PayoutStatus::parse(&model.status)
        .with_context(|| format!("unknown payout status {:?} on {}", model.status, model.id))?;
    Ok(WorkerPayout {
        id: model.id,
        worker_id: model.worker_id,
        week_start_date: model.week_start_date,
        week_end_date: model.week_end_date,
        amount_cents: model.amount_cents,
        status,
        stripe_transfer_id: model.stripe_transfer_id,
        stripe_payout_id: model.stripe_payout_id,
        job_instance_ids: model.job_instance_ids,
        last_failure_reason: model.last_failure_reason,
        retry_count: model.retry_count,
        last_attempt_at: model.last_attempt_at,
        next_attempt_at: model.next_attempt_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
        row_version: model.row_version,
    })
}

// ── Worker repository ─────────────────────────────────────────────────────────

const WORKER_ACCOUNT_ACTIVE: &str = "ACTIVE";
const WORKER_SETUP_DONE: &str = "DONE";

#[derive(Clone)]
pub struct DbWorkerRepository {
    pub db: DatabaseConnection,
}

impl WorkerRepository for DbWorkerRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Worker>, EarningsServiceError> {
        let model = workers::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("get worker")?;
        Ok(model.map(worker_from_model))
    }

    async fn find_by_connect_account_id(
        &self,
        account_id: &str,
    ) -> Result<Option<Worker>, EarningsServiceError> {
        let model = workers::Entity::find()
            .filter(workers::Column::StripeConnectAccountId.eq(account_id))
            .one(&self.db)
            .await
            .context("get worker by connected account")?;
        Ok(model.map(worker_from_model))
    }
}

fn worker_from_model(model: workers::Model) -> Worker {
    Worker {
        id: model.id,
        first_name: model.first_name,
        last_name: model.last_name,
        email: model.email,
        stripe_connect_account_id: model.stripe_connect_account_id,
        is_active: model.account_status == WORKER_ACCOUNT_ACTIVE,
        onboarding_complete: model.setup_progress == WORKER_SETUP_DONE,
    }
}

// ── Work item repository ──────────────────────────────────────────────────────

const JOB_COMPLETED: &str = "COMPLETED";

#[derive(Clone)]
pub struct DbWorkItemRepository {
    pub db: DatabaseConnection,
}

impl WorkItemRepository for DbWorkItemRepository {
    async fn list_completed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CompletedWorkItem>, EarningsServiceError> {
        use job_instances::Column;
        let models = job_instances::Entity::find()
            .filter(Column::Status.eq(JOB_COMPLETED))
            .filter(Column::AssignedWorkerId.is_not_null())
            .filter(Column::CompletedAt.gte(start))
            .filter(Column::CompletedAt.lt(end))
            .order_by_asc(Column::CompletedAt)
            .all(&self.db)
            .await
            .context("list completed job instances")?;
        Ok(models
            .into_iter()
            .filter_map(|model| {
                Some(CompletedWorkItem {
                    id: model.id,
                    worker_id: model.assigned_worker_id?,
                    pay_cents: model.effective_pay_cents,
                    completed_at: model.completed_at?,
                })
            })
            .collect())
    }
}
