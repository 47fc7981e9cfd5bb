use sea_orm::entity::prelude::*;

/// One worker's disbursement for one pay period.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "worker_payouts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub worker_id: Uuid,
    pub week_start_date: Date,
    pub week_end_date: Date,
    pub amount_cents: i64,
    /// PENDING | PROCESSING | PAID | FAILED
    pub status: String,
    pub stripe_transfer_id: Option<String>,
    pub stripe_payout_id: Option<String>,
    pub job_instance_ids: Vec<Uuid>,
    pub last_failure_reason: Option<String>,
    pub retry_count: i32,
    pub last_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub row_version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
