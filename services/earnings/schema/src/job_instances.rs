use sea_orm::entity::prelude::*;

/// Read-only view of scheduled work items.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub assigned_worker_id: Option<Uuid>,
    /// COMPLETED once the worker finished and the item is payable.
    pub status: String,
    pub effective_pay_cents: i64,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
