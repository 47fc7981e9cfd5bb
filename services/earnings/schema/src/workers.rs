use sea_orm::entity::prelude::*;

/// Read-only view of the worker profile table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub stripe_connect_account_id: Option<String>,
    /// ACTIVE | SUSPENDED | ...
    pub account_status: String,
    /// DONE once onboarding finished.
    pub setup_progress: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
