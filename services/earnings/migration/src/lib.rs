pub use sea_orm_migration::prelude::*;

mod m20260901_000001_create_worker_payouts;
mod m20260901_000002_create_outbox_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260901_000001_create_worker_payouts::Migration),
            Box::new(m20260901_000002_create_outbox_events::Migration),
        ]
    }
}
