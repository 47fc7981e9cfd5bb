use sea_orm_migration::prelude::*;

use payday_earnings_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
