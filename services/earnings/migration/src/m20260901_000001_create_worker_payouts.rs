use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkerPayouts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkerPayouts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkerPayouts::WorkerId).uuid().not_null())
                    .col(ColumnDef::new(WorkerPayouts::WeekStartDate).date().not_null())
                    .col(ColumnDef::new(WorkerPayouts::WeekEndDate).date().not_null())
                    .col(
                        ColumnDef::new(WorkerPayouts::AmountCents)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkerPayouts::Status)
                            .string()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(ColumnDef::new(WorkerPayouts::StripeTransferId).string())
                    .col(ColumnDef::new(WorkerPayouts::StripePayoutId).string())
                    .col(
                        ColumnDef::new(WorkerPayouts::JobInstanceIds)
                            .array(ColumnType::Uuid)
                            .not_null()
                            .default(Expr::cust("'{}'::uuid[]")),
                    )
                    .col(ColumnDef::new(WorkerPayouts::LastFailureReason).string())
                    .col(
                        ColumnDef::new(WorkerPayouts::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkerPayouts::LastAttemptAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(WorkerPayouts::NextAttemptAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(WorkerPayouts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkerPayouts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkerPayouts::RowVersion)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .to_owned(),
            )
            .await?;

        // One payout per worker per period; concurrent aggregators rely on it.
        manager
            .create_index(
                Index::create()
                    .table(WorkerPayouts::Table)
                    .col(WorkerPayouts::WorkerId)
                    .col(WorkerPayouts::WeekStartDate)
                    .name("uq_worker_payouts_worker_id_week_start_date")
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Ready-for-payout poll: status + elapsed next_attempt_at.
        manager
            .create_index(
                Index::create()
                    .table(WorkerPayouts::Table)
                    .col(WorkerPayouts::Status)
                    .col(WorkerPayouts::NextAttemptAt)
                    .name("idx_worker_payouts_status_next_attempt_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkerPayouts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum WorkerPayouts {
    Table,
    Id,
    WorkerId,
    WeekStartDate,
    WeekEndDate,
    AmountCents,
    Status,
    StripeTransferId,
    StripePayoutId,
    JobInstanceIds,
    LastFailureReason,
    RetryCount,
    LastAttemptAt,
    NextAttemptAt,
    CreatedAt,
    UpdatedAt,
    RowVersion,
}
