use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledReminders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledReminders::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledReminders::OrderId).uuid().not_null())
                    .col(
                        ColumnDef::new(ScheduledReminders::RemindAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::CustomerName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::CustomerPhone)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::PickupDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::PickupTime)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ScheduledReminders::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledReminders::SentAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scheduled_reminders_status_remind_at")
                    .table(ScheduledReminders::Table)
                    .col(ScheduledReminders::Status)
                    .col(ScheduledReminders::RemindAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduledReminders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ScheduledReminders {
    Table,
    Id,
    OrderId,
    RemindAt,
    CustomerName,
    CustomerPhone,
    PickupDate,
    PickupTime,
    Status,
    CreatedAt,
    SentAt,
}
