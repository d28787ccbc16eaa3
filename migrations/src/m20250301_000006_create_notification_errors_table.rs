use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationErrors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationErrors::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationErrors::Channel)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationErrors::Severity)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(NotificationErrors::Message)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(NotificationErrors::OrderId).uuid().null())
                    .col(
                        ColumnDef::new(NotificationErrors::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_errors_created_at")
                    .table(NotificationErrors::Table)
                    .col(NotificationErrors::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(NotificationErrors::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum NotificationErrors {
    Table,
    Id,
    Channel,
    Severity,
    Message,
    OrderId,
    CreatedAt,
}
