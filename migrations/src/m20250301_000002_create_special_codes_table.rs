use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SpecialCodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SpecialCodes::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpecialCodes::Code)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(SpecialCodes::ExpiresAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SpecialCodes::Used)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(SpecialCodes::UsedAt).timestamp().null())
                    .col(ColumnDef::new(SpecialCodes::UsedByOrder).uuid().null())
                    .col(
                        ColumnDef::new(SpecialCodes::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SpecialCodes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum SpecialCodes {
    Table,
    Id,
    Code,
    ExpiresAt,
    Used,
    UsedAt,
    UsedByOrder,
    CreatedAt,
}
