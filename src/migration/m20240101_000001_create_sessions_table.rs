use sea_orm_migration::prelude::*;

use crate::config::DEFAULT_TABLE;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Sessions {
    Id,
    UserId,
    IpAddress,
    UserAgent,
    Payload,
    LastActivity,
}

/// Builds the `CREATE TABLE` statement for a Laravel-shaped sessions table named `table`.
///
/// `last_activity` is a `BIGINT` so it decodes into the entity's `i64` on every backend.
pub fn create_table_statement(table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(
            ColumnDef::new(Sessions::Id)
                .string()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Sessions::UserId).big_integer().null())
        .col(ColumnDef::new(Sessions::IpAddress).string_len(45).null())
        .col(ColumnDef::new(Sessions::UserAgent).text().null())
        .col(ColumnDef::new(Sessions::Payload).text().not_null())
        .col(
            ColumnDef::new(Sessions::LastActivity)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

/// Creates the `user_id` and `last_activity` indexes Laravel adds to its sessions table.
pub async fn create_indexes(manager: &SchemaManager<'_>, table: &str) -> Result<(), DbErr> {
    manager
        .create_index(
            Index::create()
                .if_not_exists()
                .name(format!("{table}_user_id_index"))
                .table(Alias::new(table))
                .col(Sessions::UserId)
                .to_owned(),
        )
        .await?;

    manager
        .create_index(
            Index::create()
                .if_not_exists()
                .name(format!("{table}_last_activity_index"))
                .table(Alias::new(table))
                .col(Sessions::LastActivity)
                .to_owned(),
        )
        .await
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(create_table_statement(DEFAULT_TABLE))
            .await?;

        create_indexes(manager, DEFAULT_TABLE).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new(DEFAULT_TABLE)).to_owned())
            .await
    }
}
