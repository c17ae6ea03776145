use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260101_000001_create_tenants::Tenants;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 setup_tokens 表，只保存令牌哈希
        manager
            .create_table(
                Table::create()
                    .table(SetupTokens::Table)
                    .if_not_exists()
                    .col(uuid(SetupTokens::Id).primary_key())
                    .col(string_uniq(SetupTokens::TokenHash))
                    .col(uuid(SetupTokens::TenantId))
                    .col(string(SetupTokens::SubjectIdentity))
                    .col(string(SetupTokens::SubjectEmail))
                    .col(timestamp_with_time_zone(SetupTokens::ExpiresAt))
                    .col(string(SetupTokens::Status).default("pending"))
                    .col(timestamp_with_time_zone(SetupTokens::CreatedAt))
                    .col(timestamp_with_time_zone_null(SetupTokens::UsedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .from(SetupTokens::Table, SetupTokens::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_setup_tokens_subject")
                    .table(SetupTokens::Table)
                    .col(SetupTokens::TenantId)
                    .col(SetupTokens::SubjectIdentity)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_setup_tokens_expires_at")
                    .table(SetupTokens::Table)
                    .col(SetupTokens::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SetupTokens::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum SetupTokens {
    Table,
    Id,
    TokenHash,
    TenantId,
    SubjectIdentity,
    SubjectEmail,
    ExpiresAt,
    Status,
    CreatedAt,
    UsedAt,
}
