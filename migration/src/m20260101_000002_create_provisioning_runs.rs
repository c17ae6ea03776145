use sea_orm_migration::{prelude::*, schema::*};

use crate::m20260101_000001_create_tenants::Tenants;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 每个租户一行：记录编排器当前状态与最后完成的阶段
        manager
            .create_table(
                Table::create()
                    .table(ProvisioningRuns::Table)
                    .if_not_exists()
                    .col(uuid(ProvisioningRuns::TenantId).primary_key())
                    .col(string(ProvisioningRuns::State))
                    .col(string_null(ProvisioningRuns::LastCompletedStage))
                    .col(string_null(ProvisioningRuns::FailedStage))
                    .col(text_null(ProvisioningRuns::LastError))
                    .col(integer(ProvisioningRuns::Attempts).default(0))
                    .col(string(ProvisioningRuns::AdminEmail))
                    .col(text_null(ProvisioningRuns::ConnectionConfig)) // JSON
                    .col(timestamp_with_time_zone(ProvisioningRuns::StartedAt))
                    .col(timestamp_with_time_zone(ProvisioningRuns::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .from(ProvisioningRuns::Table, ProvisioningRuns::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProvisioningRuns::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ProvisioningRuns {
    Table,
    TenantId,
    State,
    LastCompletedStage,
    FailedStage,
    LastError,
    Attempts,
    AdminEmail,
    ConnectionConfig,
    StartedAt,
    UpdatedAt,
}
