use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 按 slug 的独占锁：主键冲突即表示已有进行中的开通流程
        manager
            .create_table(
                Table::create()
                    .table(ProvisioningLocks::Table)
                    .if_not_exists()
                    .col(string(ProvisioningLocks::Slug).primary_key())
                    .col(uuid(ProvisioningLocks::Holder))
                    .col(timestamp_with_time_zone(ProvisioningLocks::AcquiredAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProvisioningLocks::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ProvisioningLocks {
    Table,
    Slug,
    Holder,
    AcquiredAt,
}
