pub use sea_orm_migration::prelude::*;

mod m20260101_000001_create_tenants;
mod m20260101_000002_create_provisioning_runs;
mod m20260101_000003_create_provisioning_locks;
mod m20260101_000004_create_setup_tokens;

/// 控制面（租户注册表）迁移；租户库自身的表结构由主 crate 的 Schema Migrator 管理
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_tenants::Migration),
            Box::new(m20260101_000002_create_provisioning_runs::Migration),
            Box::new(m20260101_000003_create_provisioning_locks::Migration),
            Box::new(m20260101_000004_create_setup_tokens::Migration),
        ]
    }
}
