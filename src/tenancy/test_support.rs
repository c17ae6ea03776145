//! 测试辅助：内存控制面、临时目录中的 SQLite 租户库

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, DbBackend};
use uuid::Uuid;

use super::delivery::ChannelDelivery;
use super::migrator::{MigrationCatalog, apply_pending};
use super::model::{IssuedSetupToken, ProvisionRequest, Tenant, TenantStatus, TenantTemplate};
use super::orchestrator::Orchestrator;
use super::provisioner::{DatabaseProvisioner, SqlProvisioner};
use super::registry::TenantRegistry;
use crate::config::{ProvisioningConfig, SetupTokenConfig, TenantDatabaseConfig, TenantDriver};
use crate::storage::connection::connect_sqlite;
use crate::storage::{SeaOrmBackend, run_migrations};

/// 测试结束时自动删除的临时目录
pub(crate) struct TestDir {
    path: PathBuf,
}

impl TestDir {
    pub(crate) fn new() -> Self {
        let path = std::env::temp_dir().join(format!("tenantctl-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// 已迁移的内存控制面
pub(crate) async fn control_backend() -> Arc<SeaOrmBackend> {
    let db = connect_sqlite("sqlite::memory:", 1)
        .await
        .expect("Failed to create test database");
    run_migrations(&db).await.expect("Failed to run migrations");
    Arc::new(SeaOrmBackend::new(Arc::new(db)))
}

pub(crate) fn sqlite_tenant_config(dir: &TestDir) -> TenantDatabaseConfig {
    TenantDatabaseConfig {
        driver: TenantDriver::Sqlite,
        admin_url: None,
        data_dir: dir.path().join("tenants").display().to_string(),
        max_connections: 2,
    }
}

/// 未落库的租户
pub(crate) fn sample_tenant(slug: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        slug: slug.to_string(),
        display_name: slug.to_string(),
        database_name: super::model::database_name_for(slug),
        template: TenantTemplate::PoliticalParty,
        status: TenantStatus::Pending,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// 写入控制面的租户
pub(crate) async fn seed_tenant(backend: &Arc<SeaOrmBackend>, slug: &str) -> Tenant {
    TenantRegistry::new(backend.clone())
        .create_tenant(slug, slug, TenantTemplate::PoliticalParty)
        .await
        .expect("create tenant")
}

/// 已执行默认迁移的租户库
pub(crate) async fn migrated_tenant_db(dir: &TestDir) -> DatabaseConnection {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("seeded.sqlite").display());
    let db = connect_sqlite(&url, 1).await.expect("open tenant db");
    let set = super::migrator::DefaultCatalog
        .migrations_for(TenantTemplate::PoliticalParty, DbBackend::Sqlite)
        .expect("catalog");
    apply_pending(&db, &set).await.expect("migrate tenant db");
    db
}

/// 重试快速、不等待的开通配置
pub(crate) fn fast_provisioning_config() -> ProvisioningConfig {
    ProvisioningConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        stage_timeout_secs: 10,
        lock_ttl_secs: 1800,
        migrate_on_startup: false,
    }
}

pub(crate) fn request(slug: &str) -> ProvisionRequest {
    ProvisionRequest {
        slug: slug.to_string(),
        display_name: format!("Tenant {}", slug),
        admin_email: format!("admin@{}.org", slug),
        template: None,
    }
}

/// 已完成开通的租户
pub(crate) struct ProvisionedTenant {
    pub backend: Arc<SeaOrmBackend>,
    pub provisioner: Arc<dyn DatabaseProvisioner>,
    pub orchestrator: Orchestrator,
    pub tenant: Tenant,
    pub token: IssuedSetupToken,
    pub token_config: SetupTokenConfig,
    pub dir: TestDir,
}

pub(crate) async fn provisioned_tenant(slug: &str, token_config: SetupTokenConfig) -> ProvisionedTenant {
    let dir = TestDir::new();
    let backend = control_backend().await;
    let provisioner: Arc<dyn DatabaseProvisioner> =
        Arc::new(SqlProvisioner::new(sqlite_tenant_config(&dir)));
    let (delivery, mut rx) = ChannelDelivery::channel();
    let orchestrator = Orchestrator::new(
        backend.clone(),
        provisioner.clone(),
        Arc::new(delivery),
        fast_provisioning_config(),
        token_config.clone(),
    );

    let job = orchestrator.begin(request(slug)).await.expect("begin");
    let tenant = job.run().await.expect("provision");
    let token = rx.recv().await.expect("token delivered");

    ProvisionedTenant {
        backend,
        provisioner,
        orchestrator,
        tenant,
        token,
        token_config,
        dir,
    }
}
