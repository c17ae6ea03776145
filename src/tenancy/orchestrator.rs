//! 开通编排器
//!
//! 状态机：PENDING -> PROVISIONING_DB -> MIGRATING -> SEEDING -> ACTIVE，
//! 任一未完成阶段都可能进入 FAILED。每个阶段的开始与完成都会先落库，
//! 失败后从 `last_completed_stage` 之后继续。同一 slug 同时只有一个 worker。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::delivery::TokenDelivery;
use super::migrator::{self, DefaultCatalog, MigrationCatalog, MigrationReport};
use super::model::{
    AdminIdentityInfo, ConnectionConfig, ProvisionRequest, ProvisionTicket, ProvisioningStage,
    ProvisioningStatus, Tenant, TenantStatus, validate_display_name, validate_slug,
};
use super::provisioner::{DatabaseProvisioner, open_tenant_database};
use super::registry::TenantRegistry;
use super::seeder::BootstrapSeeder;
use crate::config::{ProvisioningConfig, SetupTokenConfig};
use crate::errors::AppError;
use crate::storage::connection::connect_tenant;
use crate::storage::{
    ProvisioningLockRepository, ProvisioningRunRepository, RunUpdate, SeaOrmBackend,
    SetupTokenRepository,
};

struct Inner {
    backend: Arc<SeaOrmBackend>,
    registry: TenantRegistry,
    provisioner: Arc<dyn DatabaseProvisioner>,
    catalog: Arc<dyn MigrationCatalog>,
    seeder: BootstrapSeeder,
    delivery: Arc<dyn TokenDelivery>,
    config: ProvisioningConfig,
}

/// 编排器，克隆开销很小，可在 handler 和后台任务间共享
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// 对单个 active 租户补跑迁移的结果
#[derive(Debug, Clone, Serialize)]
pub struct TenantMigrationOutcome {
    pub slug: String,
    pub applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<SeaOrmBackend>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        delivery: Arc<dyn TokenDelivery>,
        config: ProvisioningConfig,
        token_config: SetupTokenConfig,
    ) -> Self {
        Self::with_catalog(
            backend,
            provisioner,
            Arc::new(DefaultCatalog),
            delivery,
            config,
            token_config,
        )
    }

    pub fn with_catalog(
        backend: Arc<SeaOrmBackend>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        catalog: Arc<dyn MigrationCatalog>,
        delivery: Arc<dyn TokenDelivery>,
        config: ProvisioningConfig,
        token_config: SetupTokenConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: TenantRegistry::new(backend.clone()),
                seeder: BootstrapSeeder::new(backend.clone(), token_config),
                backend,
                provisioner,
                catalog,
                delivery,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.inner.registry
    }

    async fn acquire_lock(&self, slug: &str) -> Result<Uuid, AppError> {
        let holder = Uuid::new_v4();
        let stale_before = Utc::now() - chrono::Duration::seconds(self.inner.config.lock_ttl_secs);
        if self
            .inner
            .backend
            .try_acquire_lock(slug, holder, stale_before)
            .await?
        {
            Ok(holder)
        } else {
            Err(AppError::AlreadyProvisioning(slug.to_string()))
        }
    }

    async fn release_lock(&self, slug: &str, holder: Uuid) {
        if let Err(e) = self.inner.backend.release_lock(slug, holder).await {
            tracing::error!(slug = %slug, error = %e, "Failed to release provisioning lock");
        }
    }

    /// 获取锁并创建或恢复租户；返回的 job 持有锁，`run` 结束时释放
    pub async fn begin(&self, request: ProvisionRequest) -> Result<ProvisioningJob, AppError> {
        validate_slug(&request.slug)?;
        validate_display_name(&request.display_name)?;
        let admin = AdminIdentityInfo::new(&request.admin_email)?;

        let holder = self.acquire_lock(&request.slug).await?;
        let prepared: Result<ProvisioningJob, AppError> = async {
            let tenant = match self.inner.registry.find_by_slug(&request.slug).await? {
                Some(existing)
                    if matches!(existing.status, TenantStatus::Active | TenantStatus::Archived) =>
                {
                    return Err(AppError::DuplicateSlug(request.slug.clone()));
                }
                Some(existing) => {
                    tracing::info!(tenant_id = %existing.id, slug = %existing.slug, status = %existing.status, "Resuming existing tenant");
                    existing
                }
                None => {
                    self.inner
                        .registry
                        .create_tenant(
                            &request.slug,
                            &request.display_name,
                            request.template.unwrap_or_default(),
                        )
                        .await?
                }
            };
            self.prepare_job(tenant, Some(admin), holder).await
        }
        .await;

        if prepared.is_err() {
            self.release_lock(&request.slug, holder).await;
        }
        prepared
    }

    /// 对失败（或中断）的租户重新开通，从上次完成的阶段之后继续
    pub async fn begin_retry(&self, slug: &str) -> Result<ProvisioningJob, AppError> {
        let holder = self.acquire_lock(slug).await?;
        let prepared: Result<ProvisioningJob, AppError> = async {
            let tenant = self.inner.registry.require_by_slug(slug).await?;
            if matches!(tenant.status, TenantStatus::Active | TenantStatus::Archived) {
                return Err(AppError::InvalidStateTransition {
                    from: tenant.status.to_string(),
                    to: TenantStatus::Provisioning.to_string(),
                });
            }
            self.prepare_job(tenant, None, holder).await
        }
        .await;

        if prepared.is_err() {
            self.release_lock(slug, holder).await;
        }
        prepared
    }

    async fn prepare_job(
        &self,
        tenant: Tenant,
        admin: Option<AdminIdentityInfo>,
        holder: Uuid,
    ) -> Result<ProvisioningJob, AppError> {
        let backend = &self.inner.backend;
        let existing = backend.find_run(tenant.id).await?;
        let admin = match (admin, existing.as_ref()) {
            (Some(admin), _) => admin,
            (None, Some(run)) => AdminIdentityInfo::new(&run.admin_email)?,
            (None, None) => {
                return Err(AppError::Internal(format!(
                    "tenant {} has no provisioning record to resume",
                    tenant.slug
                )));
            }
        };

        let run = backend.ensure_run(tenant.id, &admin.email).await?;
        let last_completed = run
            .last_completed_stage
            .as_deref()
            .map(str::parse::<ProvisioningStage>)
            .transpose()?;
        let connection = run
            .connection_config
            .as_deref()
            .map(ConnectionConfig::from_json)
            .transpose()?;

        let tenant = self
            .inner
            .registry
            .mark_status(tenant.id, TenantStatus::Provisioning)
            .await?;

        let next = ProvisioningStage::resume_after(last_completed);
        backend
            .update_run(
                tenant.id,
                RunUpdate {
                    state: next.map(|stage| stage.as_str().to_string()),
                    failed_stage: Some(None),
                    admin_email: Some(admin.email.clone()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            next_stage = next.map(|s| s.as_str()).unwrap_or("-"),
            "Provisioning job prepared"
        );

        Ok(ProvisioningJob {
            orchestrator: self.clone(),
            tenant,
            admin,
            holder,
            last_completed,
            connection,
        })
    }

    /// begin + 后台执行，立即返回
    pub async fn submit(&self, request: ProvisionRequest) -> Result<ProvisionTicket, AppError> {
        let job = self.begin(request).await?;
        Ok(job.spawn())
    }

    /// begin_retry + 后台执行
    pub async fn retry(&self, slug: &str) -> Result<ProvisionTicket, AppError> {
        let job = self.begin_retry(slug).await?;
        Ok(job.spawn())
    }

    pub async fn status(&self, slug: &str) -> Result<ProvisioningStatus, AppError> {
        let tenant = self.inner.registry.require_by_slug(slug).await?;
        self.status_of(&tenant).await
    }

    pub async fn status_by_id(&self, tenant_id: Uuid) -> Result<ProvisioningStatus, AppError> {
        let tenant = self.inner.registry.require(tenant_id).await?;
        self.status_of(&tenant).await
    }

    async fn status_of(&self, tenant: &Tenant) -> Result<ProvisioningStatus, AppError> {
        let run = self.inner.backend.find_run(tenant.id).await?;
        ProvisioningStatus::from_parts(tenant, run.as_ref())
    }

    /// 归档租户并作废其所有未使用的令牌
    pub async fn archive(&self, slug: &str) -> Result<Tenant, AppError> {
        let tenant = self.inner.registry.require_by_slug(slug).await?;
        let holder = self.acquire_lock(slug).await?;

        let archived: Result<Tenant, AppError> = async {
            let archived = self
                .inner
                .registry
                .mark_status(tenant.id, TenantStatus::Archived)
                .await?;
            let revoked = self
                .inner
                .backend
                .revoke_pending_tokens(tenant.id, None)
                .await?;
            tracing::info!(tenant_id = %tenant.id, slug = %slug, revoked, "Tenant archived");
            Ok(archived)
        }
        .await;

        self.release_lock(slug, holder).await;
        archived
    }

    /// 租户库迁移状态（只读）
    pub async fn migration_report(&self, slug: &str) -> Result<MigrationReport, AppError> {
        let tenant = self.inner.registry.require_by_slug(slug).await?;
        let db = open_tenant_database(&self.inner.backend, &self.inner.provisioner, &tenant).await?;
        let set = self
            .inner
            .catalog
            .migrations_for(tenant.template, db.get_database_backend())?;
        let report = migrator::status(&db, &set).await;
        let _ = db.close().await;
        report
    }

    /// 对所有 active 租户补跑迁移；单个租户失败不影响其它租户
    pub async fn migrate_active_tenants(&self) -> Result<Vec<TenantMigrationOutcome>, AppError> {
        let tenants = self.inner.registry.list(Some(TenantStatus::Active)).await?;
        let mut outcomes = Vec::with_capacity(tenants.len());

        for tenant in tenants {
            let outcome = match self.migrate_tenant(&tenant).await {
                Ok(applied) => {
                    if !applied.is_empty() {
                        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, count = applied.len(), "Tenant schema upgraded");
                    }
                    TenantMigrationOutcome {
                        slug: tenant.slug,
                        applied,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!(tenant_id = %tenant.id, slug = %tenant.slug, error = %e, "Tenant migration failed");
                    TenantMigrationOutcome {
                        slug: tenant.slug,
                        applied: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn migrate_tenant(&self, tenant: &Tenant) -> Result<Vec<String>, AppError> {
        let holder = self.acquire_lock(&tenant.slug).await?;
        let result: Result<Vec<String>, AppError> = async {
            let db =
                open_tenant_database(&self.inner.backend, &self.inner.provisioner, tenant).await?;
            let set = self
                .inner
                .catalog
                .migrations_for(tenant.template, db.get_database_backend())?;
            let applied = migrator::apply_pending(&db, &set).await;
            let _ = db.close().await;
            applied
        }
        .await;
        self.release_lock(&tenant.slug, holder).await;
        result
    }
}

/// 一次开通执行；持有 slug 锁
pub struct ProvisioningJob {
    orchestrator: Orchestrator,
    tenant: Tenant,
    admin: AdminIdentityInfo,
    holder: Uuid,
    last_completed: Option<ProvisioningStage>,
    connection: Option<ConnectionConfig>,
}

impl ProvisioningJob {
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn ticket(&self) -> ProvisionTicket {
        ProvisionTicket {
            tenant_id: self.tenant.id,
            slug: self.tenant.slug.clone(),
            status: self.tenant.status,
            stage: ProvisioningStage::resume_after(self.last_completed)
                .unwrap_or(ProvisioningStage::Active),
        }
    }

    /// 在后台任务中执行
    pub fn spawn(self) -> ProvisionTicket {
        let ticket = self.ticket();
        tokio::spawn(async move {
            // 失败已记录在 provisioning_runs 中
            let _ = self.run().await;
        });
        ticket
    }

    /// 依次执行剩余阶段；无论成功与否都会释放锁
    pub async fn run(mut self) -> Result<Tenant, AppError> {
        let outcome = match self.run_stages().await {
            Ok(tenant) => Ok(tenant),
            Err((stage, error)) => {
                self.record_failure(stage, &error).await;
                Err(error)
            }
        };

        self.orchestrator
            .release_lock(&self.tenant.slug, self.holder)
            .await;
        outcome
    }

    async fn persist(&self, update: RunUpdate) -> Result<(), AppError> {
        self.orchestrator
            .inner
            .backend
            .update_run(self.tenant.id, update)
            .await
            .map(|_| ())
    }

    async fn run_stages(&mut self) -> Result<Tenant, (ProvisioningStage, AppError)> {
        let mut next = ProvisioningStage::resume_after(self.last_completed);

        while let Some(stage) = next {
            self.persist(RunUpdate {
                state: Some(stage.as_str().to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| (stage, e))?;

            tracing::info!(tenant_id = %self.tenant.id, slug = %self.tenant.slug, stage = %stage, "Stage started");
            let started = Instant::now();

            self.execute_with_retry(stage).await.map_err(|e| (stage, e))?;

            let mut update = RunUpdate {
                last_completed_stage: Some(Some(stage.as_str().to_string())),
                ..Default::default()
            };
            if stage == ProvisioningStage::ProvisioningDb
                && let Some(connection) = &self.connection
            {
                let encoded = connection.to_json().map_err(|e| (stage, e))?;
                update.connection_config = Some(Some(encoded));
            }
            self.persist(update).await.map_err(|e| (stage, e))?;

            tracing::info!(
                tenant_id = %self.tenant.id,
                slug = %self.tenant.slug,
                stage = %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
            self.last_completed = Some(stage);
            next = ProvisioningStage::resume_after(Some(stage));
        }

        let finishing = ProvisioningStage::Seeding;
        let tenant = self
            .orchestrator
            .inner
            .registry
            .mark_status(self.tenant.id, TenantStatus::Active)
            .await
            .map_err(|e| (finishing, e))?;
        self.persist(RunUpdate {
            state: Some(ProvisioningStage::Active.as_str().to_string()),
            failed_stage: Some(None),
            last_error: Some(None),
            ..Default::default()
        })
        .await
        .map_err(|e| (finishing, e))?;

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Tenant is active");
        self.tenant = tenant.clone();
        Ok(tenant)
    }

    /// 带超时与指数退避的阶段执行
    async fn execute_with_retry(&mut self, stage: ProvisioningStage) -> Result<(), AppError> {
        let inner = self.orchestrator.inner.clone();
        let config = &inner.config;
        let timeout = Duration::from_secs(config.stage_timeout_secs);
        let max_backoff = Duration::from_millis(config.max_backoff_ms);
        let mut backoff = Duration::from_millis(config.initial_backoff_ms);
        let mut attempt = 1u32;

        loop {
            self.persist(RunUpdate {
                bump_attempts: true,
                ..Default::default()
            })
            .await?;

            let result = match tokio::time::timeout(timeout, self.execute_stage(stage)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::StageTimeout {
                    stage: stage.to_string(),
                    seconds: config.stage_timeout_secs,
                }),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                    tracing::warn!(
                        tenant_id = %self.tenant.id,
                        slug = %self.tenant.slug,
                        stage = %stage,
                        attempt,
                        max_attempts = config.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Stage failed, retrying"
                    );
                    self.persist(RunUpdate {
                        last_error: Some(Some(error_chain(&e))),
                        ..Default::default()
                    })
                    .await?;

                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn connection(&self) -> Result<ConnectionConfig, AppError> {
        match &self.connection {
            Some(connection) => Ok(connection.clone()),
            None => self
                .orchestrator
                .inner
                .provisioner
                .connection_config(&self.tenant),
        }
    }

    async fn execute_stage(&mut self, stage: ProvisioningStage) -> Result<(), AppError> {
        let inner = self.orchestrator.inner.clone();

        match stage {
            ProvisioningStage::ProvisioningDb => {
                let connection = inner.provisioner.provision_database(&self.tenant).await?;
                self.connection = Some(connection);
            }
            ProvisioningStage::Migrating => {
                let db = connect_tenant(&self.connection()?).await?;
                let set = inner
                    .catalog
                    .migrations_for(self.tenant.template, db.get_database_backend())?;
                let applied = migrator::apply_pending(&db, &set).await;
                let _ = db.close().await;
                let applied = applied?;
                tracing::info!(
                    tenant_id = %self.tenant.id,
                    applied = applied.len(),
                    total = set.len(),
                    "Tenant schema migrated"
                );
            }
            ProvisioningStage::Seeding => {
                let db = connect_tenant(&self.connection()?).await?;
                let issued = inner.seeder.seed_admin(&db, self.tenant.id, &self.admin).await;
                let _ = db.close().await;
                let issued = issued?;
                inner.delivery.deliver(&self.tenant, &issued).await?;
            }
            ProvisioningStage::Pending | ProvisioningStage::Active | ProvisioningStage::Failed => {}
        }
        Ok(())
    }

    async fn record_failure(&self, stage: ProvisioningStage, error: &AppError) {
        let chain = error_chain(error);
        tracing::error!(
            tenant_id = %self.tenant.id,
            slug = %self.tenant.slug,
            stage = %stage,
            error = %chain,
            "Provisioning failed"
        );

        let update = RunUpdate {
            state: Some(ProvisioningStage::Failed.as_str().to_string()),
            failed_stage: Some(Some(stage.as_str().to_string())),
            last_error: Some(Some(chain)),
            ..Default::default()
        };
        if let Err(e) = self.persist(update).await {
            tracing::error!(tenant_id = %self.tenant.id, error = %e, "Failed to record provisioning failure");
        }
        if let Err(e) = self
            .orchestrator
            .inner
            .registry
            .mark_status(self.tenant.id, TenantStatus::Failed)
            .await
        {
            tracing::error!(tenant_id = %self.tenant.id, error = %e, "Failed to mark tenant failed");
        }
    }
}

/// 拼接错误链，跳过已包含在上层消息里的部分
fn error_chain(error: &AppError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::connect_tenant;
    use crate::storage::entities::{admin_identities, prelude::*, schema_migrations};
    use crate::tenancy::delivery::ChannelDelivery;
    use crate::tenancy::migrator::{Migration, MigrationSet};
    use crate::tenancy::model::TenantTemplate;
    use crate::tenancy::provisioner::SqlProvisioner;
    use crate::tenancy::test_support::*;
    use async_trait::async_trait;
    use sea_orm::{ColumnTrait, DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 `fail_first` 次调用返回指定错误，之后委托给真实实现
    struct ScriptedProvisioner {
        real: SqlProvisioner,
        calls: AtomicUsize,
        fail_first: usize,
        error: fn() -> AppError,
        delay: Option<Duration>,
    }

    impl ScriptedProvisioner {
        fn new(dir: &TestDir) -> Self {
            Self {
                real: SqlProvisioner::new(sqlite_tenant_config(dir)),
                calls: AtomicUsize::new(0),
                fail_first: 0,
                error: || AppError::ProvisionFailure("connection refused".into()),
                delay: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DatabaseProvisioner for ScriptedProvisioner {
        async fn provision_database(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call < self.fail_first {
                return Err((self.error)());
            }
            self.real.provision_database(tenant).await
        }

        fn connection_config(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError> {
            self.real.connection_config(tenant)
        }
    }

    /// 第三条迁移可选择性损坏的五步目录
    struct FiveStepCatalog {
        broken_third: bool,
    }

    impl MigrationCatalog for FiveStepCatalog {
        fn migrations_for(
            &self,
            _template: TenantTemplate,
            _backend: DbBackend,
        ) -> Result<MigrationSet, AppError> {
            let mut migrations = super::super::migrator::DefaultCatalog
                .migrations_for(TenantTemplate::PoliticalParty, DbBackend::Sqlite)?
                .iter()
                .take(2)
                .cloned()
                .collect::<Vec<_>>();
            let third = if self.broken_third {
                "CREATE TABLE step_three (id INTEGER PRIMARY KEY REFERENCES"
            } else {
                "CREATE TABLE step_three (id INTEGER PRIMARY KEY)"
            };
            migrations.push(Migration::new("20250101000003_create_identity_roles", [
                "CREATE TABLE identity_roles (identity_id BLOB NOT NULL, role_id BLOB NOT NULL, PRIMARY KEY (identity_id, role_id))",
                third,
            ]));
            migrations.push(Migration::new(
                "20250101000004_step_four",
                ["CREATE TABLE step_four (id INTEGER PRIMARY KEY)"],
            ));
            migrations.push(Migration::new(
                "20250101000005_step_five",
                ["CREATE TABLE step_five (id INTEGER PRIMARY KEY)"],
            ));
            MigrationSet::new(migrations)
        }
    }

    fn orchestrator_with(
        backend: Arc<SeaOrmBackend>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        catalog: Arc<dyn MigrationCatalog>,
        config: ProvisioningConfig,
    ) -> (
        Orchestrator,
        tokio::sync::mpsc::UnboundedReceiver<super::super::model::IssuedSetupToken>,
    ) {
        let (delivery, rx) = ChannelDelivery::channel();
        let orchestrator = Orchestrator::with_catalog(
            backend,
            provisioner,
            catalog,
            Arc::new(delivery),
            config,
            SetupTokenConfig::default(),
        );
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn test_provision_end_to_end() {
        let provisioned = provisioned_tenant("acme", SetupTokenConfig::default()).await;
        let tenant = &provisioned.tenant;
        assert_eq!(tenant.status, TenantStatus::Active);

        let status = provisioned.orchestrator.status("acme").await.unwrap();
        assert_eq!(status.stage, ProvisioningStage::Active);
        assert_eq!(status.last_completed_stage, Some(ProvisioningStage::Seeding));
        assert!(status.failed_stage.is_none());
        assert_eq!(status.attempts, 3);

        let config = provisioned
            .provisioner
            .connection_config(tenant)
            .unwrap();
        let db = connect_tenant(&config).await.unwrap();
        let applied = SchemaMigrations::find().count(&db).await.unwrap();
        let expected = super::super::migrator::DefaultCatalog
            .migrations_for(TenantTemplate::PoliticalParty, DbBackend::Sqlite)
            .unwrap()
            .len() as u64;
        assert_eq!(applied, expected);

        let identity = AdminIdentities::find().one(&db).await.unwrap().unwrap();
        assert_eq!(identity.email, "admin@acme.org");
        assert_eq!(identity.id, provisioned.token.identity_id);

        let report = provisioned.orchestrator.migration_report("acme").await.unwrap();
        assert!(report.pending.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_begin_yields_one_already_provisioning() {
        let dir = TestDir::new();
        let backend = control_backend().await;
        let (orchestrator, _rx) = orchestrator_with(
            backend,
            Arc::new(SqlProvisioner::new(sqlite_tenant_config(&dir))),
            Arc::new(DefaultCatalog),
            fast_provisioning_config(),
        );

        let (a, b) = tokio::join!(
            orchestrator.begin(request("acme")),
            orchestrator.begin(request("acme"))
        );

        let conflicts = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(AppError::AlreadyProvisioning(_))))
            .count();
        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(conflicts, 1);
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_active_slug_is_duplicate() {
        let provisioned = provisioned_tenant("acme", SetupTokenConfig::default()).await;

        for _ in 0..2 {
            // 锁在失败后已释放，所以第二次依然是 DuplicateSlug
            let err = provisioned
                .orchestrator
                .begin(request("acme"))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, AppError::DuplicateSlug(_)));
        }
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_locking() {
        let dir = TestDir::new();
        let (orchestrator, _rx) = orchestrator_with(
            control_backend().await,
            Arc::new(SqlProvisioner::new(sqlite_tenant_config(&dir))),
            Arc::new(DefaultCatalog),
            fast_provisioning_config(),
        );

        let mut bad = request("acme");
        bad.admin_email = "not-an-email".into();
        let err = orchestrator.begin(bad).await.err().unwrap();
        assert_eq!(err.exit_code(), 1);

        assert!(orchestrator.begin(request("acme")).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = TestDir::new();
        let backend = control_backend().await;
        let mut scripted = ScriptedProvisioner::new(&dir);
        scripted.fail_first = 2;
        let provisioner = Arc::new(scripted);
        let (orchestrator, mut rx) = orchestrator_with(
            backend,
            provisioner.clone(),
            Arc::new(DefaultCatalog),
            fast_provisioning_config(),
        );

        let tenant = orchestrator
            .begin(request("acme"))
            .await
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(provisioner.calls(), 3);
        assert!(rx.recv().await.is_some());

        // 3 次建库 + 迁移 1 次 + 播种 1 次
        let status = orchestrator.status("acme").await.unwrap();
        assert_eq!(status.attempts, 5);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_failed_then_retry_resumes() {
        let dir = TestDir::new();
        let backend = control_backend().await;
        let mut scripted = ScriptedProvisioner::new(&dir);
        scripted.fail_first = 3;
        let provisioner = Arc::new(scripted);
        let (orchestrator, _rx) = orchestrator_with(
            backend,
            provisioner.clone(),
            Arc::new(DefaultCatalog),
            fast_provisioning_config(),
        );

        let err = orchestrator
            .begin(request("acme"))
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProvisionFailure(_)));
        assert_eq!(err.exit_code(), 3);

        let status = orchestrator.status("acme").await.unwrap();
        assert_eq!(status.status, TenantStatus::Failed);
        assert_eq!(status.stage, ProvisioningStage::Failed);
        assert_eq!(status.failed_stage, Some(ProvisioningStage::ProvisioningDb));
        assert!(status.last_error.unwrap().contains("connection refused"));

        // 锁已释放，重试直接成功
        let tenant = orchestrator.begin_retry("acme").await.unwrap().run().await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert_eq!(provisioner.calls(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let dir = TestDir::new();
        let mut scripted = ScriptedProvisioner::new(&dir);
        scripted.fail_first = 1;
        scripted.error = || AppError::Config("tenant_database.admin_url is not set".into());
        let provisioner = Arc::new(scripted);
        let (orchestrator, _rx) = orchestrator_with(
            control_backend().await,
            provisioner.clone(),
            Arc::new(DefaultCatalog),
            fast_provisioning_config(),
        );

        let err = orchestrator
            .begin(request("acme"))
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(provisioner.calls(), 1);
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let dir = TestDir::new();
        let mut scripted = ScriptedProvisioner::new(&dir);
        scripted.delay = Some(Duration::from_secs(5));
        let mut config = fast_provisioning_config();
        config.stage_timeout_secs = 1;
        config.max_attempts = 1;
        let (orchestrator, _rx) = orchestrator_with(
            control_backend().await,
            Arc::new(scripted),
            Arc::new(DefaultCatalog),
            config,
        );

        let err = orchestrator
            .begin(request("acme"))
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StageTimeout { .. }));

        let status = orchestrator.status("acme").await.unwrap();
        assert_eq!(status.failed_stage, Some(ProvisioningStage::ProvisioningDb));
    }

    #[tokio::test]
    async fn test_resume_from_failed_third_migration() {
        let dir = TestDir::new();
        let backend = control_backend().await;
        let provisioner = Arc::new(ScriptedProvisioner::new(&dir));
        let mut config = fast_provisioning_config();
        config.max_attempts = 2;

        let (broken, _rx) = orchestrator_with(
            backend.clone(),
            provisioner.clone(),
            Arc::new(FiveStepCatalog { broken_third: true }),
            config.clone(),
        );
        let err = broken
            .begin(request("acme"))
            .await
            .unwrap()
            .run()
            .await
            .unwrap_err();
        match &err {
            AppError::PartialMigrationFailure {
                failed,
                last_applied,
                ..
            } => {
                assert_eq!(failed, "20250101000003_create_identity_roles");
                assert_eq!(
                    last_applied.as_deref(),
                    Some("20250101000002_create_roles")
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let status = broken.status("acme").await.unwrap();
        assert_eq!(status.failed_stage, Some(ProvisioningStage::Migrating));
        assert_eq!(
            status.last_completed_stage,
            Some(ProvisioningStage::ProvisioningDb)
        );

        let tenant = broken.registry().require_by_slug("acme").await.unwrap();
        let connection = provisioner.connection_config(&tenant).unwrap();
        let db = connect_tenant(&connection).await.unwrap();
        let before = SchemaMigrations::find()
            .order_by_asc(schema_migrations::Column::MigrationId)
            .all(&db)
            .await
            .unwrap();
        assert_eq!(before.len(), 2);

        let (fixed, mut rx) = orchestrator_with(
            backend,
            provisioner.clone(),
            Arc::new(FiveStepCatalog { broken_third: false }),
            config,
        );
        let tenant = fixed.begin_retry("acme").await.unwrap().run().await.unwrap();
        assert_eq!(tenant.status, TenantStatus::Active);
        assert!(rx.recv().await.is_some());
        // 建库阶段没有重跑
        assert_eq!(provisioner.calls(), 1);

        let after = SchemaMigrations::find()
            .order_by_asc(schema_migrations::Column::MigrationId)
            .all(&db)
            .await
            .unwrap();
        assert_eq!(after.len(), 5);
        assert_eq!(&after[..2], &before[..]);
        assert_eq!(
            AdminIdentities::find()
                .filter(admin_identities::Column::Email.eq("admin@acme.org"))
                .count(&db)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_archive_revokes_pending_tokens() {
        let provisioned = provisioned_tenant("acme", SetupTokenConfig::default()).await;

        let archived = provisioned.orchestrator.archive("acme").await.unwrap();
        assert_eq!(archived.status, TenantStatus::Archived);

        let tokens = provisioned
            .backend
            .list_tokens_for_tenant(archived.id)
            .await
            .unwrap();
        assert!(tokens.iter().all(|t| t.status == "revoked"));

        let err = provisioned.orchestrator.begin_retry("acme").await.err().unwrap();
        assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_migrate_active_tenants_is_noop_when_current() {
        let provisioned = provisioned_tenant("acme", SetupTokenConfig::default()).await;

        let outcomes = provisioned
            .orchestrator
            .migrate_active_tenants()
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].applied.is_empty());
        assert!(outcomes[0].error.is_none());
    }

    #[test]
    fn test_error_chain_skips_repeated_text() {
        let err = AppError::Database(sea_orm::DbErr::Custom("disk full".into()));
        let chain = error_chain(&err);
        assert_eq!(chain.matches("disk full").count(), 1);
    }
}
