use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::storage::{SeaOrmBackend, connect, run_migrations};
use crate::tenancy::{
    DatabaseProvisioner, Orchestrator, SqlProvisioner, TokenDelivery, TokenRedeemer,
};

/// 启动上下文
pub struct StartupContext {
    pub db: Arc<DatabaseConnection>,
    pub backend: Arc<SeaOrmBackend>,
    pub provisioner: Arc<dyn DatabaseProvisioner>,
    pub config: AppConfig,
    _log_guard: Option<WorkerGuard>,
}

impl StartupContext {
    /// 按指定的令牌投递方式构建编排器
    pub fn orchestrator(&self, delivery: Arc<dyn TokenDelivery>) -> Orchestrator {
        Orchestrator::new(
            self.backend.clone(),
            self.provisioner.clone(),
            delivery,
            self.config.provisioning.clone(),
            self.config.setup_token.clone(),
        )
    }

    pub fn redeemer(&self) -> TokenRedeemer {
        TokenRedeemer::new(
            self.backend.clone(),
            self.provisioner.clone(),
            self.config.setup_token.clone(),
        )
    }
}

/// 初始化日志、校验配置、连接控制面并执行迁移
pub async fn prepare(config: AppConfig) -> Result<StartupContext, AppError> {
    // 1. 初始化日志
    let log_guard = crate::system::init_logging(&config.log);
    tracing::info!("tenantctl v{} starting...", env!("CARGO_PKG_VERSION"));

    // 2. 验证配置
    config.validate()?;

    // 3. 连接控制面数据库
    tracing::info!("Connecting to control plane database");
    let db = connect(&config.database).await?;
    tracing::info!("Database connected");

    // 4. 控制面迁移
    run_migrations(&db).await?;

    let db = Arc::new(db);
    let backend = Arc::new(SeaOrmBackend::new(db.clone()));
    let provisioner: Arc<dyn DatabaseProvisioner> =
        Arc::new(SqlProvisioner::new(config.tenant_database.clone()));

    Ok(StartupContext {
        db,
        backend,
        provisioner,
        config,
        _log_guard: log_guard,
    })
}

/// 服务端启动：在 `prepare` 基础上按配置为已有租户补跑迁移
pub async fn prepare_server(config: AppConfig) -> Result<StartupContext, AppError> {
    let ctx = prepare(config).await?;

    if ctx.config.provisioning.migrate_on_startup {
        tracing::info!("Upgrading schemas of active tenants...");
        let orchestrator = ctx.orchestrator(Arc::new(crate::tenancy::OutboxDelivery::new(
            ctx.config.setup_token.outbox_dir.clone(),
        )));
        let outcomes = orchestrator.migrate_active_tenants().await?;
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        tracing::info!(
            tenants = outcomes.len(),
            failed,
            "Startup tenant migrations finished"
        );
    }

    tracing::info!("Server initialization complete");
    Ok(ctx)
}
