//! 租户物理库的创建与连通性校验

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection};

use super::model::{ConnectionConfig, Tenant};
use crate::config::{TenantDatabaseConfig, TenantDriver};
use crate::errors::AppError;
use crate::storage::connection::{connect_generic, connect_tenant, ping};
use crate::storage::{ProvisioningRunRepository, SeaOrmBackend};

/// 物理库创建器
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// 创建（或确认已存在）租户库，连通后返回连接参数；可重复调用
    async fn provision_database(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError>;

    /// 只计算连接参数，不触碰数据库
    fn connection_config(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError>;
}

/// 基于 SQL 的实现，支持 SQLite / PostgreSQL / MySQL
pub struct SqlProvisioner {
    config: TenantDatabaseConfig,
}

impl SqlProvisioner {
    pub fn new(config: TenantDatabaseConfig) -> Self {
        Self { config }
    }

    fn sqlite_path(&self, database_name: &str) -> PathBuf {
        Path::new(&self.config.data_dir).join(format!("{}.sqlite", database_name))
    }

    fn admin_url(&self) -> Result<&str, AppError> {
        self.config
            .admin_url
            .as_deref()
            .ok_or_else(|| AppError::Config("tenant_database.admin_url is not set".into()))
    }

    /// 通过管理连接执行建库语句
    async fn create_server_database(&self, database_name: &str) -> Result<(), AppError> {
        let admin = connect_generic(self.admin_url()?, 1, 1).await?;

        // database_name 只含 [a-z0-9_]，由 slug 校验保证
        let sql = match self.config.driver {
            TenantDriver::Postgres => format!("CREATE DATABASE \"{}\"", database_name),
            TenantDriver::Mysql => format!("CREATE DATABASE IF NOT EXISTS `{}`", database_name),
            TenantDriver::Sqlite => return Ok(()),
        };

        let result = admin.execute_unprepared(&sql).await;
        let _ = admin.close().await;

        match result {
            Ok(_) => {
                tracing::info!(database = %database_name, "Tenant database created");
                Ok(())
            }
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                tracing::info!(database = %database_name, "Tenant database already exists");
                Ok(())
            }
            Err(e) => Err(AppError::ProvisionFailure(format!(
                "CREATE DATABASE {} failed: {}",
                database_name, e
            ))),
        }
    }
}

#[async_trait]
impl DatabaseProvisioner for SqlProvisioner {
    async fn provision_database(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError> {
        let config = self.connection_config(tenant)?;

        match self.config.driver {
            TenantDriver::Sqlite => {
                std::fs::create_dir_all(&self.config.data_dir).map_err(|e| {
                    AppError::ProvisionFailure(format!(
                        "Failed to create tenant data dir {}: {}",
                        self.config.data_dir, e
                    ))
                })?;
            }
            TenantDriver::Postgres | TenantDriver::Mysql => {
                self.create_server_database(&config.database_name).await?;
            }
        }

        // 建库之后必须能连上
        let db = connect_tenant(&config).await?;
        ping(&db).await?;
        let _ = db.close().await;

        tracing::info!(
            tenant_id = %tenant.id,
            database = %config.database_name,
            driver = ?config.driver,
            "Tenant database ready"
        );
        Ok(config)
    }

    fn connection_config(&self, tenant: &Tenant) -> Result<ConnectionConfig, AppError> {
        let url = match self.config.driver {
            TenantDriver::Sqlite => format!(
                "sqlite://{}?mode=rwc",
                self.sqlite_path(&tenant.database_name).display()
            ),
            TenantDriver::Postgres | TenantDriver::Mysql => {
                replace_database_in_url(self.admin_url()?, &tenant.database_name)?
            }
        };

        Ok(ConnectionConfig {
            database_name: tenant.database_name.clone(),
            driver: self.config.driver,
            url,
            max_connections: self.config.max_connections,
        })
    }
}

/// 把服务器 URL 的库名部分替换为租户库名，保留查询参数
fn replace_database_in_url(server_url: &str, database_name: &str) -> Result<String, AppError> {
    let scheme_end = server_url
        .find("://")
        .ok_or_else(|| AppError::Config(format!("Invalid database URL: {}", server_url)))?
        + 3;

    let (base, query) = match server_url.find('?') {
        Some(pos) => (&server_url[..pos], &server_url[pos..]),
        None => (server_url, ""),
    };

    let authority_end = base[scheme_end..]
        .find('/')
        .map(|pos| scheme_end + pos)
        .unwrap_or(base.len());

    Ok(format!("{}/{}{}", &base[..authority_end], database_name, query))
}

/// 租户库连接参数：优先使用开通时记录的值
pub async fn resolve_connection(
    backend: &SeaOrmBackend,
    provisioner: &dyn DatabaseProvisioner,
    tenant: &Tenant,
) -> Result<ConnectionConfig, AppError> {
    if let Some(raw) = backend
        .find_run(tenant.id)
        .await?
        .and_then(|run| run.connection_config)
    {
        return ConnectionConfig::from_json(&raw);
    }
    provisioner.connection_config(tenant)
}

/// 打开租户库
pub async fn open_tenant_database(
    backend: &SeaOrmBackend,
    provisioner: &Arc<dyn DatabaseProvisioner>,
    tenant: &Tenant,
) -> Result<DatabaseConnection, AppError> {
    let config = resolve_connection(backend, provisioner.as_ref(), tenant).await?;
    connect_tenant(&config).await
}
