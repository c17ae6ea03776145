use migration::{Migrator, MigratorTrait};
use sea_orm::sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, SqlxSqliteConnector};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{DatabaseConfig, TenantDriver};
use crate::errors::AppError;
use crate::tenancy::ConnectionConfig;

/// 连接 SQLite 数据库（带自动创建和性能优化）
pub async fn connect_sqlite(
    database_url: &str,
    max_connections: u32,
) -> Result<DatabaseConnection, AppError> {
    let opt = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("SQLite URL 解析失败: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .pragma("cache_size", "-16000") // 16MB cache
        .pragma("temp_store", "memory");

    // 内存库每个连接都是独立的库，只能用单连接
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        max_connections.max(1)
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opt)
        .await
        .map_err(|e| AppError::ProvisionFailure(format!("无法连接到 SQLite 数据库: {}", e)))?;

    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}

/// 连接通用数据库（MySQL/PostgreSQL）
pub async fn connect_generic(
    database_url: &str,
    max_connections: u32,
    min_connections: u32,
) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(max_connections)
        .min_connections(min_connections.min(max_connections))
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(3600))
        .sqlx_logging(false);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::ProvisionFailure(format!("无法连接到数据库: {}", e)))
}

/// 根据 URL 前缀识别驱动
pub fn detect_driver(url: &str) -> Result<TenantDriver, AppError> {
    if url.starts_with("sqlite:") {
        Ok(TenantDriver::Sqlite)
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(TenantDriver::Postgres)
    } else if url.starts_with("mysql://") {
        Ok(TenantDriver::Mysql)
    } else {
        Err(AppError::Config(format!("不支持的数据库类型: {}", url)))
    }
}

/// 连接控制面数据库（自动识别类型）
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, AppError> {
    match detect_driver(&config.url)? {
        TenantDriver::Sqlite => {
            tracing::info!("使用 SQLite 控制面数据库（已启用 WAL）");
            connect_sqlite(&config.url, config.max_connections).await
        }
        TenantDriver::Postgres => {
            tracing::info!("使用 PostgreSQL 控制面数据库");
            connect_generic(&config.url, config.max_connections, config.min_connections).await
        }
        TenantDriver::Mysql => {
            tracing::info!("使用 MySQL 控制面数据库");
            connect_generic(&config.url, config.max_connections, config.min_connections).await
        }
    }
}

/// 按连接配置打开租户库连接池
pub async fn connect_tenant(config: &ConnectionConfig) -> Result<DatabaseConnection, AppError> {
    tracing::debug!(database = %config.database_name, driver = ?config.driver, "Opening tenant database pool");
    match config.driver {
        TenantDriver::Sqlite => connect_sqlite(&config.url, config.max_connections).await,
        TenantDriver::Postgres | TenantDriver::Mysql => {
            connect_generic(&config.url, config.max_connections, 1).await
        }
    }
}

/// 执行一条探活查询
pub async fn ping(db: &DatabaseConnection) -> Result<(), AppError> {
    db.execute_unprepared("SELECT 1")
        .await
        .map(|_| ())
        .map_err(|e| AppError::ProvisionFailure(format!("Database ping failed: {}", e)))
}

/// 运行控制面数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), AppError> {
    Migrator::up(db, None).await?;

    tracing::info!("✓ Control plane migrations completed");
    Ok(())
}
