use serde::{Deserialize, Serialize};

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// 控制面数据库（租户注册表、令牌、锁）
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 租户物理库的创建方式
    #[serde(default)]
    pub tenant_database: TenantDatabaseConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub setup_token: SetupTokenConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// 管理接口所需的 `X-Admin-Key`
    #[serde(default = "default_admin_api_key")]
    pub admin_api_key: String,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_database_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_database_min_connections")]
    pub min_connections: u32,
}

/// 租户库驱动
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TenantDriver {
    Sqlite,
    Postgres,
    Mysql,
}

/// 租户库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDatabaseConfig {
    #[serde(default = "default_tenant_driver")]
    pub driver: TenantDriver,
    /// Postgres / MySQL 的管理连接（需要 CREATE DATABASE 权限）
    #[serde(default)]
    pub admin_url: Option<String>,
    /// SQLite 租户库文件目录
    #[serde(default = "default_tenant_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_tenant_max_connections")]
    pub max_connections: u32,
}

/// 开通流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// 每个阶段最多尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 单个阶段超时（秒）
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// 超过该时长的锁视为遗留，可被接管（秒）
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,
    /// 启动时对所有 active 租户补跑迁移
    #[serde(default = "default_migrate_on_startup")]
    pub migrate_on_startup: bool,
}

/// 初始化令牌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupTokenConfig {
    #[serde(default = "default_token_ttl_hours")]
    pub ttl_hours: i64,
    /// 参与哈希的服务端盐值
    #[serde(default = "default_token_pepper")]
    pub pepper: String,
    #[serde(default = "default_token_length")]
    pub token_length: usize,
    #[serde(default = "default_min_credential_length")]
    pub min_credential_length: usize,
    /// 服务端模式下原始令牌的投递目录
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: String,
    /// 过期令牌清理间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
}

impl ProvisioningConfig {
    /// 一次开通的最坏耗时（秒）：每个工作阶段用尽全部尝试且每次都超时，外加每次退避的上限
    pub fn worst_case_run_secs(&self) -> u64 {
        let stages = 3u64;
        let attempts = u64::from(self.max_attempts);
        let timeouts = stages * attempts * self.stage_timeout_secs;
        let backoff = (stages * attempts * self.max_backoff_ms).div_ceil(1000);
        timeouts + backoff
    }
}

// ============ Default Functions ============

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_admin_api_key() -> String {
    "CHANGE-THIS-ADMIN-KEY-IN-PRODUCTION".to_string()
}

fn default_database_url() -> String {
    "sqlite://tenant_registry.db?mode=rwc".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_database_min_connections() -> u32 {
    1
}

fn default_tenant_driver() -> TenantDriver {
    TenantDriver::Sqlite
}

fn default_tenant_data_dir() -> String {
    "data/tenants".to_string()
}

fn default_tenant_max_connections() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_stage_timeout_secs() -> u64 {
    120
}

fn default_lock_ttl_secs() -> i64 {
    1800 // 30 minutes
}

fn default_migrate_on_startup() -> bool {
    true
}

fn default_token_ttl_hours() -> i64 {
    72
}

fn default_token_pepper() -> String {
    "CHANGE-THIS-PEPPER-IN-PRODUCTION-MIN-32-CHARS".to_string()
}

fn default_token_length() -> usize {
    48
}

fn default_min_credential_length() -> usize {
    12
}

fn default_outbox_dir() -> String {
    "outbox".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_enable_rotation() -> bool {
    true
}

fn default_max_backups() -> u32 {
    5
}

// ============ Default Trait Implementations ============

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            admin_api_key: default_admin_api_key(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_database_max_connections(),
            min_connections: default_database_min_connections(),
        }
    }
}

impl Default for TenantDatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_tenant_driver(),
            admin_url: None,
            data_dir: default_tenant_data_dir(),
            max_connections: default_tenant_max_connections(),
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            migrate_on_startup: default_migrate_on_startup(),
        }
    }
}

impl Default for SetupTokenConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_token_ttl_hours(),
            pepper: default_token_pepper(),
            token_length: default_token_length(),
            min_credential_length: default_min_credential_length(),
            outbox_dir: default_outbox_dir(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            enable_rotation: default_enable_rotation(),
            max_backups: default_max_backups(),
        }
    }
}
