use std::env;
use std::fs;
use std::path::Path;

use super::{AppConfig, TenantDriver};
use crate::errors::AppError;

impl AppConfig {
    /// 从文件加载配置,支持环境变量覆盖
    ///
    /// # 参数
    /// * `config_path` - 可选的配置文件路径
    ///   - `Some(path)`: 使用指定文件（不存在则创建）
    ///   - `None`: 使用默认 "config.toml"（不存在则警告）
    pub fn load(config_path: Option<&str>) -> Self {
        let mut config = Self::load_from_file(config_path);
        config.override_with_env();
        config
    }

    /// 从 TOML 文件加载配置
    ///
    /// # 行为
    /// - 如果提供 `config_path` 且文件不存在: 创建默认配置文件
    /// - 如果未提供路径且文件不存在: 警告并使用内存默认值
    fn load_from_file(config_path: Option<&str>) -> Self {
        let path = config_path.unwrap_or("config.toml");
        let is_custom_path = config_path.is_some();

        if !Path::new(path).exists() {
            if is_custom_path {
                eprintln!("[WARN] Config file not found: {}", path);
                eprintln!("[WARN] Creating default config file...");
                if let Err(e) = Self::ensure_config_file(path) {
                    eprintln!("[ERROR] Failed to create config file {}: {}", path, e);
                    eprintln!("[WARN] Using in-memory defaults");
                    return Self::default();
                }
                eprintln!("[INFO] Config file created: {}", path);
            } else {
                eprintln!("[WARN] Config file not found: {}", path);
                eprintln!("[WARN] Using in-memory defaults");
                eprintln!("[HINT] Use -c/--config to point at a config file");
                return Self::default();
            }
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => {
                    eprintln!("[INFO] Config loaded from: {}", path);
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] {}", e);
                    eprintln!("[WARN] Using in-memory defaults");
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to read config file {}: {}", path, e);
                eprintln!("[WARN] Using in-memory defaults");
                Self::default()
            }
        }
    }

    /// 解析 TOML 文本
    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        toml::from_str::<AppConfig>(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// 确保配置文件存在,不存在则创建默认值
    fn ensure_config_file(path: &str) -> Result<(), AppError> {
        Self::default().save_to_file(path)
    }

    /// 用环境变量覆盖配置
    fn override_with_env(&mut self) {
        // 服务器配置
        if let Ok(host) = env::var("SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            } else {
                eprintln!("[ERROR] Invalid SERVER_PORT: {}", port);
            }
        }
        if let Ok(key) = env::var("ADMIN_API_KEY") {
            self.server.admin_api_key = key;
        }

        // 控制面数据库
        if let Ok(database_url) = env::var("DATABASE_URL") {
            self.database.url = database_url;
        }
        if let Ok(max_conn) = env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = max_conn.parse() {
                self.database.max_connections = n;
            } else {
                eprintln!("[ERROR] Invalid DATABASE_MAX_CONNECTIONS: {}", max_conn);
            }
        }

        // 租户库
        if let Ok(driver) = env::var("TENANT_DB_DRIVER") {
            match driver.as_str() {
                "sqlite" => self.tenant_database.driver = TenantDriver::Sqlite,
                "postgres" => self.tenant_database.driver = TenantDriver::Postgres,
                "mysql" => self.tenant_database.driver = TenantDriver::Mysql,
                other => eprintln!("[ERROR] Invalid TENANT_DB_DRIVER: {}", other),
            }
        }
        if let Ok(url) = env::var("TENANT_DB_URL") {
            self.tenant_database.admin_url = Some(url);
        }
        if let Ok(dir) = env::var("TENANT_DATA_DIR") {
            self.tenant_database.data_dir = dir;
        }

        // 开通流程
        if let Ok(attempts) = env::var("PROVISION_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.provisioning.max_attempts = n;
            } else {
                eprintln!("[ERROR] Invalid PROVISION_MAX_ATTEMPTS: {}", attempts);
            }
        }
        if let Ok(timeout) = env::var("PROVISION_STAGE_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.provisioning.stage_timeout_secs = n;
            } else {
                eprintln!("[ERROR] Invalid PROVISION_STAGE_TIMEOUT: {}", timeout);
            }
        }

        // 初始化令牌
        if let Ok(pepper) = env::var("SETUP_TOKEN_PEPPER") {
            self.setup_token.pepper = pepper;
        }
        if let Ok(ttl) = env::var("SETUP_TOKEN_TTL_HOURS") {
            if let Ok(n) = ttl.parse() {
                self.setup_token.ttl_hours = n;
            } else {
                eprintln!("[ERROR] Invalid SETUP_TOKEN_TTL_HOURS: {}", ttl);
            }
        }
        if let Ok(dir) = env::var("SETUP_TOKEN_OUTBOX") {
            self.setup_token.outbox_dir = dir;
        }

        // 日志配置
        if let Ok(level) = env::var("RUST_LOG") {
            self.log.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.log.format = format;
        }
        if let Ok(file) = env::var("LOG_FILE") {
            self.log.file = Some(file);
        }
        if let Ok(enable) = env::var("LOG_ENABLE_ROTATION") {
            self.log.enable_rotation = enable == "true" || enable == "1";
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        toml::to_string_pretty(&AppConfig::default())
            .unwrap_or_else(|e| format!("# failed to render sample config: {}", e))
    }

    /// 保存当前配置到 TOML 文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to render config: {}", e)))?;

        // 如果需要,创建父目录
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        fs::write(path, content)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), AppError> {
        if self.setup_token.pepper.len() < 32 {
            return Err(AppError::Config(
                "setup_token.pepper must be at least 32 characters".into(),
            ));
        }

        if self.setup_token.token_length < 32 {
            return Err(AppError::Config(
                "setup_token.token_length must be at least 32".into(),
            ));
        }

        if self.setup_token.ttl_hours <= 0 {
            return Err(AppError::Config(
                "setup_token.ttl_hours must be positive".into(),
            ));
        }

        if self.server.admin_api_key.len() < 16 {
            return Err(AppError::Config(
                "server.admin_api_key must be at least 16 characters".into(),
            ));
        }

        if self.provisioning.max_attempts == 0 {
            return Err(AppError::Config(
                "provisioning.max_attempts must be at least 1".into(),
            ));
        }

        if self.provisioning.stage_timeout_secs == 0 {
            return Err(AppError::Config(
                "provisioning.stage_timeout_secs must be positive".into(),
            ));
        }

        if self.provisioning.lock_ttl_secs <= 0 {
            return Err(AppError::Config(
                "provisioning.lock_ttl_secs must be positive".into(),
            ));
        }

        // 锁 TTL 必须长于一次开通的最坏耗时，否则运行中的锁会被当作遗留锁接管
        let worst_case_secs = self.provisioning.worst_case_run_secs();
        if (self.provisioning.lock_ttl_secs as u64) <= worst_case_secs {
            return Err(AppError::Config(format!(
                "provisioning.lock_ttl_secs must exceed the worst-case run duration ({}s)",
                worst_case_secs
            )));
        }

        if self.tenant_database.driver != TenantDriver::Sqlite
            && self.tenant_database.admin_url.is_none()
        {
            return Err(AppError::Config(
                "tenant_database.admin_url is required for postgres/mysql".into(),
            ));
        }

        Ok(())
    }
}
