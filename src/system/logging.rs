use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// 初始化日志
///
/// 配置了 `file` 时额外写入滚动日志文件，返回的 guard 必须在进程生命周期内持有，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_writer, guard) = match config.file.as_deref().map(|f| file_appender(f, config)) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("[ERROR] Failed to open log file: {}", e);
            (None, None)
        }
        None => (None, None),
    };

    // 文件输出固定为 json，每个分支各自构建，layer 与其 subscriber 类型绑定
    let result = match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .with(
                file_writer
                    .map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer)),
            )
            .try_init(),
        _ => {
            // pretty format (default)
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .with(
                    file_writer
                        .map(|writer| fmt::layer().json().with_ansi(false).with_writer(writer)),
                )
                .try_init()
        }
    };

    if let Err(e) = result {
        eprintln!("[WARN] Logging already initialized: {}", e);
    }

    tracing::info!("Logging initialized with level: {}", config.level);
    guard
}

fn file_appender(path: &str, config: &LogConfig) -> Result<RollingFileAppender, String> {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tenantctl.log");

    let rotation = if config.enable_rotation {
        Rotation::DAILY
    } else {
        Rotation::NEVER
    };

    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .max_log_files(config.max_backups.max(1) as usize)
        .build(dir)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_returns_guard() {
        let dir = std::env::temp_dir().join(format!("tenantctl-log-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let config = LogConfig {
            file: Some(dir.join("tenantctl.log").display().to_string()),
            enable_rotation: false,
            ..LogConfig::default()
        };

        let guard = init_logging(&config);
        assert!(guard.is_some());
        drop(guard);

        assert!(std::fs::read_dir(&dir).unwrap().next().is_some());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_console_only_logging_has_no_guard() {
        let config = LogConfig {
            format: "json".into(),
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_none());
    }
}
