//! Panic handler module
//!
//! panic 时打印彩色报告并追加写入 crash.log。开通流程运行在后台任务里，
//! 任务 panic 后 slug 锁会保留到 TTL 过期，这里至少保证现场被记录下来。

use chrono::Utc;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;

const CRASH_LOG: &str = "crash.log";

/// 安装自定义 panic hook
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_else(|| "Unknown location".to_string());

        let thread = std::thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();
        let backtrace = Backtrace::force_capture();
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

        tracing::error!(%thread, %location, "panic: {}", message);

        if let Err(e) = write_crash_log(&timestamp, &thread, &message, &location, &backtrace) {
            eprintln!("Failed to write crash log: {}", e);
        }

        display_panic(&thread, &message, &location, &backtrace);
    }));
}

/// 显示彩色的 panic 报告
fn display_panic(thread: &str, message: &str, location: &str, backtrace: &Backtrace) {
    use colored::Colorize;

    let rule = "═══════════════════════════════════════════════════".red().bold();
    eprintln!();
    eprintln!("{}", rule);
    eprintln!("{} {}", "PANIC".red().bold(), format!("(thread {})", thread).dimmed());
    eprintln!("{}", rule);
    eprintln!("{} {}", "原因:".yellow().bold(), message.white());
    eprintln!("{} {}", "位置:".yellow().bold(), location.white());
    eprintln!();
    eprintln!("{}", "堆栈跟踪:".yellow().bold());
    eprintln!("{}", format!("{:?}", backtrace).dimmed());
    eprintln!("{}", format!("详细信息已保存到 {}", CRASH_LOG).cyan());
    eprintln!("{}", rule);
    eprintln!();
}

/// 写入崩溃日志
fn write_crash_log(
    timestamp: &str,
    thread: &str,
    message: &str,
    location: &str,
    backtrace: &Backtrace,
) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(CRASH_LOG)?;

    writeln!(file, "==========================================")?;
    writeln!(file, "tenantctl crash report - {}", timestamp)?;
    writeln!(file, "==========================================")?;
    writeln!(file, "Thread: {}", thread)?;
    writeln!(file, "Message: {}", message)?;
    writeln!(file, "Location: {}", location)?;
    writeln!(file, "\nBacktrace:")?;
    writeln!(file, "{:?}", backtrace)?;
    writeln!(file, "==========================================\n")?;

    Ok(())
}
