use tokio::signal;
use tracing::warn;

/// 等待 Ctrl+C；后台开通任务不会被等待，未完成的阶段在下次 retry 时继续
pub async fn listen_for_shutdown() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    warn!("收到关闭信号，正在停止服务...");
}
