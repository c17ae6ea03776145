//! 过期令牌清理任务

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::storage::{SeaOrmBackend, SetupTokenRepository};

/// 把已过期的 pending 令牌标记为 expired，返回处理数量
pub async fn sweep_expired_tokens(backend: &SeaOrmBackend) -> Result<u64, AppError> {
    let expired = backend.expire_stale_tokens(Utc::now()).await?;
    if expired > 0 {
        tracing::info!(expired, "Marked setup tokens as expired");
    }
    Ok(expired)
}

/// 启动后台清理循环
pub fn spawn_token_sweeper(backend: Arc<SeaOrmBackend>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        tracing::info!(interval_secs, "Setup token sweeper started");

        loop {
            interval.tick().await;
            if let Err(e) = sweep_expired_tokens(&backend).await {
                tracing::error!(error = %e, "Setup token sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewSetupToken;
    use crate::tenancy::test_support::{control_backend, seed_tenant};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_marks_only_expired_tokens() {
        let backend = control_backend().await;
        let tenant = seed_tenant(&backend, "acme").await;

        for (hash, offset) in [("f", -5), ("g", 60)] {
            backend
                .insert_token(NewSetupToken {
                    token_hash: hash.repeat(64),
                    tenant_id: tenant.id,
                    subject_identity: Uuid::new_v4().to_string(),
                    subject_email: "admin@acme.org".into(),
                    expires_at: Utc::now() + ChronoDuration::minutes(offset),
                })
                .await
                .unwrap();
        }

        assert_eq!(sweep_expired_tokens(&backend).await.unwrap(), 1);
        assert_eq!(sweep_expired_tokens(&backend).await.unwrap(), 0);

        let statuses: Vec<_> = backend
            .list_tokens_for_tenant(tenant.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect();
        assert!(statuses.contains(&"expired".to_string()));
        assert!(statuses.contains(&"pending".to_string()));
    }
}
