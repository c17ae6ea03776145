//! 原始初始化令牌的投递出口
//!
//! 令牌原文只会通过这里离开编排器，日志里永远不会出现。

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::sync::mpsc;

use super::model::{IssuedSetupToken, Tenant};
use crate::errors::AppError;

#[async_trait]
pub trait TokenDelivery: Send + Sync {
    async fn deliver(&self, tenant: &Tenant, token: &IssuedSetupToken) -> Result<(), AppError>;
}

/// CLI 模式：直接打印到标准输出
pub struct StdoutDelivery;

#[async_trait]
impl TokenDelivery for StdoutDelivery {
    async fn deliver(&self, tenant: &Tenant, token: &IssuedSetupToken) -> Result<(), AppError> {
        use colored::Colorize;

        println!();
        println!("{}", "Setup token issued".green().bold());
        println!("  {} {}", "Tenant:".cyan(), tenant.slug);
        println!("  {} {}", "Admin:".cyan(), token.email);
        println!("  {} {}", "Token:".cyan(), token.raw_token.yellow().bold());
        println!("  {} {}", "Expires:".cyan(), token.expires_at.to_rfc3339());
        println!();
        Ok(())
    }
}

#[derive(Serialize)]
struct OutboxMessage<'a> {
    tenant_id: String,
    tenant_slug: &'a str,
    email: &'a str,
    token: &'a str,
    expires_at: String,
}

/// 服务端模式：每个令牌写成 outbox 目录下的一个 JSON 文件，由外部邮件服务取走
pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TokenDelivery for OutboxDelivery {
    async fn deliver(&self, tenant: &Tenant, token: &IssuedSetupToken) -> Result<(), AppError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create outbox dir: {}", e)))?;

        let message = OutboxMessage {
            tenant_id: tenant.id.to_string(),
            tenant_slug: &tenant.slug,
            email: &token.email,
            token: &token.raw_token,
            expires_at: token.expires_at.to_rfc3339(),
        };
        let body = serde_json::to_string_pretty(&message)
            .map_err(|e| AppError::Internal(format!("Failed to encode outbox message: {}", e)))?;

        // 先写临时文件再改名，消费者不会读到半个文件
        let path = self.dir.join(format!("{}-{}.json", tenant.slug, token.token_id));
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write outbox message: {}", e)))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write outbox message: {}", e)))?;

        tracing::info!(
            tenant_id = %tenant.id,
            token_id = %token.token_id,
            path = %path.display(),
            "Setup token written to outbox"
        );
        Ok(())
    }
}

/// 进程内投递，嵌入方或测试用
pub struct ChannelDelivery {
    tx: mpsc::UnboundedSender<IssuedSetupToken>,
}

impl ChannelDelivery {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IssuedSetupToken>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TokenDelivery for ChannelDelivery {
    async fn deliver(&self, _tenant: &Tenant, token: &IssuedSetupToken) -> Result<(), AppError> {
        self.tx
            .send(token.clone())
            .map_err(|_| AppError::Internal("Token receiver dropped".into()))
    }
}
