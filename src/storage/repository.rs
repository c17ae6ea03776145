use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entities::{provisioning_runs, setup_tokens, tenants};
use crate::errors::AppError;

/// 新建租户所需字段
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub slug: String,
    pub display_name: String,
    pub database_name: String,
    pub template: String,
}

/// 开通记录的部分更新；外层 None 表示不修改该列
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub state: Option<String>,
    pub last_completed_stage: Option<Option<String>>,
    pub failed_stage: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub connection_config: Option<Option<String>>,
    pub admin_email: Option<String>,
    pub bump_attempts: bool,
}

/// 新签发的令牌（只含哈希）
#[derive(Debug, Clone)]
pub struct NewSetupToken {
    pub token_hash: String,
    pub tenant_id: Uuid,
    pub subject_identity: String,
    pub subject_email: String,
    pub expires_at: DateTime<Utc>,
}

/// 租户仓储
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// slug 或库名冲突时返回 `DuplicateSlug`
    async fn insert_tenant(&self, tenant: NewTenant) -> Result<tenants::Model, AppError>;
    async fn find_tenant(&self, id: Uuid) -> Result<Option<tenants::Model>, AppError>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<tenants::Model>, AppError>;
    async fn list_tenants(&self, status: Option<&str>) -> Result<Vec<tenants::Model>, AppError>;
    /// 仅当当前状态等于 `expected` 时更新，返回是否命中
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> Result<bool, AppError>;
}

/// 开通记录仓储
#[async_trait]
pub trait ProvisioningRunRepository: Send + Sync {
    /// 不存在则创建，存在则原样返回
    async fn ensure_run(
        &self,
        tenant_id: Uuid,
        admin_email: &str,
    ) -> Result<provisioning_runs::Model, AppError>;
    async fn find_run(&self, tenant_id: Uuid) -> Result<Option<provisioning_runs::Model>, AppError>;
    async fn update_run(
        &self,
        tenant_id: Uuid,
        update: RunUpdate,
    ) -> Result<provisioning_runs::Model, AppError>;
}

/// slug 级别的开通锁
#[async_trait]
pub trait ProvisioningLockRepository: Send + Sync {
    /// 获取锁；早于 `stale_before` 的旧锁会被接管
    async fn try_acquire_lock(
        &self,
        slug: &str,
        holder: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn release_lock(&self, slug: &str, holder: Uuid) -> Result<(), AppError>;
}

/// 初始化令牌仓储
#[async_trait]
pub trait SetupTokenRepository: Send + Sync {
    async fn insert_token(&self, token: NewSetupToken) -> Result<setup_tokens::Model, AppError>;
    /// 在同一事务内作废该主体的 pending 令牌并写入新令牌，返回作废数量与新令牌
    async fn reissue_token(
        &self,
        token: NewSetupToken,
    ) -> Result<(u64, setup_tokens::Model), AppError>;
    async fn find_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<setup_tokens::Model>, AppError>;
    async fn find_token(&self, id: Uuid) -> Result<Option<setup_tokens::Model>, AppError>;
    async fn list_tokens_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<setup_tokens::Model>, AppError>;
    /// 作废某个主体名下所有未使用的令牌，返回作废数量
    async fn revoke_pending_tokens(
        &self,
        tenant_id: Uuid,
        subject_identity: Option<&str>,
    ) -> Result<u64, AppError>;
    /// 状态比较并交换；`unexpired_at` 为 Some 时额外要求 `expires_at > now`
    async fn transition_token(
        &self,
        id: Uuid,
        from: &str,
        to: &str,
        unexpired_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError>;
    /// 把所有已过期的 pending 令牌标记为 expired
    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}
