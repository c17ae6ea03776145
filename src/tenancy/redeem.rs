//! 初始化令牌兑换
//!
//! 令牌状态的 pending -> used 由控制面上的条件更新决定胜负，
//! 只有胜者会把凭据写入租户库。

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use uuid::Uuid;

use super::model::{IdentityStatus, SetupTokenStatus, TenantStatus};
use super::provisioner::{DatabaseProvisioner, open_tenant_database};
use super::registry::TenantRegistry;
use crate::config::SetupTokenConfig;
use crate::errors::AppError;
use crate::security::{PasswordManager, hash_setup_token};
use crate::storage::entities::{admin_identities, prelude::AdminIdentities, setup_tokens};
use crate::storage::{SeaOrmBackend, SetupTokenRepository};

pub struct TokenRedeemer {
    backend: Arc<SeaOrmBackend>,
    registry: TenantRegistry,
    provisioner: Arc<dyn DatabaseProvisioner>,
    config: SetupTokenConfig,
}

impl TokenRedeemer {
    pub fn new(
        backend: Arc<SeaOrmBackend>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        config: SetupTokenConfig,
    ) -> Self {
        Self {
            registry: TenantRegistry::new(backend.clone()),
            backend,
            provisioner,
            config,
        }
    }

    /// 兑换令牌并设置管理员凭据
    pub async fn redeem_token(&self, raw_token: &str, new_credential: &str) -> Result<(), AppError> {
        PasswordManager::validate_strength(new_credential, self.config.min_credential_length)?;

        let token_hash = hash_setup_token(&self.config.pepper, raw_token.trim());
        let token = self
            .backend
            .find_token_by_hash(&token_hash)
            .await?
            .ok_or(AppError::TokenInvalid)?;

        self.check_redeemable(&token).await?;

        let tenant = self.registry.require(token.tenant_id).await?;
        if tenant.status != TenantStatus::Active {
            tracing::warn!(tenant_id = %tenant.id, status = %tenant.status, "Token redemption for inactive tenant");
            return Err(AppError::TokenInvalid);
        }

        // 原子认领；失败时重新读取以给出准确的错误
        let now = Utc::now();
        if !self
            .backend
            .transition_token(token.id, "pending", "used", Some(now))
            .await?
        {
            let current = self
                .backend
                .find_token(token.id)
                .await?
                .ok_or(AppError::TokenInvalid)?;
            return Err(self.rejection_for(&current).await);
        }

        let identity_id = Uuid::parse_str(&token.subject_identity)
            .map_err(|_| AppError::Internal("Malformed token subject".into()))?;

        match self.write_credential(&tenant, identity_id, new_credential).await {
            Ok(true) => {
                tracing::info!(
                    tenant_id = %tenant.id,
                    identity_id = %identity_id,
                    token_id = %token.id,
                    "Setup token redeemed"
                );
                Ok(())
            }
            Ok(false) => {
                // 身份已设置过凭据，这个令牌不能再用
                self.backend
                    .transition_token(token.id, "used", "revoked", None)
                    .await?;
                tracing::warn!(tenant_id = %tenant.id, identity_id = %identity_id, "Identity already has a credential");
                Err(AppError::TokenInvalid)
            }
            Err(e) => {
                tracing::error!(tenant_id = %tenant.id, error = %e, "Failed to write credential, releasing token claim");
                if let Err(revert) = self
                    .backend
                    .transition_token(token.id, "used", "pending", None)
                    .await
                {
                    tracing::error!(token_id = %token.id, error = %revert, "Failed to release token claim");
                }
                Err(e)
            }
        }
    }

    /// 在认领之前按当前状态拒绝
    async fn check_redeemable(&self, token: &setup_tokens::Model) -> Result<(), AppError> {
        match token.status.parse::<SetupTokenStatus>()? {
            SetupTokenStatus::Pending if token.expires_at > Utc::now() => Ok(()),
            _ => Err(self.rejection_for(token).await),
        }
    }

    /// 根据令牌状态映射错误；过期的 pending 令牌顺带标记为 expired
    async fn rejection_for(&self, token: &setup_tokens::Model) -> AppError {
        match token.status.parse::<SetupTokenStatus>() {
            Ok(SetupTokenStatus::Used) => AppError::TokenAlreadyUsed,
            Ok(SetupTokenStatus::Expired) => AppError::TokenExpired,
            Ok(SetupTokenStatus::Revoked) => AppError::TokenInvalid,
            Ok(SetupTokenStatus::Pending) if token.expires_at <= Utc::now() => {
                if let Err(e) = self
                    .backend
                    .transition_token(token.id, "pending", "expired", None)
                    .await
                {
                    tracing::warn!(token_id = %token.id, error = %e, "Failed to mark token expired");
                }
                AppError::TokenExpired
            }
            Ok(SetupTokenStatus::Pending) => AppError::TokenInvalid,
            Err(e) => e,
        }
    }

    /// 只在凭据为空时写入；返回是否写入成功
    async fn write_credential(
        &self,
        tenant: &super::model::Tenant,
        identity_id: Uuid,
        credential: &str,
    ) -> Result<bool, AppError> {
        let credential_hash = PasswordManager::hash_password(credential)?;
        let db = open_tenant_database(&self.backend, &self.provisioner, tenant).await?;

        let result = AdminIdentities::update_many()
            .col_expr(
                admin_identities::Column::CredentialHash,
                Expr::value(Some(credential_hash)),
            )
            .col_expr(admin_identities::Column::MustChangeCredential, Expr::value(false))
            .col_expr(
                admin_identities::Column::Status,
                Expr::value(IdentityStatus::Active.as_str()),
            )
            .col_expr(admin_identities::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(admin_identities::Column::Id.eq(identity_id))
            .filter(admin_identities::Column::CredentialHash.is_null())
            .exec(&db)
            .await?;

        let _ = db.close().await;
        Ok(result.rows_affected == 1)
    }
}
