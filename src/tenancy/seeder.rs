//! 租户库初始化数据：默认角色、首个管理员和一次性初始化令牌

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::*;
use uuid::Uuid;

use super::model::{AdminIdentityInfo, IdentityStatus, IssuedSetupToken};
use crate::config::SetupTokenConfig;
use crate::errors::AppError;
use crate::security::{generate_setup_token, hash_setup_token};
use crate::storage::backend::is_unique_violation;
use crate::storage::entities::{
    admin_identities, identity_roles, prelude::*, roles,
};
use crate::storage::{NewSetupToken, SeaOrmBackend, SetupTokenRepository};

/// 默认角色
pub const DEFAULT_ROLES: [(&str, &str); 2] = [
    ("admin", "Full administrative access"),
    ("member", "Regular member"),
];

pub struct BootstrapSeeder {
    backend: Arc<SeaOrmBackend>,
    config: SetupTokenConfig,
}

impl BootstrapSeeder {
    pub fn new(backend: Arc<SeaOrmBackend>, config: SetupTokenConfig) -> Self {
        Self { backend, config }
    }

    /// 播种管理员并签发令牌；重复调用不会产生重复数据，只会换发新令牌
    pub async fn seed_admin(
        &self,
        tenant_db: &DatabaseConnection,
        tenant_id: Uuid,
        info: &AdminIdentityInfo,
    ) -> Result<IssuedSetupToken, AppError> {
        let admin_role = ensure_default_roles(tenant_db).await?;
        let identity = ensure_identity(tenant_db, &info.email).await?;
        ensure_role_assignment(tenant_db, identity.id, admin_role.id).await?;

        let raw_token = generate_setup_token(self.config.token_length);
        let expires_at = Utc::now() + Duration::hours(self.config.ttl_hours);
        let (revoked, stored) = self
            .backend
            .reissue_token(NewSetupToken {
                token_hash: hash_setup_token(&self.config.pepper, &raw_token),
                tenant_id,
                subject_identity: identity.id.to_string(),
                subject_email: identity.email.clone(),
                expires_at,
            })
            .await?;
        if revoked > 0 {
            tracing::info!(tenant_id = %tenant_id, revoked, "Revoked previous setup tokens");
        }

        tracing::info!(
            tenant_id = %tenant_id,
            identity_id = %identity.id,
            token_id = %stored.id,
            expires_at = %expires_at,
            "Setup token issued"
        );

        Ok(IssuedSetupToken {
            raw_token,
            token_id: stored.id,
            tenant_id,
            identity_id: identity.id,
            email: identity.email,
            expires_at,
        })
    }
}

/// 确保默认角色存在，返回 admin 角色
async fn ensure_default_roles(db: &DatabaseConnection) -> Result<roles::Model, AppError> {
    let mut admin = None;
    for (name, description) in DEFAULT_ROLES {
        let role = match Roles::find()
            .filter(roles::Column::Name.eq(name))
            .one(db)
            .await?
        {
            Some(role) => role,
            None => {
                let created = roles::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    name: Set(name.to_string()),
                    description: Set(Some(description.to_string())),
                    created_at: Set(Utc::now()),
                }
                .insert(db)
                .await;
                match created {
                    Ok(role) => role,
                    Err(e) if is_unique_violation(&e) => Roles::find()
                        .filter(roles::Column::Name.eq(name))
                        .one(db)
                        .await?
                        .ok_or_else(|| AppError::Internal(format!("role {} vanished", name)))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        if name == "admin" {
            admin = Some(role);
        }
    }
    admin.ok_or_else(|| AppError::Internal("admin role missing".into()))
}

async fn find_identity(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<admin_identities::Model>, AppError> {
    Ok(AdminIdentities::find()
        .filter(admin_identities::Column::Email.eq(email))
        .one(db)
        .await?)
}

/// 按邮箱查找或创建管理员（凭据为空，待兑换令牌后设置）
async fn ensure_identity(
    db: &DatabaseConnection,
    email: &str,
) -> Result<admin_identities::Model, AppError> {
    if let Some(existing) = find_identity(db, email).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let created = admin_identities::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        credential_hash: Set(None),
        must_change_credential: Set(true),
        status: Set(IdentityStatus::Invited.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await;

    match created {
        Ok(identity) => {
            tracing::info!(identity_id = %identity.id, "Admin identity created");
            Ok(identity)
        }
        Err(e) if is_unique_violation(&e) => find_identity(db, email)
            .await?
            .ok_or_else(|| AppError::Internal("admin identity vanished".into())),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_role_assignment(
    db: &DatabaseConnection,
    identity_id: Uuid,
    role_id: Uuid,
) -> Result<(), AppError> {
    let exists = IdentityRoles::find_by_id((identity_id, role_id))
        .one(db)
        .await?
        .is_some();
    if exists {
        return Ok(());
    }

    let assignment = identity_roles::ActiveModel {
        identity_id: Set(identity_id),
        role_id: Set(role_id),
    };
    match IdentityRoles::insert(assignment).exec(db).await {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
