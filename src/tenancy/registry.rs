//! 租户注册表

use std::sync::Arc;

use uuid::Uuid;

use super::model::{
    Tenant, TenantStatus, TenantTemplate, database_name_for, validate_display_name, validate_slug,
};
use crate::errors::AppError;
use crate::storage::{NewTenant, SeaOrmBackend, TenantRepository};

// 并发写入导致 CAS 连续失败时的重读上限
const MAX_CAS_ROUNDS: usize = 5;

#[derive(Clone)]
pub struct TenantRegistry {
    backend: Arc<SeaOrmBackend>,
}

impl TenantRegistry {
    pub fn new(backend: Arc<SeaOrmBackend>) -> Self {
        Self { backend }
    }

    /// 创建租户，初始状态 pending
    pub async fn create_tenant(
        &self,
        slug: &str,
        display_name: &str,
        template: TenantTemplate,
    ) -> Result<Tenant, AppError> {
        validate_slug(slug)?;
        validate_display_name(display_name)?;

        if self.backend.find_tenant_by_slug(slug).await?.is_some() {
            return Err(AppError::DuplicateSlug(slug.to_string()));
        }

        // 唯一索引兜底：并发创建时由 insert_tenant 返回 DuplicateSlug
        let model = self
            .backend
            .insert_tenant(NewTenant {
                slug: slug.to_string(),
                display_name: display_name.trim().to_string(),
                database_name: database_name_for(slug),
                template: template.as_str().to_string(),
            })
            .await?;

        tracing::info!(tenant_id = %model.id, slug = %slug, "Tenant registered");
        Tenant::try_from(model)
    }

    /// 更新租户状态；目标状态与当前一致时直接返回
    pub async fn mark_status(&self, tenant_id: Uuid, next: TenantStatus) -> Result<Tenant, AppError> {
        for _ in 0..MAX_CAS_ROUNDS {
            let current = self.require(tenant_id).await?;
            if current.status == next {
                return Ok(current);
            }
            if !current.status.can_transition_to(next) {
                return Err(AppError::InvalidStateTransition {
                    from: current.status.to_string(),
                    to: next.to_string(),
                });
            }

            if self
                .backend
                .compare_and_set_status(tenant_id, current.status.as_str(), next.as_str())
                .await?
            {
                tracing::info!(
                    tenant_id = %tenant_id,
                    slug = %current.slug,
                    from = %current.status,
                    to = %next,
                    "Tenant status changed"
                );
                return self.require(tenant_id).await;
            }

            tracing::debug!(tenant_id = %tenant_id, "Tenant status changed concurrently, re-reading");
        }

        Err(AppError::Internal(format!(
            "tenant {} status kept changing while updating to {}",
            tenant_id, next
        )))
    }

    pub async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        self.backend
            .find_tenant(tenant_id)
            .await?
            .map(Tenant::try_from)
            .transpose()
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, AppError> {
        self.backend
            .find_tenant_by_slug(slug)
            .await?
            .map(Tenant::try_from)
            .transpose()
    }

    pub async fn require(&self, tenant_id: Uuid) -> Result<Tenant, AppError> {
        self.find_by_id(tenant_id).await?.ok_or(AppError::NotFound)
    }

    pub async fn require_by_slug(&self, slug: &str) -> Result<Tenant, AppError> {
        self.find_by_slug(slug).await?.ok_or(AppError::NotFound)
    }

    pub async fn list(&self, status: Option<TenantStatus>) -> Result<Vec<Tenant>, AppError> {
        self.backend
            .list_tenants(status.as_ref().map(TenantStatus::as_str))
            .await?
            .into_iter()
            .map(Tenant::try_from)
            .collect()
    }
}
