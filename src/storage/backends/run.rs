use async_trait::async_trait;
use chrono::Utc;
use sea_orm::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::storage::backend::{SeaOrmBackend, is_unique_violation};
use crate::storage::entities::{prelude::*, provisioning_runs};
use crate::storage::repository::{ProvisioningRunRepository, RunUpdate};

#[async_trait]
impl ProvisioningRunRepository for SeaOrmBackend {
    async fn ensure_run(
        &self,
        tenant_id: Uuid,
        admin_email: &str,
    ) -> Result<provisioning_runs::Model, AppError> {
        if let Some(existing) = self.find_run(tenant_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let run = provisioning_runs::ActiveModel {
            tenant_id: Set(tenant_id),
            state: Set("PENDING".to_string()),
            last_completed_stage: Set(None),
            failed_stage: Set(None),
            last_error: Set(None),
            attempts: Set(0),
            admin_email: Set(admin_email.to_string()),
            connection_config: Set(None),
            started_at: Set(now),
            updated_at: Set(now),
        };

        match run.insert(self.db.as_ref()).await {
            Ok(created) => Ok(created),
            // 并发创建时以已存在的记录为准
            Err(e) if is_unique_violation(&e) => self
                .find_run(tenant_id)
                .await?
                .ok_or_else(|| AppError::Internal("provisioning run vanished".into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_run(&self, tenant_id: Uuid) -> Result<Option<provisioning_runs::Model>, AppError> {
        Ok(ProvisioningRuns::find_by_id(tenant_id)
            .one(self.db.as_ref())
            .await?)
    }

    async fn update_run(
        &self,
        tenant_id: Uuid,
        update: RunUpdate,
    ) -> Result<provisioning_runs::Model, AppError> {
        let existing = self.find_run(tenant_id).await?.ok_or(AppError::NotFound)?;
        let attempts = existing.attempts;

        let mut active: provisioning_runs::ActiveModel = existing.into();
        if let Some(state) = update.state {
            active.state = Set(state);
        }
        if let Some(stage) = update.last_completed_stage {
            active.last_completed_stage = Set(stage);
        }
        if let Some(stage) = update.failed_stage {
            active.failed_stage = Set(stage);
        }
        if let Some(error) = update.last_error {
            active.last_error = Set(error);
        }
        if let Some(config) = update.connection_config {
            active.connection_config = Set(config);
        }
        if let Some(email) = update.admin_email {
            active.admin_email = Set(email);
        }
        if update.bump_attempts {
            active.attempts = Set(attempts + 1);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(self.db.as_ref()).await?)
    }
}
