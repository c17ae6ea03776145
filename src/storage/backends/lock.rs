use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::storage::backend::{SeaOrmBackend, is_unique_violation};
use crate::storage::entities::{prelude::*, provisioning_locks};
use crate::storage::repository::ProvisioningLockRepository;

impl SeaOrmBackend {
    /// 插入锁行；主键冲突返回 false
    async fn insert_lock(&self, slug: &str, holder: Uuid) -> Result<bool, AppError> {
        let lock = provisioning_locks::ActiveModel {
            slug: Set(slug.to_string()),
            holder: Set(holder),
            acquired_at: Set(Utc::now()),
        };

        match ProvisioningLocks::insert(lock).exec(self.db.as_ref()).await {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ProvisioningLockRepository for SeaOrmBackend {
    async fn try_acquire_lock(
        &self,
        slug: &str,
        holder: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        if self.insert_lock(slug, holder).await? {
            return Ok(true);
        }

        // 持有者崩溃后遗留的锁，超过 TTL 才允许接管
        let removed = ProvisioningLocks::delete_many()
            .filter(provisioning_locks::Column::Slug.eq(slug))
            .filter(provisioning_locks::Column::AcquiredAt.lt(stale_before))
            .exec(self.db.as_ref())
            .await?;
        if removed.rows_affected == 0 {
            return Ok(false);
        }

        tracing::warn!(slug = %slug, "Took over stale provisioning lock");
        self.insert_lock(slug, holder).await
    }

    async fn release_lock(&self, slug: &str, holder: Uuid) -> Result<(), AppError> {
        ProvisioningLocks::delete_many()
            .filter(provisioning_locks::Column::Slug.eq(slug))
            .filter(provisioning_locks::Column::Holder.eq(holder))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }
}
