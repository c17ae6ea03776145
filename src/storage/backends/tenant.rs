use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::storage::backend::{SeaOrmBackend, is_unique_violation};
use crate::storage::entities::{prelude::*, tenants};
use crate::storage::repository::{NewTenant, TenantRepository};

#[async_trait]
impl TenantRepository for SeaOrmBackend {
    async fn insert_tenant(&self, tenant: NewTenant) -> Result<tenants::Model, AppError> {
        let now = Utc::now();
        let slug = tenant.slug.clone();
        let model = tenants::ActiveModel {
            id: Set(Uuid::new_v4()),
            slug: Set(tenant.slug),
            display_name: Set(tenant.display_name),
            database_name: Set(tenant.database_name),
            template: Set(tenant.template),
            status: Set("pending".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(self.db.as_ref()).await {
            Ok(created) => Ok(created),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateSlug(slug)),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<tenants::Model>, AppError> {
        Ok(Tenants::find_by_id(id).one(self.db.as_ref()).await?)
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<tenants::Model>, AppError> {
        let tenant = Tenants::find()
            .filter(tenants::Column::Slug.eq(slug))
            .one(self.db.as_ref())
            .await?;
        Ok(tenant)
    }

    async fn list_tenants(&self, status: Option<&str>) -> Result<Vec<tenants::Model>, AppError> {
        let mut query = Tenants::find().order_by_asc(tenants::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(tenants::Column::Status.eq(status));
        }
        Ok(query.all(self.db.as_ref()).await?)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &str,
        next: &str,
    ) -> Result<bool, AppError> {
        let result = Tenants::update_many()
            .col_expr(tenants::Column::Status, Expr::value(next))
            .col_expr(tenants::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tenants::Column::Id.eq(id))
            .filter(tenants::Column::Status.eq(expected))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }
}
