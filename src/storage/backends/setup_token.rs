use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::storage::backend::SeaOrmBackend;
use crate::storage::entities::{prelude::*, setup_tokens};
use crate::storage::repository::{NewSetupToken, SetupTokenRepository};

fn pending_token(token: NewSetupToken) -> setup_tokens::ActiveModel {
    setup_tokens::ActiveModel {
        id: Set(Uuid::new_v4()),
        token_hash: Set(token.token_hash),
        tenant_id: Set(token.tenant_id),
        subject_identity: Set(token.subject_identity),
        subject_email: Set(token.subject_email),
        expires_at: Set(token.expires_at),
        status: Set("pending".to_string()),
        created_at: Set(Utc::now()),
        used_at: Set(None),
    }
}

#[async_trait]
impl SetupTokenRepository for SeaOrmBackend {
    async fn insert_token(&self, token: NewSetupToken) -> Result<setup_tokens::Model, AppError> {
        Ok(pending_token(token).insert(self.db.as_ref()).await?)
    }

    async fn reissue_token(
        &self,
        token: NewSetupToken,
    ) -> Result<(u64, setup_tokens::Model), AppError> {
        let txn = self.db.begin().await?;

        let revoked = SetupTokens::update_many()
            .col_expr(setup_tokens::Column::Status, Expr::value("revoked"))
            .filter(setup_tokens::Column::TenantId.eq(token.tenant_id))
            .filter(setup_tokens::Column::SubjectIdentity.eq(token.subject_identity.as_str()))
            .filter(setup_tokens::Column::Status.eq("pending"))
            .exec(&txn)
            .await?
            .rows_affected;
        // 插入失败时事务回滚，旧令牌保持 pending
        let stored = pending_token(token).insert(&txn).await?;

        txn.commit().await?;
        Ok((revoked, stored))
    }

    async fn find_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<setup_tokens::Model>, AppError> {
        let token = SetupTokens::find()
            .filter(setup_tokens::Column::TokenHash.eq(token_hash))
            .one(self.db.as_ref())
            .await?;
        Ok(token)
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<setup_tokens::Model>, AppError> {
        Ok(SetupTokens::find_by_id(id).one(self.db.as_ref()).await?)
    }

    async fn list_tokens_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<setup_tokens::Model>, AppError> {
        let tokens = SetupTokens::find()
            .filter(setup_tokens::Column::TenantId.eq(tenant_id))
            .order_by_asc(setup_tokens::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(tokens)
    }

    async fn revoke_pending_tokens(
        &self,
        tenant_id: Uuid,
        subject_identity: Option<&str>,
    ) -> Result<u64, AppError> {
        let mut query = SetupTokens::update_many()
            .col_expr(setup_tokens::Column::Status, Expr::value("revoked"))
            .filter(setup_tokens::Column::TenantId.eq(tenant_id))
            .filter(setup_tokens::Column::Status.eq("pending"));
        if let Some(subject) = subject_identity {
            query = query.filter(setup_tokens::Column::SubjectIdentity.eq(subject));
        }
        Ok(query.exec(self.db.as_ref()).await?.rows_affected)
    }

    async fn transition_token(
        &self,
        id: Uuid,
        from: &str,
        to: &str,
        unexpired_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let used_at: Option<DateTime<Utc>> = if to == "used" { Some(Utc::now()) } else { None };

        let mut query = SetupTokens::update_many()
            .col_expr(setup_tokens::Column::Status, Expr::value(to))
            .col_expr(setup_tokens::Column::UsedAt, Expr::value(used_at))
            .filter(setup_tokens::Column::Id.eq(id))
            .filter(setup_tokens::Column::Status.eq(from));
        if let Some(now) = unexpired_at {
            query = query.filter(setup_tokens::Column::ExpiresAt.gt(now));
        }

        Ok(query.exec(self.db.as_ref()).await?.rows_affected == 1)
    }

    async fn expire_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = SetupTokens::update_many()
            .col_expr(setup_tokens::Column::Status, Expr::value("expired"))
            .filter(setup_tokens::Column::Status.eq("pending"))
            .filter(setup_tokens::Column::ExpiresAt.lte(now))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}
