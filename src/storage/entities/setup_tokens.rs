use sea_orm::entity::prelude::*;

/// 初始化令牌：只保存哈希，原文不落库
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "setup_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub token_hash: String,
    pub tenant_id: Uuid,
    /// 租户库中 admin_identities.id
    pub subject_identity: String,
    pub subject_email: String,
    pub expires_at: DateTimeUtc,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub used_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
