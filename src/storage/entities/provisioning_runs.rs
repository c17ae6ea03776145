use sea_orm::entity::prelude::*;

/// 开通流程记录，每个租户一行
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "provisioning_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tenant_id: Uuid,
    pub state: String,
    pub last_completed_stage: Option<String>,
    pub failed_stage: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub attempts: i32,
    pub admin_email: String,
    /// JSON 序列化的 `ConnectionConfig`
    #[sea_orm(column_type = "Text", nullable)]
    pub connection_config: Option<String>,
    pub started_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
