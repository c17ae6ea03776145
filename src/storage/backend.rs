use sea_orm::{DatabaseConnection, DbErr, SqlErr};
use std::sync::Arc;

/// SeaORM 控制面存储后端
///
/// 仓储 trait 的实现按表拆分在 `backends/` 下。
#[derive(Clone)]
pub struct SeaOrmBackend {
    pub(crate) db: Arc<DatabaseConnection>,
}

impl SeaOrmBackend {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

/// 唯一约束冲突
pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
