//! 租户库 schema 迁移
//!
//! `schema_migrations` 是租户库版本的唯一来源。每条迁移在独立事务中执行，
//! 并在同一事务内写入记录；失败时停在失败的那一条，下次从这里继续。

pub mod catalog;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryOrder, Schema, Set,
    TransactionTrait,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::AppError;
use crate::storage::entities::{prelude::SchemaMigrations, schema_migrations};

pub use catalog::{DefaultCatalog, MigrationCatalog};

/// 单条迁移
#[derive(Debug, Clone)]
pub struct Migration {
    id: String,
    statements: Vec<String>,
    checksum: String,
}

impl Migration {
    pub fn new<I, S>(id: &str, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statements: Vec<String> = statements.into_iter().map(Into::into).collect();
        let checksum = checksum_of(&statements);
        Self {
            id: id.to_string(),
            statements,
            checksum,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

fn checksum_of(statements: &[String]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.trim().as_bytes());
        hasher.update(b"\n;\n");
    }
    hex::encode(hasher.finalize())
}

/// 迁移 id：14 位时间戳 + '_' + 名称（小写字母、数字、'_'）
fn validate_migration_id(id: &str) -> Result<(), AppError> {
    let invalid = || AppError::InvalidMigrationId(id.to_string());
    let (stamp, name) = id.split_at_checked(14).ok_or_else(invalid)?;

    if !stamp.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let name = name.strip_prefix('_').ok_or_else(invalid)?;
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid());
    }
    Ok(())
}

/// 有序、已校验的迁移集合
#[derive(Debug, Clone)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// 校验 id 并按 id 排序；时间戳定长，字典序即时间序
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, AppError> {
        for migration in &migrations {
            validate_migration_id(&migration.id)?;
        }

        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = migrations.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(AppError::DuplicateMigrationId(pair[0].id.clone()));
        }

        Ok(Self { migrations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations
            .binary_search_by(|m| m.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.migrations[idx])
    }
}

/// 已执行的迁移
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub migration_id: String,
    pub applied_at: DateTime<Utc>,
}

/// 迁移状态报告
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
    /// 记录的校验和与当前定义不一致的迁移
    pub drifted: Vec<String>,
}

/// 创建 `schema_migrations`（唯一不经过迁移记录的表）
async fn ensure_history_table(db: &DatabaseConnection) -> Result<(), AppError> {
    let backend = db.get_database_backend();
    let mut stmt = Schema::new(backend).create_table_from_entity(SchemaMigrations);
    stmt.if_not_exists();
    db.execute_unprepared(&backend.build(&stmt).sql).await?;
    Ok(())
}

/// 历史表是否存在；只读路径用它避免建表
async fn history_table_exists(db: &DatabaseConnection) -> Result<bool, AppError> {
    Ok(migration::SchemaManager::new(db)
        .has_table("schema_migrations")
        .await?)
}

async fn load_history(db: &DatabaseConnection) -> Result<Vec<schema_migrations::Model>, AppError> {
    Ok(SchemaMigrations::find()
        .order_by_asc(schema_migrations::Column::MigrationId)
        .all(db)
        .await?)
}

/// 对照历史记录得出待执行的迁移
fn plan<'a>(
    set: &'a MigrationSet,
    history: &[schema_migrations::Model],
) -> Result<Vec<&'a Migration>, AppError> {
    let recorded: HashMap<&str, &str> = history
        .iter()
        .map(|r| (r.migration_id.as_str(), r.checksum.as_str()))
        .collect();

    for record in history {
        match set.get(&record.migration_id) {
            Some(migration) if migration.checksum != record.checksum => {
                return Err(AppError::ChecksumMismatch(record.migration_id.clone()));
            }
            Some(_) => {}
            None => tracing::warn!(
                migration = %record.migration_id,
                "Applied migration is not part of the current set"
            ),
        }
    }

    let newest_applied = history.iter().map(|r| r.migration_id.as_str()).max();
    let pending: Vec<&Migration> = set
        .iter()
        .filter(|m| !recorded.contains_key(m.id.as_str()))
        .collect();

    if let (Some(newest), Some(first)) = (newest_applied, pending.first())
        && first.id.as_str() < newest
    {
        return Err(AppError::OutOfOrderMigration {
            pending: first.id.clone(),
            applied: newest.to_string(),
        });
    }

    Ok(pending)
}

/// 在一个事务中执行迁移并写入记录
async fn apply_one(db: &DatabaseConnection, migration: &Migration) -> Result<(), AppError> {
    let txn = db.begin().await?;

    for statement in &migration.statements {
        txn.execute_unprepared(statement).await?;
    }

    schema_migrations::ActiveModel {
        migration_id: Set(migration.id.clone()),
        applied_at: Set(Utc::now()),
        checksum: Set(migration.checksum.clone()),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(())
}

/// 执行所有待执行的迁移，返回本次执行的迁移 id
pub async fn apply_pending(
    db: &DatabaseConnection,
    set: &MigrationSet,
) -> Result<Vec<String>, AppError> {
    ensure_history_table(db).await?;
    let history = load_history(db).await?;
    let pending = plan(set, &history)?;

    if pending.is_empty() {
        tracing::debug!("Tenant schema is up to date");
        return Ok(Vec::new());
    }

    let mut last_applied = history.last().map(|r| r.migration_id.clone());
    let mut applied = Vec::with_capacity(pending.len());

    for migration in pending {
        if let Err(e) = apply_one(db, migration).await {
            tracing::error!(
                migration = %migration.id,
                last_applied = last_applied.as_deref().unwrap_or("none"),
                error = %e,
                "Migration failed"
            );
            return Err(AppError::PartialMigrationFailure {
                failed: migration.id.clone(),
                last_applied,
                reason: e.to_string(),
            });
        }

        tracing::info!(migration = %migration.id, "Migration applied");
        last_applied = Some(migration.id.clone());
        applied.push(migration.id.clone());
    }

    Ok(applied)
}

/// 只读的迁移状态，从未迁移过的库视为全部待执行
pub async fn status(db: &DatabaseConnection, set: &MigrationSet) -> Result<MigrationReport, AppError> {
    let history = if history_table_exists(db).await? {
        load_history(db).await?
    } else {
        Vec::new()
    };

    let drifted = history
        .iter()
        .filter(|r| {
            set.get(&r.migration_id)
                .is_some_and(|m| m.checksum != r.checksum)
        })
        .map(|r| r.migration_id.clone())
        .collect();

    let pending = set
        .iter()
        .filter(|m| !history.iter().any(|r| r.migration_id == m.id))
        .map(|m| m.id.clone())
        .collect();

    let applied = history
        .into_iter()
        .map(|r| AppliedMigration {
            migration_id: r.migration_id,
            applied_at: r.applied_at,
        })
        .collect();

    Ok(MigrationReport {
        applied,
        pending,
        drifted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::connect_sqlite;
    use crate::tenancy::test_support::TestDir;

    async fn tenant_db(dir: &TestDir) -> DatabaseConnection {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("tenant.sqlite").display());
        connect_sqlite(&url, 1).await.unwrap()
    }

    fn create_table(id: &str, table: &str) -> Migration {
        Migration::new(
            id,
            [format!("CREATE TABLE {} (id INTEGER PRIMARY KEY, name TEXT)", table)],
        )
    }

    fn five_step_set(third: Migration) -> MigrationSet {
        MigrationSet::new(vec![
            create_table("20240101000001_a", "a"),
            create_table("20240101000002_b", "b"),
            third,
            create_table("20240101000004_d", "d"),
            create_table("20240101000005_e", "e"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_ids() {
        for bad in ["2024_short", "2024010100000x_bad", "20240101000001", "20240101000001-x", "20240101000001_"] {
            let err = MigrationSet::new(vec![create_table(bad, "t")]).unwrap_err();
            assert!(matches!(err, AppError::InvalidMigrationId(_)), "{}", bad);
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = MigrationSet::new(vec![
            create_table("20240101000001_a", "a"),
            create_table("20240101000001_a", "a2"),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::DuplicateMigrationId(ref id) if id == "20240101000001_a"));
    }

    #[test]
    fn test_set_is_sorted() {
        let set = MigrationSet::new(vec![
            create_table("20240101000002_b", "b"),
            create_table("20240101000001_a", "a"),
        ])
        .unwrap();
        let ids: Vec<_> = set.iter().map(Migration::id).collect();
        assert_eq!(ids, ["20240101000001_a", "20240101000002_b"]);
    }

    #[tokio::test]
    async fn test_apply_twice_equals_once() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;
        let set = five_step_set(create_table("20240101000003_c", "c"));

        let first = apply_pending(&db, &set).await.unwrap();
        assert_eq!(first.len(), 5);
        let after_first = load_history(&db).await.unwrap();

        let second = apply_pending(&db, &set).await.unwrap();
        assert!(second.is_empty());
        let after_second = load_history(&db).await.unwrap();

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_resume_after_failed_third_migration() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;

        let broken = five_step_set(Migration::new(
            "20240101000003_c",
            ["CREATE TABLE c (id INTEGER PRIMARY KEY)", "INSERT INTO missing_table VALUES (1)"],
        ));
        let err = apply_pending(&db, &broken).await.unwrap_err();
        match err {
            AppError::PartialMigrationFailure {
                failed,
                last_applied,
                ..
            } => {
                assert_eq!(failed, "20240101000003_c");
                assert_eq!(last_applied.as_deref(), Some("20240101000002_b"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // 失败迁移的事务已回滚，表 c 不存在
        let history = load_history(&db).await.unwrap();
        assert_eq!(history.len(), 2);
        let applied_at_before: Vec<_> = history.iter().map(|r| r.applied_at).collect();

        let fixed = five_step_set(create_table("20240101000003_c", "c"));
        let applied = apply_pending(&db, &fixed).await.unwrap();
        assert_eq!(
            applied,
            ["20240101000003_c", "20240101000004_d", "20240101000005_e"]
        );

        let history = load_history(&db).await.unwrap();
        assert_eq!(history.len(), 5);
        let applied_at_after: Vec<_> = history.iter().take(2).map(|r| r.applied_at).collect();
        assert_eq!(applied_at_before, applied_at_after);
    }

    #[tokio::test]
    async fn test_checksum_drift_detected() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;

        let original = MigrationSet::new(vec![create_table("20240101000001_a", "a")]).unwrap();
        apply_pending(&db, &original).await.unwrap();

        let edited = MigrationSet::new(vec![create_table("20240101000001_a", "a_renamed")]).unwrap();
        let err = apply_pending(&db, &edited).await.unwrap_err();
        assert!(matches!(err, AppError::ChecksumMismatch(ref id) if id == "20240101000001_a"));

        let report = status(&db, &edited).await.unwrap();
        assert_eq!(report.drifted, ["20240101000001_a"]);
    }

    #[tokio::test]
    async fn test_out_of_order_rejected() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;

        let set = MigrationSet::new(vec![create_table("20240101000005_e", "e")]).unwrap();
        apply_pending(&db, &set).await.unwrap();

        let late = MigrationSet::new(vec![
            create_table("20240101000003_c", "c"),
            create_table("20240101000005_e", "e"),
        ])
        .unwrap();
        let err = apply_pending(&db, &late).await.unwrap_err();
        assert!(matches!(err, AppError::OutOfOrderMigration { .. }));
    }

    #[tokio::test]
    async fn test_status_reports_pending() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;

        let partial = MigrationSet::new(vec![create_table("20240101000001_a", "a")]).unwrap();
        apply_pending(&db, &partial).await.unwrap();

        let full = MigrationSet::new(vec![
            create_table("20240101000001_a", "a"),
            create_table("20240101000002_b", "b"),
        ])
        .unwrap();
        let report = status(&db, &full).await.unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.pending, ["20240101000002_b"]);
        assert!(report.drifted.is_empty());
    }

    #[tokio::test]
    async fn test_status_does_not_create_history_table() {
        let dir = TestDir::new();
        let db = tenant_db(&dir).await;

        let set = MigrationSet::new(vec![create_table("20240101000001_a", "a")]).unwrap();
        let report = status(&db, &set).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.pending, ["20240101000001_a"]);

        assert!(!history_table_exists(&db).await.unwrap());
    }
}
