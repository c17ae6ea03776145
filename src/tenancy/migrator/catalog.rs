//! 租户库迁移目录：核心迁移 + 按模板追加的扩展迁移
//!
//! 模板迁移的 id 一律晚于核心迁移，因此换模板或新增核心迁移都不会产生乱序。

use sea_orm::sea_query::{ColumnDef, Expr, Index, Table};
use sea_orm::{DbBackend, DeriveIden, EntityTrait, Schema, StatementBuilder};

use super::{Migration, MigrationSet};
use crate::errors::AppError;
use crate::storage::entities::{admin_identities, identity_roles, roles};
use crate::tenancy::model::TenantTemplate;

/// 迁移来源
pub trait MigrationCatalog: Send + Sync {
    fn migrations_for(
        &self,
        template: TenantTemplate,
        backend: DbBackend,
    ) -> Result<MigrationSet, AppError>;
}

/// 内置目录
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCatalog;

impl MigrationCatalog for DefaultCatalog {
    fn migrations_for(
        &self,
        template: TenantTemplate,
        backend: DbBackend,
    ) -> Result<MigrationSet, AppError> {
        let mut migrations = core_migrations(backend);
        migrations.extend(match template {
            TenantTemplate::PoliticalParty => political_party_migrations(backend),
            TenantTemplate::Ngo => ngo_migrations(backend),
        });
        MigrationSet::new(migrations)
    }
}

fn sql<S: StatementBuilder>(backend: DbBackend, stmt: &S) -> String {
    backend.build(stmt).sql
}

/// 与实体定义保持一致的建表语句
fn entity_table<E: EntityTrait>(backend: DbBackend, entity: E) -> String {
    let mut stmt = Schema::new(backend).create_table_from_entity(entity);
    stmt.if_not_exists();
    sql(backend, &stmt)
}

#[derive(DeriveIden)]
enum Members {
    Table,
    Id,
    FullName,
    Email,
    Phone,
    Status,
    BranchId,
    JoinedAt,
}

#[derive(DeriveIden)]
enum AuditEvents {
    Table,
    Id,
    Actor,
    Action,
    Detail,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Branches {
    Table,
    Id,
    Name,
    Region,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Programs {
    Table,
    Id,
    Name,
    Description,
    StartsOn,
    CreatedAt,
}

#[derive(DeriveIden)]
enum VolunteerAssignments {
    Table,
    MemberId,
    ProgramId,
    AssignedAt,
}

fn core_migrations(backend: DbBackend) -> Vec<Migration> {
    vec![
        Migration::new(
            "20250101000001_create_admin_identities",
            [entity_table(backend, admin_identities::Entity)],
        ),
        Migration::new(
            "20250101000002_create_roles",
            [entity_table(backend, roles::Entity)],
        ),
        Migration::new(
            "20250101000003_create_identity_roles",
            [entity_table(backend, identity_roles::Entity)],
        ),
        Migration::new(
            "20250101000004_create_members",
            [
                sql(
                    backend,
                    Table::create()
                        .table(Members::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Members::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Members::FullName).string().not_null())
                        .col(ColumnDef::new(Members::Email).string().null())
                        .col(ColumnDef::new(Members::Phone).string().null())
                        .col(
                            ColumnDef::new(Members::Status)
                                .string()
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(Members::JoinedAt)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        ),
                ),
                sql(
                    backend,
                    Index::create()
                        .name("idx_members_email")
                        .table(Members::Table)
                        .col(Members::Email),
                ),
            ],
        ),
        Migration::new(
            "20250101000005_create_audit_events",
            [sql(
                backend,
                Table::create()
                    .table(AuditEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditEvents::Actor).string().null())
                    .col(ColumnDef::new(AuditEvents::Action).string().not_null())
                    .col(ColumnDef::new(AuditEvents::Detail).text().null())
                    .col(
                        ColumnDef::new(AuditEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    ),
            )],
        ),
    ]
}

fn political_party_migrations(backend: DbBackend) -> Vec<Migration> {
    vec![
        Migration::new(
            "20250201000001_create_branches",
            [sql(
                backend,
                Table::create()
                    .table(Branches::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Branches::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Branches::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Branches::Region).string().null())
                    .col(
                        ColumnDef::new(Branches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    ),
            )],
        ),
        Migration::new(
            "20250201000002_add_member_branch",
            [
                sql(
                    backend,
                    Table::alter()
                        .table(Members::Table)
                        .add_column(ColumnDef::new(Members::BranchId).uuid().null()),
                ),
                sql(
                    backend,
                    Index::create()
                        .name("idx_members_branch")
                        .table(Members::Table)
                        .col(Members::BranchId),
                ),
            ],
        ),
    ]
}

fn ngo_migrations(backend: DbBackend) -> Vec<Migration> {
    vec![
        Migration::new(
            "20250301000001_create_programs",
            [sql(
                backend,
                Table::create()
                    .table(Programs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Programs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Programs::Name).string().not_null())
                    .col(ColumnDef::new(Programs::Description).text().null())
                    .col(ColumnDef::new(Programs::StartsOn).date().null())
                    .col(
                        ColumnDef::new(Programs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    ),
            )],
        ),
        Migration::new(
            "20250301000002_create_volunteer_assignments",
            [sql(
                backend,
                Table::create()
                    .table(VolunteerAssignments::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(VolunteerAssignments::MemberId).uuid().not_null())
                    .col(ColumnDef::new(VolunteerAssignments::ProgramId).uuid().not_null())
                    .col(
                        ColumnDef::new(VolunteerAssignments::AssignedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(VolunteerAssignments::MemberId)
                            .col(VolunteerAssignments::ProgramId),
                    ),
            )],
        ),
    ]
}
