//! SeaORM 实体
//!
//! 控制面：`tenants`、`provisioning_runs`、`provisioning_locks`、`setup_tokens`。
//! 租户库：`schema_migrations`、`admin_identities`、`roles`、`identity_roles`。

pub mod prelude;

pub mod admin_identities;
pub mod identity_roles;
pub mod provisioning_locks;
pub mod provisioning_runs;
pub mod roles;
pub mod schema_migrations;
pub mod setup_tokens;
pub mod tenants;
