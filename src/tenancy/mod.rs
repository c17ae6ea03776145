//! 租户开通：注册表、建库、迁移、初始化数据与编排

pub mod delivery;
pub mod migrator;
mod model;
pub mod orchestrator;
pub mod provisioner;
pub mod redeem;
pub mod registry;
pub mod seeder;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;

pub use delivery::{ChannelDelivery, OutboxDelivery, StdoutDelivery, TokenDelivery};
pub use migrator::{Migration, MigrationReport, MigrationSet, apply_pending};
pub use model::*;
pub use orchestrator::{Orchestrator, ProvisioningJob, TenantMigrationOutcome};
pub use provisioner::{DatabaseProvisioner, SqlProvisioner};
pub use redeem::TokenRedeemer;
pub use registry::TenantRegistry;
pub use seeder::BootstrapSeeder;
