pub mod backend;
mod backends;
pub mod connection;
pub mod entities;
pub mod repository;

#[cfg(test)]
mod backend_tests;

pub use backend::SeaOrmBackend;
pub use connection::{connect, connect_tenant, ping, run_migrations};
pub use repository::{
    NewSetupToken, NewTenant, ProvisioningLockRepository, ProvisioningRunRepository, RunUpdate,
    SetupTokenRepository, TenantRepository,
};
