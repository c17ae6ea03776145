mod loader;
mod structs;

pub use structs::{
    AppConfig, DatabaseConfig, LogConfig, ProvisioningConfig, ServerConfig, SetupTokenConfig,
    TenantDatabaseConfig, TenantDriver,
};
