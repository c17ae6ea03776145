pub use super::admin_identities::Entity as AdminIdentities;
pub use super::identity_roles::Entity as IdentityRoles;
pub use super::provisioning_locks::Entity as ProvisioningLocks;
pub use super::provisioning_runs::Entity as ProvisioningRuns;
pub use super::roles::Entity as Roles;
pub use super::schema_migrations::Entity as SchemaMigrations;
pub use super::setup_tokens::Entity as SetupTokens;
pub use super::tenants::Entity as Tenants;
