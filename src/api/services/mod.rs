pub mod health;
pub mod setup_token_service;
pub mod tenant_service;

// 健康检查
pub use health::{health_check, liveness, readiness};

// 租户开通
pub use tenant_service::{
    archive_tenant as tenant_archive, create_tenant as tenant_create,
    list_tenants as tenant_list, retry_tenant as tenant_retry, tenant_migrations,
    tenant_status,
};

// 初始化令牌
pub use setup_token_service::redeem as setup_token_redeem;
