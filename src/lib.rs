pub mod errors;
pub mod config;
pub mod system;
pub mod security;
pub mod storage;
pub mod tenancy;
pub mod api;
pub mod runtime;

// 重新导出常用类型
pub use errors::AppError;
pub use config::AppConfig;
