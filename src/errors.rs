use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

/// 错误分类，决定是否重试以及对外的退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 输入有误，不重试
    Validation,
    /// slug 重复或已有进行中的开通流程，不重试
    Conflict,
    /// 连接 / 权限 / 超时，带退避重试
    TransientInfra,
    /// 迁移部分失败，从最后成功的迁移继续
    PartialMigration,
    /// 令牌无效 / 过期 / 已使用，返回给调用方
    Token,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    // 数据库错误
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    // 校验错误
    #[error("Validation error: {0}")]
    Validation(String),

    // 冲突
    #[error("Tenant slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Tenant {0} is already being provisioned")]
    AlreadyProvisioning(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // 基础设施错误（可重试）
    #[error("Provisioning failed: {0}")]
    ProvisionFailure(String),

    #[error("Stage {stage} timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    // 迁移错误
    #[error("Duplicate migration id: {0}")]
    DuplicateMigrationId(String),

    #[error("Invalid migration id: {0}")]
    InvalidMigrationId(String),

    #[error("Checksum mismatch for applied migration {0}")]
    ChecksumMismatch(String),

    #[error("Migration {pending} is older than last applied migration {applied}")]
    OutOfOrderMigration { pending: String, applied: String },

    #[error(
        "Migration {failed} failed (last applied: {}): {reason}",
        last_applied.as_deref().unwrap_or("none")
    )]
    PartialMigrationFailure {
        failed: String,
        last_applied: Option<String>,
        reason: String,
    },

    // 令牌错误
    #[error("Invalid setup token")]
    TokenInvalid,

    #[error("Setup token expired")]
    TokenExpired,

    #[error("Setup token already used")]
    TokenAlreadyUsed,

    // 通用错误
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// 错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_)
            | AppError::InvalidStateTransition { .. }
            | AppError::DuplicateMigrationId(_)
            | AppError::InvalidMigrationId(_)
            | AppError::ChecksumMismatch(_)
            | AppError::OutOfOrderMigration { .. }
            | AppError::NotFound
            | AppError::Unauthorized
            | AppError::Config(_) => ErrorKind::Validation,

            AppError::DuplicateSlug(_) | AppError::AlreadyProvisioning(_) => ErrorKind::Conflict,

            AppError::Database(e) if is_connectivity_error(e) => ErrorKind::TransientInfra,
            AppError::ProvisionFailure(_) | AppError::StageTimeout { .. } => {
                ErrorKind::TransientInfra
            }

            AppError::PartialMigrationFailure { .. } => ErrorKind::PartialMigration,

            AppError::TokenInvalid | AppError::TokenExpired | AppError::TokenAlreadyUsed => {
                ErrorKind::Token
            }

            AppError::Database(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 编排器是否应当重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientInfra | ErrorKind::PartialMigration
        )
    }

    /// CLI 退出码：0 成功，1 校验，2 冲突，3 下游失败
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Token => 1,
            ErrorKind::Conflict => 2,
            ErrorKind::TransientInfra | ErrorKind::PartialMigration | ErrorKind::Internal => 3,
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "E001",
            AppError::Validation(_) => "E002",
            AppError::DuplicateSlug(_) => "E003",
            AppError::AlreadyProvisioning(_) => "E004",
            AppError::InvalidStateTransition { .. } => "E005",
            AppError::ProvisionFailure(_) => "E006",
            AppError::StageTimeout { .. } => "E007",
            AppError::DuplicateMigrationId(_) => "E008",
            AppError::InvalidMigrationId(_) => "E009",
            AppError::ChecksumMismatch(_) => "E010",
            AppError::OutOfOrderMigration { .. } => "E011",
            AppError::PartialMigrationFailure { .. } => "E012",
            AppError::TokenInvalid => "E013",
            AppError::TokenExpired => "E014",
            AppError::TokenAlreadyUsed => "E015",
            AppError::NotFound => "E016",
            AppError::Unauthorized => "E017",
            AppError::Internal(_) => "E018",
            AppError::Config(_) => "E019",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database Error",
            AppError::Validation(_) => "Validation Error",
            AppError::DuplicateSlug(_) => "Duplicate Slug",
            AppError::AlreadyProvisioning(_) => "Already Provisioning",
            AppError::InvalidStateTransition { .. } => "Invalid State Transition",
            AppError::ProvisionFailure(_) => "Provision Failure",
            AppError::StageTimeout { .. } => "Stage Timeout",
            AppError::DuplicateMigrationId(_) => "Duplicate Migration Id",
            AppError::InvalidMigrationId(_) => "Invalid Migration Id",
            AppError::ChecksumMismatch(_) => "Checksum Mismatch",
            AppError::OutOfOrderMigration { .. } => "Out Of Order Migration",
            AppError::PartialMigrationFailure { .. } => "Partial Migration Failure",
            AppError::TokenInvalid => "Token Invalid",
            AppError::TokenExpired => "Token Expired",
            AppError::TokenAlreadyUsed => "Token Already Used",
            AppError::NotFound => "Not Found",
            AppError::Unauthorized => "Unauthorized",
            AppError::Internal(_) => "Internal Error",
            AppError::Config(_) => "Configuration Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// 格式化为彩色输出（用于终端）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.code(),
            self.error_type(),
            self.message()
        )
    }
}

/// 判断数据库错误是否属于连接层面的瞬时错误
fn is_connectivity_error(err: &sea_orm::DbErr) -> bool {
    match err {
        sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => true,
        other => {
            let msg = other.to_string().to_lowercase();
            msg.contains("connection refused")
                || msg.contains("connection reset")
                || msg.contains("database is locked")
                || msg.contains("timed out")
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,

            AppError::NotFound => StatusCode::NOT_FOUND,

            AppError::Validation(_)
            | AppError::InvalidMigrationId(_)
            | AppError::DuplicateMigrationId(_)
            | AppError::TokenInvalid => StatusCode::BAD_REQUEST,

            AppError::TokenExpired => StatusCode::GONE,

            AppError::DuplicateSlug(_)
            | AppError::AlreadyProvisioning(_)
            | AppError::InvalidStateTransition { .. }
            | AppError::TokenAlreadyUsed
            | AppError::ChecksumMismatch(_)
            | AppError::OutOfOrderMigration { .. } => StatusCode::CONFLICT,

            AppError::ProvisionFailure(_)
            | AppError::StageTimeout { .. }
            | AppError::PartialMigrationFailure { .. } => StatusCode::BAD_GATEWAY,

            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            AppError::Validation(_)
            | AppError::InvalidMigrationId(_)
            | AppError::DuplicateMigrationId(_) => "validation_error",
            AppError::DuplicateSlug(_) => "duplicate_slug",
            AppError::AlreadyProvisioning(_) => "already_provisioning",
            AppError::InvalidStateTransition { .. } => "invalid_state_transition",
            AppError::TokenInvalid => "token_invalid",
            AppError::TokenExpired => "token_expired",
            AppError::TokenAlreadyUsed => "token_already_used",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::ProvisionFailure(_)
            | AppError::StageTimeout { .. }
            | AppError::PartialMigrationFailure { .. } => "downstream_failure",
            _ => "internal_error",
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_type.to_string(),
            code: self.code(),
            message: self.to_string(),
        })
    }
}
