//! 开通流程的领域类型

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TenantDriver;
use crate::errors::AppError;
use crate::storage::entities::{provisioning_runs, tenants};

/// 租户生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pending,
    Provisioning,
    Active,
    Failed,
    Archived,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Pending => "pending",
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Failed => "failed",
            TenantStatus::Archived => "archived",
        }
    }

    /// 只允许前进方向的迁移；failed -> provisioning 用于从失败阶段继续
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        use TenantStatus::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Provisioning, Active)
                | (Provisioning, Failed)
                | (Failed, Provisioning)
                | (Failed, Archived)
                | (Active, Archived)
        )
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TenantStatus::Pending),
            "provisioning" => Ok(TenantStatus::Provisioning),
            "active" => Ok(TenantStatus::Active),
            "failed" => Ok(TenantStatus::Failed),
            "archived" => Ok(TenantStatus::Archived),
            other => Err(AppError::Internal(format!("Unknown tenant status: {}", other))),
        }
    }
}

/// 编排器状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStage {
    Pending,
    ProvisioningDb,
    Migrating,
    Seeding,
    Active,
    Failed,
}

impl ProvisioningStage {
    /// 需要实际执行的阶段，按顺序
    pub const WORK: [ProvisioningStage; 3] = [
        ProvisioningStage::ProvisioningDb,
        ProvisioningStage::Migrating,
        ProvisioningStage::Seeding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStage::Pending => "PENDING",
            ProvisioningStage::ProvisioningDb => "PROVISIONING_DB",
            ProvisioningStage::Migrating => "MIGRATING",
            ProvisioningStage::Seeding => "SEEDING",
            ProvisioningStage::Active => "ACTIVE",
            ProvisioningStage::Failed => "FAILED",
        }
    }

    /// `last_completed` 之后第一个待执行的阶段；全部完成时返回 None
    pub fn resume_after(last_completed: Option<ProvisioningStage>) -> Option<ProvisioningStage> {
        match last_completed {
            None | Some(ProvisioningStage::Pending) => Some(ProvisioningStage::ProvisioningDb),
            Some(done) => Self::WORK.iter().copied().find(|stage| *stage > done),
        }
    }
}

impl fmt::Display for ProvisioningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningStage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProvisioningStage::Pending),
            "PROVISIONING_DB" => Ok(ProvisioningStage::ProvisioningDb),
            "MIGRATING" => Ok(ProvisioningStage::Migrating),
            "SEEDING" => Ok(ProvisioningStage::Seeding),
            "ACTIVE" => Ok(ProvisioningStage::Active),
            "FAILED" => Ok(ProvisioningStage::Failed),
            other => Err(AppError::Internal(format!("Unknown provisioning stage: {}", other))),
        }
    }
}

/// 租户模板；模板迁移在核心迁移之后追加
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TenantTemplate {
    #[default]
    PoliticalParty,
    Ngo,
}

impl TenantTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantTemplate::PoliticalParty => "political_party",
            TenantTemplate::Ngo => "ngo",
        }
    }
}

impl FromStr for TenantTemplate {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "political_party" => Ok(TenantTemplate::PoliticalParty),
            "ngo" => Ok(TenantTemplate::Ngo),
            other => Err(AppError::Validation(format!("Unknown tenant template: {}", other))),
        }
    }
}

/// 租户
#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub database_name: String,
    pub template: TenantTemplate,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<tenants::Model> for Tenant {
    type Error = AppError;

    fn try_from(model: tenants::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            slug: model.slug,
            display_name: model.display_name,
            database_name: model.database_name,
            template: model.template.parse()?,
            status: model.status.parse()?,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

/// 租户库连接参数，显式传给每一个租户级调用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub database_name: String,
    pub driver: TenantDriver,
    pub url: String,
    pub max_connections: u32,
}

impl ConnectionConfig {
    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode connection config: {}", e)))
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::Internal(format!("Failed to decode connection config: {}", e)))
    }
}

/// 开通请求
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionRequest {
    pub slug: String,
    pub display_name: String,
    pub admin_email: String,
    #[serde(default)]
    pub template: Option<TenantTemplate>,
}

/// 开通请求的同步返回
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionTicket {
    pub tenant_id: Uuid,
    pub slug: String,
    pub status: TenantStatus,
    pub stage: ProvisioningStage,
}

/// 状态查询结果
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningStatus {
    pub tenant_id: Uuid,
    pub slug: String,
    pub status: TenantStatus,
    pub stage: ProvisioningStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_stage: Option<ProvisioningStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<ProvisioningStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub attempts: i32,
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningStatus {
    pub fn from_parts(tenant: &Tenant, run: Option<&provisioning_runs::Model>) -> Result<Self, AppError> {
        let Some(run) = run else {
            return Ok(Self {
                tenant_id: tenant.id,
                slug: tenant.slug.clone(),
                status: tenant.status,
                stage: ProvisioningStage::Pending,
                last_completed_stage: None,
                failed_stage: None,
                last_error: None,
                attempts: 0,
                updated_at: tenant.updated_at,
            });
        };

        Ok(Self {
            tenant_id: tenant.id,
            slug: tenant.slug.clone(),
            status: tenant.status,
            stage: run.state.parse()?,
            last_completed_stage: run.last_completed_stage.as_deref().map(str::parse).transpose()?,
            failed_stage: run.failed_stage.as_deref().map(str::parse).transpose()?,
            last_error: run.last_error.clone(),
            attempts: run.attempts,
            updated_at: run.updated_at,
        })
    }
}

/// 初始化令牌状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupTokenStatus {
    Pending,
    Used,
    Expired,
    Revoked,
}

impl SetupTokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupTokenStatus::Pending => "pending",
            SetupTokenStatus::Used => "used",
            SetupTokenStatus::Expired => "expired",
            SetupTokenStatus::Revoked => "revoked",
        }
    }
}

impl FromStr for SetupTokenStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SetupTokenStatus::Pending),
            "used" => Ok(SetupTokenStatus::Used),
            "expired" => Ok(SetupTokenStatus::Expired),
            "revoked" => Ok(SetupTokenStatus::Revoked),
            other => Err(AppError::Internal(format!("Unknown token status: {}", other))),
        }
    }
}

/// 租户库管理员状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    Invited,
    Active,
    Disabled,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Invited => "invited",
            IdentityStatus::Active => "active",
            IdentityStatus::Disabled => "disabled",
        }
    }
}

/// 需要播种的管理员信息
#[derive(Debug, Clone)]
pub struct AdminIdentityInfo {
    pub email: String,
}

impl AdminIdentityInfo {
    pub fn new(email: &str) -> Result<Self, AppError> {
        Ok(Self {
            email: normalize_email(email)?,
        })
    }
}

/// 签发的初始化令牌；`raw_token` 只存在于内存中，Debug 输出会隐藏它
#[derive(Clone)]
pub struct IssuedSetupToken {
    pub raw_token: String,
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub identity_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedSetupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedSetupToken")
            .field("raw_token", &"<redacted>")
            .field("token_id", &self.token_id)
            .field("tenant_id", &self.tenant_id)
            .field("identity_id", &self.identity_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ============ 输入校验 ============

/// slug：3-48 位小写字母数字与 '-'，首尾不能是 '-'，不能连续 '--'
pub fn validate_slug(slug: &str) -> Result<(), AppError> {
    let len = slug.len();
    if !(3..=48).contains(&len) {
        return Err(AppError::Validation(
            "slug must be between 3 and 48 characters".into(),
        ));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::Validation(
            "slug may only contain lowercase letters, digits and '-'".into(),
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        return Err(AppError::Validation(
            "slug must not start or end with '-' or contain '--'".into(),
        ));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("display_name must not be empty".into()));
    }
    if trimmed.chars().count() > 128 {
        return Err(AppError::Validation(
            "display_name must be at most 128 characters".into(),
        ));
    }
    Ok(())
}

/// 规范化邮箱（去空白、转小写），只做最基本的格式检查
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid || email.len() > 254 {
        return Err(AppError::Validation(format!("Invalid email address: {}", email)));
    }
    Ok(email)
}

/// 物理库名：`tenant_<slug>`，'-' 替换为 '_'
pub fn database_name_for(slug: &str) -> String {
    format!("tenant_{}", slug.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TenantStatus::*;
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Active));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Provisioning));
        assert!(Active.can_transition_to(Archived));

        assert!(!Pending.can_transition_to(Active));
        assert!(!Active.can_transition_to(Provisioning));
        assert!(!Archived.can_transition_to(Active));
        assert!(!Active.can_transition_to(Failed));
    }

    #[test]
    fn test_resume_after() {
        assert_eq!(
            ProvisioningStage::resume_after(None),
            Some(ProvisioningStage::ProvisioningDb)
        );
        assert_eq!(
            ProvisioningStage::resume_after(Some(ProvisioningStage::ProvisioningDb)),
            Some(ProvisioningStage::Migrating)
        );
        assert_eq!(
            ProvisioningStage::resume_after(Some(ProvisioningStage::Migrating)),
            Some(ProvisioningStage::Seeding)
        );
        assert_eq!(
            ProvisioningStage::resume_after(Some(ProvisioningStage::Seeding)),
            None
        );
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-party-2024").is_ok());
        assert!(validate_slug("ac").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("ac--me").is_err());
        assert!(validate_slug("acme_party").is_err());
    }

    #[test]
    fn test_database_name_for() {
        assert_eq!(database_name_for("acme"), "tenant_acme");
        assert_eq!(database_name_for("acme-north"), "tenant_acme_north");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Admin@Acme.org ").unwrap(), "admin@acme.org");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@b").is_err());
    }

    #[test]
    fn test_issued_token_debug_redacts_raw() {
        let token = IssuedSetupToken {
            raw_token: "super-secret-raw-token".into(),
            token_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            email: "admin@acme.org".into(),
            expires_at: Utc::now(),
        };
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("super-secret-raw-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
