use actix_web::{HttpResponse, http::StatusCode, web};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::storage::ping;
use crate::tenancy::{Orchestrator, TenantStatus};

/// GET /health
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health/ready
/// 控制面可用即就绪；附带失败租户数量便于巡检
pub async fn readiness(
    db: web::Data<Arc<DatabaseConnection>>,
    orchestrator: web::Data<Orchestrator>,
) -> HttpResponse {
    if let Err(e) = ping(&db).await {
        tracing::warn!(error = %e, "Control plane database unreachable");
        return HttpResponse::build(StatusCode::SERVICE_UNAVAILABLE).json(serde_json::json!({
            "status": "not_ready",
            "database": "disconnected",
        }));
    }

    let failed_tenants = match orchestrator.registry().list(Some(TenantStatus::Failed)).await {
        Ok(tenants) => Some(tenants.len()),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count failed tenants");
            None
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ready",
        "database": "connected",
        "failed_tenants": failed_tenants,
    }))
}

/// GET /health/live
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "alive" }))
}
