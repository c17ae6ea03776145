use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::tenancy::{Orchestrator, ProvisionRequest, Tenant, TenantStatus};

#[derive(Debug, Deserialize)]
pub struct ListTenantsQuery {
    pub status: Option<TenantStatus>,
}

#[derive(Debug, Serialize)]
pub struct ListTenantsResponse {
    pub tenants: Vec<Tenant>,
}

/// POST /api/tenants
/// 受理开通请求，后台执行
pub async fn create_tenant(
    body: web::Json<ProvisionRequest>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let ticket = orchestrator.submit(body.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(ticket))
}

/// GET /api/tenants
pub async fn list_tenants(
    query: web::Query<ListTenantsQuery>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let tenants = orchestrator.registry().list(query.status).await?;
    Ok(HttpResponse::Ok().json(ListTenantsResponse { tenants }))
}

/// GET /api/tenants/{slug}/status
pub async fn tenant_status(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let status = orchestrator.status(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// POST /api/tenants/{slug}/retry
pub async fn retry_tenant(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let ticket = orchestrator.retry(&path.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(ticket))
}

/// POST /api/tenants/{slug}/archive
pub async fn archive_tenant(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let tenant = orchestrator.archive(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(tenant))
}

/// GET /api/tenants/{slug}/migrations
pub async fn tenant_migrations(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, AppError> {
    let report = orchestrator.migration_report(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}
