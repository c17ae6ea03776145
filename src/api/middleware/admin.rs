use actix_web::{
    Error,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use std::future::{Ready, ready};
use std::rc::Rc;
use std::sync::Arc;

use crate::errors::AppError;

pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

/// 管理接口中间件
/// 要求请求携带与配置一致的 `X-Admin-Key`
pub struct AdminOnly {
    key_digest: Arc<[u8; 32]>,
}

impl AdminOnly {
    pub fn new(admin_api_key: &str) -> Self {
        Self {
            key_digest: Arc::new(digest(admin_api_key)),
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

impl<S, B> Transform<S, ServiceRequest> for AdminOnly
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminOnlyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminOnlyMiddleware {
            service: Rc::new(service),
            key_digest: self.key_digest.clone(),
        }))
    }
}

pub struct AdminOnlyMiddleware<S> {
    service: Rc<S>,
    key_digest: Arc<[u8; 32]>,
}

impl<S, B> Service<ServiceRequest> for AdminOnlyMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // 比较摘要而不是原文
        let authorized = extract_admin_key(&req)
            .map(|key| digest(&key) == *self.key_digest)
            .unwrap_or(false);

        if !authorized {
            tracing::warn!(path = %req.path(), "Rejected admin request with missing or wrong key");
            return Box::pin(async move { Err(AppError::Unauthorized.into()) });
        }

        let service = self.service.clone();
        Box::pin(async move { service.call(req).await })
    }
}

/// 从请求头中提取管理密钥
fn extract_admin_key(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
