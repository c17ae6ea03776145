use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::AppError;
use crate::tenancy::TokenRedeemer;

#[derive(Deserialize)]
pub struct RedeemRequest {
    pub token: String,
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/setup-tokens/redeem
/// 公开接口：兑换初始化令牌并设置管理员凭据
pub async fn redeem(
    body: web::Json<RedeemRequest>,
    redeemer: web::Data<Arc<TokenRedeemer>>,
) -> Result<HttpResponse, AppError> {
    let RedeemRequest { token, credential } = body.into_inner();
    redeemer.redeem_token(&token, &credential).await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Credential set".to_string(),
    }))
}
