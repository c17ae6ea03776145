use actix_web::{App, HttpServer, middleware, web};
use std::sync::Arc;

use crate::api::{middleware as app_middleware, services};
use crate::runtime::startup::StartupContext;
use crate::tenancy::{OutboxDelivery, sweeper};

pub async fn run_server(ctx: StartupContext) -> std::io::Result<()> {
    let config = &ctx.config;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // 服务端模式下令牌写入 outbox 目录
    let delivery = Arc::new(OutboxDelivery::new(config.setup_token.outbox_dir.clone()));
    let orchestrator = ctx.orchestrator(delivery);
    let redeemer = Arc::new(ctx.redeemer());
    let admin_api_key = config.server.admin_api_key.clone();

    let sweeper = sweeper::spawn_token_sweeper(
        ctx.backend.clone(),
        config.setup_token.sweep_interval_secs,
    );

    tracing::info!("Starting HTTP server on {}", bind_addr);

    let db = ctx.db.clone();
    let result = HttpServer::new(move || {
        App::new()
            // 共享状态
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(web::Data::new(redeemer.clone()))
            // 中间件
            .wrap(middleware::Logger::default())
            .wrap(middleware::DefaultHeaders::new().add(("X-Version", env!("CARGO_PKG_VERSION"))))
            // 健康检查端点（无需认证）
            .service(
                web::scope("/health")
                    .route("", web::get().to(services::health_check))
                    .route("/ready", web::get().to(services::readiness))
                    .route("/live", web::get().to(services::liveness)),
            )
            // 令牌兑换（公开）
            .service(
                web::scope("/api/setup-tokens")
                    .route("/redeem", web::post().to(services::setup_token_redeem)),
            )
            // 租户管理 API（需要管理密钥）
            .service(
                web::scope("/api/tenants")
                    .wrap(app_middleware::AdminOnly::new(&admin_api_key))
                    .route("", web::post().to(services::tenant_create))
                    .route("", web::get().to(services::tenant_list))
                    .route("/{slug}/status", web::get().to(services::tenant_status))
                    .route("/{slug}/retry", web::post().to(services::tenant_retry))
                    .route("/{slug}/archive", web::post().to(services::tenant_archive))
                    .route(
                        "/{slug}/migrations",
                        web::get().to(services::tenant_migrations),
                    ),
            )
    })
    .bind(&bind_addr)?
    .run()
    .await;

    sweeper.abort();
    result
}
