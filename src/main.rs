use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

use tenant_provisioner::AppError;
use tenant_provisioner::config::AppConfig;
use tenant_provisioner::runtime::{
    StartupContext, listen_for_shutdown, prepare, prepare_server, run_server,
};
use tenant_provisioner::system::install_panic_hook;
use tenant_provisioner::tenancy::{
    Orchestrator, ProvisionRequest, ProvisioningJob, StdoutDelivery, TenantStatus, TenantTemplate,
    sweeper,
};

/// 租户开通与 schema 生命周期管理
#[derive(Debug, Parser)]
#[command(name = "tenantctl", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 启动 HTTP 服务
    Serve,
    /// 前台开通一个租户，原始令牌打印到终端
    Provision {
        slug: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        admin_email: String,
        /// political_party | ngo
        #[arg(long)]
        template: Option<String>,
    },
    /// 查看单个租户状态，省略 slug 时列出全部
    Status {
        slug: Option<String>,
        /// 只列出指定状态
        #[arg(long)]
        filter: Option<String>,
    },
    /// 从上次完成的阶段之后继续
    Retry { slug: String },
    /// 对所有 active 租户执行待应用迁移
    Migrate {
        /// 只查看指定租户的迁移状态，不执行
        #[arg(long)]
        report: Option<String>,
    },
    /// 归档租户并吊销未使用的令牌
    Archive { slug: String },
    /// 把过期的 pending 令牌标记为 expired
    ExpireTokens,
    /// 输出示例配置
    SampleConfig,
}

#[actix_web::main]
async fn main() {
    // 安装 panic hook
    install_panic_hook();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{}", err.format_colored());
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    if let Command::SampleConfig = cli.command {
        println!("{}", AppConfig::generate_sample_config());
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref());

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Provision {
            slug,
            display_name,
            admin_email,
            template,
        } => {
            let template = template
                .as_deref()
                .map(str::parse::<TenantTemplate>)
                .transpose()?;
            let ctx = prepare(config).await?;
            provision(
                &ctx,
                ProvisionRequest {
                    slug,
                    display_name,
                    admin_email,
                    template,
                },
            )
            .await
        }
        Command::Status { slug, filter } => {
            let ctx = prepare(config).await?;
            let orchestrator = ctx.orchestrator(Arc::new(StdoutDelivery));
            match slug {
                Some(slug) => print_json(&orchestrator.status(&slug).await?),
                None => {
                    let filter = filter.as_deref().map(str::parse::<TenantStatus>).transpose()?;
                    print_json(&orchestrator.registry().list(filter).await?)
                }
            }
        }
        Command::Retry { slug } => {
            let ctx = prepare(config).await?;
            let orchestrator = ctx.orchestrator(Arc::new(StdoutDelivery));
            let job = orchestrator.begin_retry(&slug).await?;
            finish_job(&orchestrator, job).await
        }
        Command::Migrate { report } => {
            let ctx = prepare(config).await?;
            let orchestrator = ctx.orchestrator(Arc::new(StdoutDelivery));
            if let Some(slug) = report {
                return print_json(&orchestrator.migration_report(&slug).await?);
            }

            let outcomes = orchestrator.migrate_active_tenants().await?;
            print_json(&outcomes)?;
            match outcomes.iter().find(|o| o.error.is_some()) {
                Some(failed) => Err(AppError::ProvisionFailure(format!(
                    "migration failed for tenant {}: {}",
                    failed.slug,
                    failed.error.as_deref().unwrap_or_default()
                ))),
                None => Ok(()),
            }
        }
        Command::Archive { slug } => {
            let ctx = prepare(config).await?;
            let orchestrator = ctx.orchestrator(Arc::new(StdoutDelivery));
            print_json(&orchestrator.archive(&slug).await?)
        }
        Command::ExpireTokens => {
            let ctx = prepare(config).await?;
            let expired = sweeper::sweep_expired_tokens(&ctx.backend).await?;
            println!("{} {} token(s) expired", "[OK]".green().bold(), expired);
            Ok(())
        }
        Command::SampleConfig => Ok(()),
    }
}

async fn serve(config: AppConfig) -> Result<(), AppError> {
    // 初始化服务器
    let ctx = prepare_server(config).await?;

    tracing::info!("tenantctl server is ready");

    // 启动 HTTP 服务器和优雅关闭监听
    tokio::select! {
        result = run_server(ctx) => {
            result.map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;
        }
        _ = listen_for_shutdown() => {
            tracing::info!("收到关闭信号，正在停止服务器...");
        }
    }

    Ok(())
}

async fn provision(ctx: &StartupContext, request: ProvisionRequest) -> Result<(), AppError> {
    let orchestrator = ctx.orchestrator(Arc::new(StdoutDelivery));
    let job = orchestrator.begin(request).await?;
    finish_job(&orchestrator, job).await
}

/// 前台执行开通任务，失败时在 stderr 报告失败阶段
async fn finish_job(
    orchestrator: &Orchestrator,
    job: ProvisioningJob,
) -> Result<(), AppError> {
    let slug = job.tenant().slug.clone();
    match job.run().await {
        Ok(tenant) => {
            println!(
                "{} tenant {} is {}",
                "[OK]".green().bold(),
                tenant.slug.cyan(),
                tenant.status.as_str().green()
            );
            Ok(())
        }
        Err(err) => {
            if let Ok(status) = orchestrator.status(&slug).await
                && let Some(stage) = status.failed_stage
            {
                eprintln!(
                    "{} tenant {} failed at stage {} after {} attempt(s)",
                    "[FAILED]".red().bold(),
                    slug,
                    stage.as_str().yellow(),
                    status.attempts
                );
            }
            Err(err)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to render output: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}
