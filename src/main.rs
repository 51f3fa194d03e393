use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};

use relay_manager::account::{AccountSource, AccountStore};
use relay_manager::api::{make_router, AppState};
use relay_manager::pipeline::{reload, ConfigWriter, Synchronizer};
use relay_manager::token::{Claims, TokenSigner};
use relay_manager::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "settings.toml")]
    config: String,

    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 同步一次配置后启动 HTTP 接口 (默认)
    Serve,
    /// 生成服务端配置并通知守护进程重载, 然后退出
    Sync,
    /// 为账户签发访问 token
    Token {
        /// 账户 id
        account: String,
        /// 签发管理员 token
        #[arg(long)]
        admin: bool,
        /// 有效期 (秒), 默认取配置中的 token_ttl_secs
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    // 优先使用环境变量 RUST_LOG，否则使用命令行参数
    let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone());

    let log_level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("📄 Loading settings from: {}", args.config);
    let settings = Settings::load(&args.config)?;
    info!("✅ Settings loaded successfully");

    let store = Arc::new(AccountStore::load(&settings.accounts.file)?);
    info!(
        accounts = store.len().await,
        file = %settings.accounts.file.display(),
        "账户已加载"
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Token {
            account,
            admin,
            ttl_secs,
        } => issue_token(&settings, &store, account, admin, ttl_secs).await,
        Command::Sync => {
            let synchronizer = build_synchronizer(&settings, store)?;
            let report = synchronizer.sync().await.map_err(|e| {
                error!(error = %e, "配置同步失败");
                e
            })?;
            info!(clients = report.clients, path = %report.path.display(), "🔄 同步完成");
            Ok(())
        }
        Command::Serve => serve(settings, store).await,
    }
}

fn build_synchronizer(settings: &Settings, store: Arc<AccountStore>) -> Result<Synchronizer> {
    let reloader = reload::from_settings(&settings.reload)?;
    info!(reloader = %reloader.describe(), output = %settings.pipeline.output.display(), "重载方式");

    Ok(Synchronizer::new(
        Arc::new(settings.deployment.clone()),
        store,
        ConfigWriter::new(&settings.pipeline.output),
        reloader,
    )
    .with_timeouts(
        settings.pipeline.write_timeout(),
        settings.pipeline.reload_timeout(),
    ))
}

async fn issue_token(
    settings: &Settings,
    store: &AccountStore,
    account: String,
    admin: bool,
    ttl_secs: Option<u64>,
) -> Result<()> {
    if !admin && store.get_account(&account).await?.is_none() {
        bail!("账户不存在: {}", account);
    }

    let ttl = Duration::from_secs(ttl_secs.unwrap_or(settings.auth.token_ttl_secs));
    let token = TokenSigner::new(&settings.auth.jwt_key).encode(Claims::new(account, admin), ttl)?;
    println!("{}", token);
    Ok(())
}

async fn serve(settings: Settings, store: Arc<AccountStore>) -> Result<()> {
    info!("🚀 Starting relay manager");

    let synchronizer = Arc::new(build_synchronizer(&settings, Arc::clone(&store))?);

    // 启动时先同步一次, 失败不阻止接口启动
    if synchronizer.sync_logged().await.is_none() {
        warn!("启动同步未完成, 等待下一次账户变更或手动 /api/sync");
    }

    let state = Arc::new(AppState {
        store,
        deployment: Arc::new(settings.deployment.clone()),
        synchronizer,
        signer: TokenSigner::new(&settings.auth.jwt_key),
        mu_token: settings.auth.mu_token.clone(),
    });

    let listener = TcpListener::bind(&settings.api.listen).await?;
    info!("🌐 API listening on {}", listener.local_addr()?);

    axum::serve(listener, make_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "无法监听 Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("收到退出信号");
}
