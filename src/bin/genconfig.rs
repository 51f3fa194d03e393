use anyhow::{anyhow, Result};
use clap::Parser;
use relay_manager::account::{AccountSource, AccountStore};
use relay_manager::v2ray::build_client_config;
use relay_manager::Settings;

/// 为账户生成客户端配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "settings.toml")]
    config: String,

    /// 账户 id
    account: String,

    /// 输出文件, 省略时打印到标准输出
    #[arg(short, long)]
    output: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    let store = AccountStore::load(&settings.accounts.file)?;
    let account = store
        .get_account(&args.account)
        .await?
        .ok_or_else(|| anyhow!("账户不存在: {}", args.account))?;

    if !account.enabled {
        eprintln!("注意: 账户 {} 已停用, 服务端会拒绝该配置的连接", account.id);
    }

    let config = build_client_config(&account, &settings.deployment);
    let content = serde_json::to_string_pretty(&config)?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, content)?;
            eprintln!("客户端配置已写入 {}", path);
        }
        None => println!("{}", content),
    }

    Ok(())
}
