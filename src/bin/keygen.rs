use anyhow::Result;
use relay_manager::utils::{generate_hex_token, generate_secret};
use uuid::Uuid;

fn main() -> Result<()> {
    println!("========================================");
    println!("Relay Manager Secret Generation Tool");
    println!("========================================");
    println!();

    // token 签名密钥 (URL-safe Base64, 无填充)
    let jwt_key = generate_secret(32);
    // mu 管理端会把它放进查询参数, 用十六进制
    let mu_token = generate_hex_token(16);
    // 新账户可直接使用的 vmess id
    let vmess_id = Uuid::new_v4();

    println!("jwt_key:  {}", jwt_key);
    println!("mu_token: {}", mu_token);
    println!("vmess id: {}", vmess_id);
    println!();
    println!("========================================");
    println!("Usage Instructions:");
    println!("========================================");
    println!();
    println!("1. settings.toml:");
    println!("   [auth]");
    println!("   jwt_key = \"{}\"", jwt_key);
    println!("   mu_token = \"{}\"", mu_token);
    println!();
    println!("2. shadowsocks mu 管理端:");
    println!("   GET /mu/users?key={}", mu_token);
    println!();
    println!("Note: Keep the secrets secure and do not share them!");
    println!();

    Ok(())
}
