//! 账户模型与只读数据源

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod store;

pub use store::AccountStore;

use crate::utils::StoreError;

/// 代理服务用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub vmess: VmessCredential,
    pub shadowsocks: ShadowsocksCredential,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最近一次流量上报时间 (Unix 毫秒)
    #[serde(default)]
    pub updated_at: u64,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessCredential {
    pub id: String, // UUID
    #[serde(default)]
    pub alter_id: u16,
}

/// mu 接口下发给 shadowsocks 管理端的凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksCredential {
    pub password: String,
    pub method: String,
    pub port: u16,
}

/// 账户快照来源, ConfigBuilder 唯一的读依赖
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// 按存储顺序返回当前全部账户的快照
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError>;
}
