use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Account, AccountSource};
use crate::config::Validator;
use crate::pipeline::ConfigWriter;
use crate::utils::{StoreError, WriteError};

/// 内存账户存储, 保持插入顺序; 配置了文件时每次变更都原子回写
pub struct AccountStore {
    accounts: RwLock<Vec<Account>>,
    persist: Option<Arc<ConfigWriter>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(Vec::new()),
            persist: None,
        }
    }

    /// 用给定账户初始化, 同 id 的后者覆盖前者但保留前者的位置
    pub fn with_accounts(accounts: Vec<Account>) -> Result<Self, StoreError> {
        let mut merged: Vec<Account> = Vec::with_capacity(accounts.len());
        for account in accounts {
            Validator::validate_account(&account)?;
            merge(&mut merged, account);
        }
        Ok(Self {
            accounts: RwLock::new(merged),
            persist: None,
        })
    }

    /// 从 JSON 文件加载; 文件不存在时得到空存储, 首次变更时创建
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let accounts: Vec<Account> = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "账户文件不存在, 使用空账户列表");
                Vec::new()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let mut store = Self::with_accounts(accounts)?;
        store.persist = Some(Arc::new(ConfigWriter::new(path)));
        Ok(store)
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn upsert(&self, account: Account) -> Result<(), StoreError> {
        Validator::validate_account(&account)?;
        self.mutate(move |accounts| {
            merge(accounts, account);
            Ok(())
        })
        .await
    }

    /// 启用/停用账户, 返回变更后的账户
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Account, StoreError> {
        self.mutate(|accounts| {
            let account = find_mut(accounts, id)?;
            account.enabled = enabled;
            Ok(account.clone())
        })
        .await
    }

    /// 记录一次流量上报
    pub async fn touch(&self, id: &str, at_millis: u64) -> Result<Account, StoreError> {
        self.mutate(|accounts| {
            let account = find_mut(accounts, id)?;
            account.updated_at = at_millis;
            Ok(account.clone())
        })
        .await
    }

    /// 在副本上修改, 持久化成功后才替换内存状态
    async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Account>) -> Result<T, StoreError>,
    {
        let mut guard = self.accounts.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;

        if let Some(writer) = &self.persist {
            let writer = Arc::clone(writer);
            let snapshot = next.clone();
            tokio::task::spawn_blocking(move || writer.write(&snapshot))
                .await
                .map_err(|e| WriteError::Aborted(e.to_string()))??;
            debug!(path = %self.persist_path_display(), "账户文件已回写");
        }

        *guard = next;
        Ok(out)
    }

    fn persist_path_display(&self) -> String {
        self.persist
            .as_ref()
            .map(|w| w.path().display().to_string())
            .unwrap_or_default()
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountSource for AccountStore {
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.accounts.read().await.clone())
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.iter().find(|a| a.id == id).cloned())
    }
}

fn merge(accounts: &mut Vec<Account>, account: Account) {
    match accounts.iter_mut().find(|a| a.id == account.id) {
        Some(existing) => *existing = account,
        None => accounts.push(account),
    }
}

fn find_mut<'a>(accounts: &'a mut [Account], id: &str) -> Result<&'a mut Account, StoreError> {
    accounts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}
