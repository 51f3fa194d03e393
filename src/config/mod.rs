use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;
pub use validator::Validator;

use crate::v2ray::Network;

/// 进程级配置, 启动时读取一次, 之后只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub deployment: DeploymentSettings,
    pub auth: AuthSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub accounts: AccountsSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub reload: ReloadSettings,
}

/// 生成 v2ray 配置所需的部署参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSettings {
    /// 对外域名, 用作 WebSocket Host 头
    pub proxy_host: String,
    pub vmess: VmessSettings,
    #[serde(default)]
    pub log: DaemonLogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmessSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub network: Network,
    /// 原样透传给 v2ray 的 tcpSettings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<serde_json::Value>,
    /// 原样透传给 v2ray 的 kcpSettings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kcp: Option<serde_json::Value>,
    #[serde(default)]
    pub web_socket: WebSocketSettings,
    #[serde(default)]
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSettings {
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// 额外请求头, 同名时覆盖默认的 Host
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_ws_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub status: TlsMode,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub cert: CertSettings,
}

/// TLS 终结位置: `in` 由 v2ray 自己处理, `out` 由前置反代处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    In,
    Out,
    #[default]
    Off,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertSettings {
    /// 证书是否可信, 不可信时客户端需 allowInsecure
    #[serde(default)]
    pub trust: bool,
    #[serde(default)]
    pub certificate_file: String,
    #[serde(default)]
    pub key_file: String,
}

/// 写入服务端配置的 v2ray 日志设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLogSettings {
    #[serde(default = "default_access_log")]
    pub access: String,
    #[serde(default = "default_error_log")]
    pub error: String,
    #[serde(default = "default_loglevel")]
    pub level: String,
}

impl Default for DaemonLogSettings {
    fn default() -> Self {
        Self {
            access: default_access_log(),
            error: default_error_log(),
            level: default_loglevel(),
        }
    }
}

fn default_access_log() -> String {
    "/var/log/v2ray/access.log".to_string()
}

fn default_error_log() -> String {
    "/var/log/v2ray/error.log".to_string()
}

fn default_loglevel() -> String {
    "warning".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 签名密钥
    pub jwt_key: String,
    /// mu 接口共享密钥
    pub mu_token: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl() -> u64 {
    6 * 60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsSettings {
    /// 账户 JSON 文件, 变更后原子回写
    #[serde(default = "default_accounts_file")]
    pub file: PathBuf,
}

impl Default for AccountsSettings {
    fn default() -> Self {
        Self {
            file: default_accounts_file(),
        }
    }
}

fn default_accounts_file() -> PathBuf {
    PathBuf::from("accounts.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// v2ray 读取的配置文件
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_secs: u64,
}

impl PipelineSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            output: default_output(),
            write_timeout_secs: default_write_timeout(),
            reload_timeout_secs: default_reload_timeout(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("v2ray.json")
}

fn default_write_timeout() -> u64 {
    10
}

fn default_reload_timeout() -> u64 {
    30
}

/// 守护进程重载方式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ReloadSettings {
    /// 读取 pid 文件并发送信号
    Signal {
        pid_file: PathBuf,
        #[serde(default = "default_signal")]
        signal: String,
    },
    /// 执行外部命令, 退出码 0 视为成功
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for ReloadSettings {
    fn default() -> Self {
        ReloadSettings::Command {
            program: "docker".to_string(),
            args: vec!["restart".to_string(), "v2ray".to_string()],
        }
    }
}

fn default_signal() -> String {
    "HUP".to_string()
}

impl Settings {
    /// 从 TOML 文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        let settings = Self::from_toml(&content)?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;

        // 验证配置
        Validator::validate(&settings)?;

        Ok(settings)
    }
}
