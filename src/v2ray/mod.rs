//! v2ray 配置文档模型
//!
//! 客户端与服务端共用同一种文档格式 (旧版单 inbound/outbound 加 detour 的写法),
//! 只是内容不同. 文档每次同步都重新生成, 不做增量修改.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod builder;
pub mod routing;

pub use builder::{build_client_config, build_server_config, ConfigBuilder};
pub use routing::RoutingPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub log: LogConfig,
    pub inbound: Inbound,
    pub outbound: Outbound,
    #[serde(rename = "inboundDetour", skip_serializing_if = "Option::is_none")]
    pub inbound_detour: Option<Vec<Inbound>>,
    #[serde(rename = "outboundDetour", default)]
    pub outbound_detour: Vec<Outbound>,
    pub routing: RoutingConfig,
}

impl ConfigDocument {
    /// 入站允许的客户端列表 (客户端文档为空)
    pub fn clients(&self) -> &[Client] {
        self.inbound.settings.clients.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub loglevel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
    pub settings: InboundSettings,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Socks,
    Freedom,
    Blackhole,
}

/// socks 入站用 auth/udp/ip, vmess 入站用 clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<Client>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub id: String, // UUID
    #[serde(rename = "alterId")]
    pub alter_id: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub protocol: Protocol,
    pub settings: OutboundSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mux: Option<MuxConfig>,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<StreamSettings>,
}

impl Outbound {
    /// 不带参数的出站 (freedom / blackhole)
    pub fn bare(protocol: Protocol, tag: Option<&str>) -> Self {
        Self {
            protocol,
            settings: OutboundSettings::default(),
            tag: tag.map(str::to_string),
            mux: None,
            stream_settings: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnext: Option<Vec<VnextServer>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VnextServer {
    pub address: String,
    pub port: u16,
    pub users: Vec<Client>,
}

/// 多路复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    pub enabled: bool,
    pub concurrency: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub network: Network,
    #[serde(rename = "tcpSettings", skip_serializing_if = "Option::is_none")]
    pub tcp_settings: Option<serde_json::Value>,
    #[serde(rename = "kcpSettings", skip_serializing_if = "Option::is_none")]
    pub kcp_settings: Option<serde_json::Value>,
    #[serde(rename = "wsSettings")]
    pub ws_settings: WsSettings,
    pub security: Security,
    #[serde(rename = "tlsSettings")]
    pub tls_settings: TlsSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Kcp,
    Ws,
    Http,
    Domainsocket,
    Quic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    None,
    Tls,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsSettings {
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(rename = "serverName")]
    pub server_name: String,
    #[serde(rename = "allowInsecure")]
    pub allow_insecure: bool,
    pub certificates: Vec<Certificate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(rename = "certificateFile")]
    pub certificate_file: String,
    #[serde(rename = "keyFile")]
    pub key_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub strategy: String,
    pub settings: RoutingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub rules: Vec<RoutingRule>,
}

/// 路由规则, 按顺序匹配, 首个命中生效
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Vec<String>>,
    #[serde(rename = "outboundTag")]
    pub outbound_tag: OutboundTag,
}

/// `field` 为显式匹配条件, 其余为 v2ray 内置的地区分类器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Field,
    ChinaSites,
    ChinaIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundTag {
    Direct,
    Blocked,
}
