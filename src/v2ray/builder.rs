//! 账户 + 部署参数 → v2ray 配置文档
//!
//! 纯函数, 不做 I/O. 服务端文档只包含已启用账户; 客户端文档不检查启用状态,
//! 停用账户依然能拿到客户端配置, 由服务端拒绝连接.

use std::collections::BTreeMap;

use super::{
    Certificate, Client, ConfigDocument, Inbound, InboundSettings, LogConfig, MuxConfig, Outbound,
    OutboundSettings, Protocol, RoutingPolicy, Security, StreamSettings, TlsSettings, VnextServer,
    WsSettings,
};
use crate::account::Account;
use crate::config::{DeploymentSettings, TlsMode};

/// 客户端本地 socks 监听
const CLIENT_SOCKS_LISTEN: &str = "127.0.0.1";
const CLIENT_SOCKS_PORT: u16 = 1080;
const CLIENT_LOGLEVEL: &str = "warning";
const MUX_CONCURRENCY: u16 = 8;

#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder<'a> {
    deployment: &'a DeploymentSettings,
    client_policy: RoutingPolicy,
    server_policy: RoutingPolicy,
}

impl<'a> ConfigBuilder<'a> {
    pub fn new(deployment: &'a DeploymentSettings) -> Self {
        Self::with_policies(deployment, RoutingPolicy::client(), RoutingPolicy::server())
    }

    pub fn with_policies(
        deployment: &'a DeploymentSettings,
        client_policy: RoutingPolicy,
        server_policy: RoutingPolicy,
    ) -> Self {
        Self {
            deployment,
            client_policy,
            server_policy,
        }
    }

    /// 生成指向固定远端的客户端配置
    pub fn client_config(&self, account: &Account) -> ConfigDocument {
        let vmess = &self.deployment.vmess;

        let outbound = Outbound {
            protocol: Protocol::Vmess,
            settings: OutboundSettings {
                vnext: Some(vec![VnextServer {
                    address: vmess.host.clone(),
                    port: vmess.port,
                    users: vec![Client {
                        email: None,
                        id: account.vmess.id.clone(),
                        alter_id: account.vmess.alter_id,
                    }],
                }]),
            },
            tag: None,
            mux: Some(MuxConfig {
                enabled: true,
                concurrency: MUX_CONCURRENCY,
            }),
            stream_settings: Some(self.stream_settings()),
        };

        ConfigDocument {
            log: LogConfig {
                access: None,
                error: None,
                loglevel: CLIENT_LOGLEVEL.to_string(),
            },
            inbound: Inbound {
                listen: Some(CLIENT_SOCKS_LISTEN.to_string()),
                port: CLIENT_SOCKS_PORT,
                protocol: Protocol::Socks,
                settings: InboundSettings {
                    auth: Some("noauth".to_string()),
                    udp: Some(true),
                    ip: Some(CLIENT_SOCKS_LISTEN.to_string()),
                    clients: None,
                },
                stream_settings: None,
            },
            outbound,
            inbound_detour: None,
            outbound_detour: vec![Outbound::bare(Protocol::Freedom, Some("direct"))],
            routing: self.client_policy.to_routing_config(),
        }
    }

    /// 生成服务端配置, 客户端列表按快照顺序只保留已启用账户
    pub fn server_config(&self, accounts: &[Account]) -> ConfigDocument {
        let deployment = self.deployment;

        let clients: Vec<Client> = accounts
            .iter()
            .filter(|a| a.enabled)
            .map(|a| Client {
                email: Some(a.email.clone()),
                id: a.vmess.id.clone(),
                alter_id: a.vmess.alter_id,
            })
            .collect();

        ConfigDocument {
            log: LogConfig {
                access: Some(deployment.log.access.clone()),
                error: Some(deployment.log.error.clone()),
                loglevel: deployment.log.level.clone(),
            },
            inbound: Inbound {
                listen: None,
                port: deployment.vmess.port,
                protocol: Protocol::Vmess,
                settings: InboundSettings {
                    clients: Some(clients),
                    ..InboundSettings::default()
                },
                stream_settings: Some(self.stream_settings()),
            },
            outbound: Outbound::bare(Protocol::Freedom, None),
            inbound_detour: Some(Vec::new()),
            outbound_detour: vec![Outbound::bare(Protocol::Blackhole, Some("blocked"))],
            routing: self.server_policy.to_routing_config(),
        }
    }

    /// 客户端与服务端共用的传输层设置
    fn stream_settings(&self) -> StreamSettings {
        let deployment = self.deployment;
        let vmess = &deployment.vmess;

        let mut headers = BTreeMap::new();
        headers.insert("Host".to_string(), deployment.proxy_host.clone());
        for (name, value) in &vmess.web_socket.headers {
            headers.insert(name.clone(), value.clone());
        }

        StreamSettings {
            network: vmess.network,
            tcp_settings: vmess.tcp.clone(),
            kcp_settings: vmess.kcp.clone(),
            ws_settings: WsSettings {
                path: vmess.web_socket.path.clone(),
                headers,
            },
            security: if vmess.tls.status == TlsMode::In {
                Security::Tls
            } else {
                Security::None
            },
            tls_settings: TlsSettings {
                server_name: vmess.tls.server.clone(),
                allow_insecure: !vmess.tls.cert.trust,
                certificates: vec![Certificate {
                    certificate_file: vmess.tls.cert.certificate_file.clone(),
                    key_file: vmess.tls.cert.key_file.clone(),
                }],
            },
        }
    }
}

pub fn build_client_config(account: &Account, deployment: &DeploymentSettings) -> ConfigDocument {
    ConfigBuilder::new(deployment).client_config(account)
}

pub fn build_server_config(accounts: &[Account], deployment: &DeploymentSettings) -> ConfigDocument {
    ConfigBuilder::new(deployment).server_config(accounts)
}
