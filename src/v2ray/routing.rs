//! 静态路由策略
//!
//! 客户端与服务端是两套固定规则, 与账户无关, 进程内只构建一次.
//! 规则按顺序匹配, 首个命中生效, 所以顺序本身就是策略的一部分:
//! 保留地址段必须作为一条规则整体出现, 地区分类器排在显式端口/域名/IP 规则之后.

use once_cell::sync::Lazy;

use super::{OutboundTag, RoutingConfig, RoutingRule, RoutingSettings, RuleType};

/// 私有/保留地址段 (IPv4 在前, IPv6 在后)
pub const RESERVED_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// 客户端直连的端口段: 除 53/80/443 以外的端口都不走代理
const DIRECT_PORT_BANDS: &[&str] = &["54-79", "81-442", "444-65535"];

const DIRECT_DOMAINS: &[&str] = &["gc.kis.scr.kaspersky-labs.com"];

static CLIENT_RULES: Lazy<Vec<RoutingRule>> = Lazy::new(|| {
    let mut rules: Vec<RoutingRule> = DIRECT_PORT_BANDS
        .iter()
        .map(|band| RoutingRule {
            port: Some(band.to_string()),
            ..field(OutboundTag::Direct)
        })
        .collect();

    rules.push(RoutingRule {
        domain: Some(to_owned(DIRECT_DOMAINS)),
        ..field(OutboundTag::Direct)
    });
    rules.push(classifier(RuleType::ChinaSites, OutboundTag::Direct));
    rules.push(reserved_ranges(OutboundTag::Direct));
    rules.push(classifier(RuleType::ChinaIp, OutboundTag::Direct));
    rules
});

static SERVER_RULES: Lazy<Vec<RoutingRule>> =
    Lazy::new(|| vec![reserved_ranges(OutboundTag::Blocked)]);

/// 注入到 ConfigBuilder 的不可变规则集
#[derive(Debug, Clone, Copy)]
pub struct RoutingPolicy {
    rules: &'static [RoutingRule],
}

impl RoutingPolicy {
    /// 客户端策略: 本地与常见国内流量直连
    pub fn client() -> Self {
        Self {
            rules: CLIENT_RULES.as_slice(),
        }
    }

    /// 服务端策略: 屏蔽访问内网/保留地址
    pub fn server() -> Self {
        Self {
            rules: SERVER_RULES.as_slice(),
        }
    }

    pub fn rules(&self) -> &'static [RoutingRule] {
        self.rules
    }

    pub fn to_routing_config(&self) -> RoutingConfig {
        RoutingConfig {
            strategy: "rules".to_string(),
            settings: RoutingSettings {
                rules: self.rules.to_vec(),
            },
        }
    }
}

fn field(outbound_tag: OutboundTag) -> RoutingRule {
    RoutingRule {
        rule_type: RuleType::Field,
        port: None,
        domain: None,
        ip: None,
        outbound_tag,
    }
}

fn classifier(rule_type: RuleType, outbound_tag: OutboundTag) -> RoutingRule {
    RoutingRule {
        rule_type,
        ..field(outbound_tag)
    }
}

fn reserved_ranges(outbound_tag: OutboundTag) -> RoutingRule {
    RoutingRule {
        ip: Some(to_owned(RESERVED_RANGES)),
        ..field(outbound_tag)
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
