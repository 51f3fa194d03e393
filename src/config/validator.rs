use uuid::Uuid;

use super::{DeploymentSettings, ReloadSettings, Settings, TlsMode};
use crate::account::Account;
use crate::pipeline::reload::parse_signal;
use crate::utils::BuildError;
use crate::v2ray::Network;

pub struct Validator;

impl Validator {
    /// 验证配置的有效性
    pub fn validate(settings: &Settings) -> Result<(), BuildError> {
        Self::validate_deployment(&settings.deployment)?;

        // 验证密钥
        if settings.auth.jwt_key.is_empty() {
            return Err(BuildError::Empty {
                field: "auth.jwt_key",
            });
        }
        if settings.auth.mu_token.is_empty() {
            return Err(BuildError::Empty {
                field: "auth.mu_token",
            });
        }

        if settings.pipeline.output.as_os_str().is_empty() {
            return Err(BuildError::Empty {
                field: "pipeline.output",
            });
        }

        Self::validate_reload(&settings.reload)
    }

    pub fn validate_deployment(deployment: &DeploymentSettings) -> Result<(), BuildError> {
        if deployment.proxy_host.is_empty() {
            return Err(BuildError::Empty {
                field: "deployment.proxy_host",
            });
        }

        let vmess = &deployment.vmess;
        if vmess.host.is_empty() {
            return Err(BuildError::Empty {
                field: "deployment.vmess.host",
            });
        }
        if vmess.port == 0 {
            return Err(BuildError::ZeroPort {
                field: "deployment.vmess.port",
            });
        }

        if vmess.network == Network::Ws && !vmess.web_socket.path.starts_with('/') {
            return Err(BuildError::InvalidWebSocketPath(
                vmess.web_socket.path.clone(),
            ));
        }

        // v2ray 自己终结 TLS 时证书必须齐全
        if vmess.tls.status == TlsMode::In {
            if vmess.tls.cert.certificate_file.is_empty() {
                return Err(BuildError::MissingCertificate {
                    field: "deployment.vmess.tls.cert.certificate_file",
                });
            }
            if vmess.tls.cert.key_file.is_empty() {
                return Err(BuildError::MissingCertificate {
                    field: "deployment.vmess.tls.cert.key_file",
                });
            }
        }

        Ok(())
    }

    fn validate_reload(reload: &ReloadSettings) -> Result<(), BuildError> {
        match reload {
            ReloadSettings::Signal { pid_file, signal } => {
                if pid_file.as_os_str().is_empty() {
                    return Err(BuildError::Empty {
                        field: "reload.pid_file",
                    });
                }
                parse_signal(signal)?;
            }
            ReloadSettings::Command { program, .. } => {
                if program.is_empty() {
                    return Err(BuildError::Empty {
                        field: "reload.program",
                    });
                }
            }
        }
        Ok(())
    }

    /// 验证单个账户, 账户文件加载与 upsert 时调用
    pub fn validate_account(account: &Account) -> Result<(), BuildError> {
        let invalid = |reason: String| BuildError::InvalidAccount {
            account: account.id.clone(),
            reason,
        };

        if account.id.is_empty() {
            return Err(invalid("id 不能为空".to_string()));
        }

        // 验证 vmess UUID
        if Uuid::parse_str(&account.vmess.id).is_err() {
            return Err(invalid(format!("vmess UUID 格式无效: {}", account.vmess.id)));
        }

        if account.shadowsocks.port == 0 {
            return Err(invalid("端口不能为 0".to_string()));
        }

        Ok(())
    }
}
