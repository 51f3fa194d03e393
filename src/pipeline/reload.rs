//! 通知守护进程重新加载配置
//!
//! 只负责把重载请求送达, 不等待也不检查守护进程重载后的状态.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ReloadSettings;
use crate::utils::{BuildError, ReloadError};

#[async_trait]
pub trait Reloader: Send + Sync {
    async fn signal_reload(&self) -> Result<(), ReloadError>;

    /// 日志里使用的简短描述
    fn describe(&self) -> String;
}

/// 根据配置构造重载器
pub fn from_settings(settings: &ReloadSettings) -> Result<Arc<dyn Reloader>, BuildError> {
    let reloader: Arc<dyn Reloader> = match settings {
        ReloadSettings::Signal { pid_file, signal } => {
            Arc::new(SignalReloader::new(pid_file.clone(), parse_signal(signal)?))
        }
        ReloadSettings::Command { program, args } => {
            Arc::new(CommandReloader::new(program.clone(), args.clone()))
        }
    };
    Ok(reloader)
}

/// 解析信号名, 接受 `HUP` / `SIGHUP` / 数字
pub fn parse_signal(name: &str) -> Result<i32, BuildError> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    let signal = match short {
        "HUP" => libc::SIGHUP,
        "USR1" => libc::SIGUSR1,
        "USR2" => libc::SIGUSR2,
        "TERM" => libc::SIGTERM,
        "INT" => libc::SIGINT,
        other => match other.parse::<i32>() {
            Ok(n) if n > 0 => n,
            _ => return Err(BuildError::UnknownSignal(name.to_string())),
        },
    };
    Ok(signal)
}

/// 读取 pid 文件并向守护进程发送信号
pub struct SignalReloader {
    pid_file: PathBuf,
    signal: i32,
}

impl SignalReloader {
    pub fn new(pid_file: PathBuf, signal: i32) -> Self {
        Self { pid_file, signal }
    }

    async fn read_pid(&self) -> Result<i32, ReloadError> {
        let content = match tokio::fs::read_to_string(&self.pid_file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReloadError::NotRunning(format!(
                    "pid 文件 {} 不存在",
                    self.pid_file.display()
                )))
            }
            Err(e) => return Err(ReloadError::Signal(e)),
        };

        // 0 和负数会把信号发给整个进程组, 必须拒绝
        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(pid),
            _ => Err(ReloadError::InvalidPid {
                path: self.pid_file.clone(),
                content,
            }),
        }
    }
}

#[async_trait]
impl Reloader for SignalReloader {
    async fn signal_reload(&self) -> Result<(), ReloadError> {
        let pid = self.read_pid().await?;
        send_signal(pid, self.signal)?;
        info!(pid, signal = self.signal, "已发送重载信号");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("signal {} -> {}", self.signal, self.pid_file.display())
    }
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: i32) -> Result<(), ReloadError> {
    // SAFETY: kill(2) 不涉及内存访问, pid 已保证为正数
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(ReloadError::NotRunning(format!("进程 {} 不存在", pid)))
    } else {
        Err(ReloadError::Signal(err))
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: i32, _signal: i32) -> Result<(), ReloadError> {
    Err(ReloadError::Unsupported("signal reload"))
}

/// 执行外部命令 (例如 `docker restart v2ray`)
///
/// 超时由调用方控制; 子进程在 future 被丢弃时会被杀掉.
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    async fn signal_reload(&self) -> Result<(), ReloadError> {
        debug!(program = %self.program, args = ?self.args, "执行重载命令");

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ReloadError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(program = %self.program, "重载命令执行成功");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}
