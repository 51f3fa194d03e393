use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 部署配置错误 (构建前由 Validator 检出)
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("配置错误: {field} 不能为空")]
    Empty { field: &'static str },

    #[error("配置错误: {field} 端口不能为 0")]
    ZeroPort { field: &'static str },

    #[error("配置错误: 开启 TLS 时必须提供 {field}")]
    MissingCertificate { field: &'static str },

    #[error("配置错误: WebSocket path 必须以 '/' 开头: {0}")]
    InvalidWebSocketPath(String),

    #[error("配置错误: 未知信号 {0}")]
    UnknownSignal(String),

    #[error("账户 {account} 无效: {reason}")]
    InvalidAccount { account: String, reason: String },
}

/// 配置文件写入错误
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("JSON 序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("写入 {} 失败: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("写入超时 ({0:?})")]
    TimedOut(Duration),

    #[error("写入任务中断: {0}")]
    Aborted(String),
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }
}

/// 守护进程重载错误
#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("守护进程未运行: {0}")]
    NotRunning(String),

    #[error("pid 文件 {} 内容无效: {content:?}", .path.display())]
    InvalidPid { path: PathBuf, content: String },

    #[error("信号发送失败: {0}")]
    Signal(#[source] io::Error),

    #[error("无法启动重载命令 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("重载命令 {program} 退出码 {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("重载超时 ({0:?})")]
    TimedOut(Duration),

    #[error("当前平台不支持: {0}")]
    Unsupported(&'static str),
}

/// 账户存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("账户不存在: {0}")]
    NotFound(String),

    #[error("读取账户文件 {} 失败: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("账户文件解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] BuildError),

    #[error("账户持久化失败: {0}")]
    Persist(#[from] WriteError),
}

/// 同步流水线错误
///
/// 写入失败与重载失败必须可区分: 重载失败时新配置已经落盘.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("读取账户快照失败: {0}")]
    Store(#[from] StoreError),

    #[error("配置写入失败: {0}")]
    Write(#[from] WriteError),

    #[error("配置已更新, 但守护进程重载失败: {0}")]
    Reload(#[from] ReloadError),
}

/// Token 签发/校验错误
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token 格式错误")]
    Malformed,

    #[error("不支持的签名算法: {0}")]
    UnsupportedAlgorithm(String),

    #[error("签名无效")]
    BadSignature,

    #[error("token 已过期")]
    Expired,

    #[error("token 签发失败: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}
