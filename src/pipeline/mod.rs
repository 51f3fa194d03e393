//! 配置同步流水线
//!
//! ```text
//! AccountSource ──快照──▶ build_server_config ──▶ ConfigWriter ──▶ Reloader
//!                          (+ RoutingPolicy)       (原子替换)       (送达即成功)
//! ```
//!
//! 状态: `Idle → Building → Written → Reloaded`, 或 `Failed(Write)` / `Failed(Reload)`.
//! 不自动重试也不回滚, 下一次调用重新从 Idle 开始. 写入失败时不会触发重载;
//! 重载失败时新配置已经落盘.
//!
//! 写入超时后阻塞线程上的写入仍会继续, 可能稍后才完成替换. 此时状态保持 `Failed(Write)`,
//! 但 [`Synchronizer::needs_resync`] 变为 true, 直到下一次同步成功重载.

pub mod reload;
pub mod writer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::account::AccountSource;
use crate::config::DeploymentSettings;
use crate::utils::{ReloadError, SyncError, WriteError};
use crate::v2ray::build_server_config;

pub use reload::{CommandReloader, Reloader, SignalReloader};
pub use writer::{ConfigWriter, StagedConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Building,
    Written,
    Reloaded,
    Failed(Stage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Snapshot,
    Write,
    Reload,
}

/// 一次成功同步的摘要
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub clients: usize,
    pub path: PathBuf,
    pub elapsed: Duration,
}

/// 串行化同一目标文件的 写入+重载
///
/// 每个目标文件只应有一个 Synchronizer. 写入在阻塞线程上执行, 并持有锁直到真正结束,
/// 所以即使等待超时, 也不会与下一次写入交错.
pub struct Synchronizer {
    deployment: Arc<DeploymentSettings>,
    source: Arc<dyn AccountSource>,
    writer: Arc<ConfigWriter>,
    reloader: Arc<dyn Reloader>,
    lock: Arc<Mutex<()>>,
    state: StdMutex<PipelineState>,
    pending_reload: Arc<AtomicBool>,
    write_timeout: Duration,
    reload_timeout: Duration,
}

impl Synchronizer {
    pub fn new(
        deployment: Arc<DeploymentSettings>,
        source: Arc<dyn AccountSource>,
        writer: ConfigWriter,
        reloader: Arc<dyn Reloader>,
    ) -> Self {
        Self {
            deployment,
            source,
            writer: Arc::new(writer),
            reloader,
            lock: Arc::new(Mutex::new(())),
            state: StdMutex::new(PipelineState::Idle),
            pending_reload: Arc::new(AtomicBool::new(false)),
            write_timeout: Duration::from_secs(10),
            reload_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, write_timeout: Duration, reload_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self.reload_timeout = reload_timeout;
        self
    }

    pub fn path(&self) -> &std::path::Path {
        self.writer.path()
    }

    /// 最近一次同步所处/结束时的状态
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 目标文件可能已是新配置, 但守护进程还没有被通知重载
    pub fn needs_resync(&self) -> bool {
        self.pending_reload.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: PipelineState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn fail<E: Into<SyncError>>(&self, stage: Stage, err: E) -> SyncError {
        self.set_state(PipelineState::Failed(stage));
        err.into()
    }

    /// 重新生成服务端配置, 原子写入并通知守护进程重载
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.set_state(PipelineState::Building);

        let accounts = self
            .source
            .list_accounts()
            .await
            .map_err(|e| self.fail(Stage::Snapshot, e))?;
        let document = build_server_config(&accounts, &self.deployment);
        let clients = document.clients().len();

        let writer = Arc::clone(&self.writer);
        let mut task = tokio::task::spawn_blocking(move || {
            let result = writer.write(&document);
            (result, guard)
        });

        let guard = match tokio::time::timeout(self.write_timeout, &mut task).await {
            Ok(Ok((Ok(()), guard))) => guard,
            Ok(Ok((Err(e), _guard))) => return Err(self.fail(Stage::Write, e)),
            Ok(Err(join)) => {
                return Err(self.fail(Stage::Write, WriteError::Aborted(join.to_string())))
            }
            Err(_) => {
                self.watch_late_write(task);
                return Err(self.fail(Stage::Write, WriteError::TimedOut(self.write_timeout)));
            }
        };
        self.set_state(PipelineState::Written);
        info!(
            path = %self.writer.path().display(),
            clients,
            "服务端配置已写入"
        );

        match tokio::time::timeout(self.reload_timeout, self.reloader.signal_reload()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(Stage::Reload, e)),
            Err(_) => {
                return Err(self.fail(Stage::Reload, ReloadError::TimedOut(self.reload_timeout)))
            }
        }
        self.pending_reload.store(false, Ordering::SeqCst);
        self.set_state(PipelineState::Reloaded);
        drop(guard);

        let report = SyncReport {
            clients,
            path: self.writer.path().to_path_buf(),
            elapsed: started.elapsed(),
        };
        info!(
            reloader = %self.reloader.describe(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "守护进程已通知重载"
        );
        Ok(report)
    }

    /// 超时的写入还在阻塞线程上运行, 等它结束并记录结果
    fn watch_late_write(&self, task: JoinHandle<(Result<(), WriteError>, OwnedMutexGuard<()>)>) {
        let path = self.writer.path().to_path_buf();
        let pending = Arc::clone(&self.pending_reload);

        tokio::spawn(async move {
            match task.await {
                Ok((Ok(()), _guard)) => {
                    pending.store(true, Ordering::SeqCst);
                    warn!(
                        path = %path.display(),
                        "超时的写入已完成替换, 守护进程未重载, 需要重新同步"
                    );
                }
                Ok((Err(e), _guard)) => {
                    warn!(path = %path.display(), error = %e, "超时的写入最终失败, 目标文件未变");
                }
                Err(e) => warn!(error = %e, "超时的写入任务中断"),
            }
        });
    }

    /// 执行同步并记录结果, 供不关心返回值的触发点使用
    pub async fn sync_logged(&self) -> Option<SyncReport> {
        match self.sync().await {
            Ok(report) => Some(report),
            Err(e @ SyncError::Reload(_)) => {
                warn!(error = %e, "配置已更新但守护进程未重载, 需要手动重试");
                None
            }
            Err(e) => {
                error!(error = %e, "配置同步失败");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, AccountStore, ShadowsocksCredential, VmessCredential};
    use crate::config::{DaemonLogSettings, VmessSettings};
    use crate::v2ray::ConfigDocument;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReloader {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Reloader for CountingReloader {
        async fn signal_reload(&self) -> Result<(), ReloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ReloadError::NotRunning("test".to_string()))
            } else {
                Ok(())
            }
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    struct HangingReloader;

    #[async_trait]
    impl Reloader for HangingReloader {
        async fn signal_reload(&self) -> Result<(), ReloadError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn describe(&self) -> String {
            "hanging".to_string()
        }
    }

    fn deployment() -> Arc<DeploymentSettings> {
        Arc::new(DeploymentSettings {
            proxy_host: "proxy.example.com".to_string(),
            vmess: VmessSettings {
                host: "proxy.example.com".to_string(),
                port: 10086,
                network: Default::default(),
                tcp: None,
                kcp: None,
                web_socket: Default::default(),
                tls: Default::default(),
            },
            log: DaemonLogSettings::default(),
        })
    }

    fn account(id: &str, enabled: bool) -> Account {
        Account {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            vmess: VmessCredential {
                id: uuid::Uuid::new_v4().to_string(),
                alter_id: 64,
            },
            shadowsocks: ShadowsocksCredential {
                password: "pw".to_string(),
                method: "aes-256-cfb".to_string(),
                port: 10001,
            },
            enabled,
            updated_at: 0,
        }
    }

    fn read_doc(path: &std::path::Path) -> ConfigDocument {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_writes_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let store = Arc::new(
            AccountStore::with_accounts(vec![account("u1", true), account("u2", false)]).unwrap(),
        );
        let reloader = Arc::new(CountingReloader {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sync = Synchronizer::new(
            deployment(),
            store,
            ConfigWriter::new(&path),
            reloader.clone(),
        );

        let report = sync.sync().await.unwrap();
        assert_eq!(report.clients, 1);
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sync.state(), PipelineState::Reloaded);
        assert_eq!(read_doc(&path).clients()[0].email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn test_write_failure_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let reloader = Arc::new(CountingReloader {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sync = Synchronizer::new(
            deployment(),
            Arc::new(AccountStore::new()),
            ConfigWriter::new(dir.path().join("missing").join("v2ray.json")),
            reloader.clone(),
        );

        assert!(matches!(sync.sync().await, Err(SyncError::Write(_))));
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.state(), PipelineState::Failed(Stage::Write));
    }

    #[tokio::test]
    async fn test_reload_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let sync = Synchronizer::new(
            deployment(),
            Arc::new(AccountStore::new()),
            ConfigWriter::new(&path),
            Arc::new(HangingReloader),
        )
        .with_timeouts(Duration::from_secs(5), Duration::from_millis(50));

        assert!(matches!(
            sync.sync().await,
            Err(SyncError::Reload(ReloadError::TimedOut(_)))
        ));
        assert_eq!(sync.state(), PipelineState::Failed(Stage::Reload));
        assert!(read_doc(&path).clients().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_write_after_timeout_marks_resync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let reloader = Arc::new(CountingReloader {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sync = Synchronizer::new(
            deployment(),
            Arc::new(AccountStore::with_accounts(vec![account("u1", true)]).unwrap()),
            ConfigWriter::new(&path),
            reloader.clone(),
        )
        .with_timeouts(Duration::ZERO, Duration::from_secs(5));

        match sync.sync().await {
            // 写入抢在第一次轮询前完成, 没有超时可观察
            Ok(_) => return,
            Err(SyncError::Write(WriteError::TimedOut(_))) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
        assert_eq!(sync.state(), PipelineState::Failed(Stage::Write));
        assert_eq!(reloader.calls.load(Ordering::SeqCst), 0);

        for _ in 0..200 {
            if sync.needs_resync() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sync.needs_resync());
        assert_eq!(read_doc(&path).clients().len(), 1);
        assert_eq!(sync.state(), PipelineState::Failed(Stage::Write));
    }

    #[tokio::test]
    async fn test_successful_sync_clears_resync_flag() {
        let dir = tempfile::tempdir().unwrap();
        let sync = Synchronizer::new(
            deployment(),
            Arc::new(AccountStore::new()),
            ConfigWriter::new(dir.path().join("v2ray.json")),
            Arc::new(CountingReloader {
                calls: AtomicUsize::new(0),
                fail: false,
            }),
        );
        sync.pending_reload.store(true, Ordering::SeqCst);

        sync.sync().await.unwrap();
        assert!(!sync.needs_resync());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_syncs_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let store = Arc::new(AccountStore::with_accounts(vec![account("u1", true)]).unwrap());
        let reloader = Arc::new(CountingReloader {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sync = Arc::new(Synchronizer::new(
            deployment(),
            store,
            ConfigWriter::new(&path),
            reloader.clone(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sync = Arc::clone(&sync);
                tokio::spawn(async move { sync.sync().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(reloader.calls.load(Ordering::SeqCst), 8);
        assert_eq!(read_doc(&path).clients().len(), 1);
    }
}
