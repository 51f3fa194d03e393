//! 配置文件原子写入
//!
//! 先写同目录下的临时文件并 fsync, 再 rename 覆盖目标, 最后 fsync 目录.
//! 任何时刻读到的目标文件要么是旧内容, 要么是完整的新内容.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::utils::WriteError;

#[derive(Debug, Clone)]
pub struct ConfigWriter {
    path: PathBuf,
}

impl ConfigWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 序列化并原子替换目标文件
    pub fn write<T: Serialize + ?Sized>(&self, document: &T) -> Result<(), WriteError> {
        self.stage(document)?.commit()
    }

    /// 写入并落盘临时文件, 但不替换目标; 未提交的暂存在 drop 时清理
    pub fn stage<T: Serialize + ?Sized>(&self, document: &T) -> Result<StagedConfig, WriteError> {
        let mut content = serde_json::to_vec_pretty(document)?;
        content.push(b'\n');

        let temp = self.temp_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| WriteError::io(&temp, e))?;

        // 从这里开始 drop 会删掉临时文件
        let staged = StagedConfig {
            temp,
            target: self.path.clone(),
            committed: false,
        };

        file.write_all(&content)
            .map_err(|e| WriteError::io(&staged.temp, e))?;
        file.sync_all()
            .map_err(|e| WriteError::io(&staged.temp, e))?;

        debug!(temp = %staged.temp.display(), bytes = content.len(), "临时配置已落盘");
        Ok(staged)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        let suffix: u32 = rand::random();
        parent_dir(&self.path).join(format!(
            ".{}.{}.{:08x}.tmp",
            name,
            std::process::id(),
            suffix
        ))
    }
}

/// 已写入临时文件、尚未替换目标的配置
#[derive(Debug)]
pub struct StagedConfig {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedConfig {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// rename 覆盖目标并 fsync 所在目录
    pub fn commit(mut self) -> Result<(), WriteError> {
        fs::rename(&self.temp, &self.target).map_err(|e| WriteError::io(&self.target, e))?;
        self.committed = true;

        sync_dir(parent_dir(&self.target)).map_err(|e| WriteError::io(&self.target, e))?;
        Ok(())
    }
}

impl Drop for StagedConfig {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.temp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(temp = %self.temp.display(), error = %e, "清理临时配置失败");
            }
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().map(|e| e == "tmp").unwrap_or(false))
            .collect()
    }

    #[test]
    fn test_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let writer = ConfigWriter::new(&path);

        writer.write(&json!({ "v": 1 })).unwrap();
        writer.write(&json!({ "v": 2 })).unwrap();

        let content: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(content, json!({ "v": 2 }));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_uncommitted_stage_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v2ray.json");
        let writer = ConfigWriter::new(&path);
        writer.write(&json!({ "v": 1 })).unwrap();
        let before = fs::read(&path).unwrap();

        // 模拟 rename 之前崩溃
        let staged = writer.stage(&json!({ "v": 2 })).unwrap();
        assert!(staged.temp_path().exists());
        assert_eq!(fs::read(&path).unwrap(), before);
        drop(staged);

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ConfigWriter::new(dir.path().join("missing").join("v2ray.json"));

        assert!(matches!(
            writer.write(&json!({})),
            Err(WriteError::Io { .. })
        ));
    }

    #[test]
    fn test_relative_path_uses_current_dir() {
        assert_eq!(parent_dir(Path::new("v2ray.json")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/etc/v2ray.json")), Path::new("/etc"));
    }
}
