//! 临时写入与原子替换：上传内容先落临时文件，再改名覆盖目标。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp.";

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = parent.join(format!(".{base}{TEMP_MARKER}{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件（同名文件被覆盖）。
    pub async fn finalize(self) -> io::Result<()> {
        self.file.sync_all().await?;
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
                        let _ = fs::remove_file(&self.temp_path).await;
                        return Err(err);
                    }
                    return Ok(());
                }
            }
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(err);
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(())
    }
}

/// 判断文件名是否为 [`AtomicFile`] 生成的临时文件。
pub fn is_temp_file_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('.') else {
        return false;
    };
    match rest.rsplit_once(TEMP_MARKER) {
        Some((base, suffix)) => !base.is_empty() && Uuid::parse_str(suffix).is_ok(),
        None => false,
    }
}

/// 清理进程异常退出后遗留的临时文件（仅扫描一层目录）。
pub async fn cleanup_stale_temp_files(dir: &Path) -> io::Result<u64> {
    let mut removed = 0;
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name();
        if !is_temp_file_name(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        match fs::remove_file(&path).await {
            Ok(()) => {
                removed += 1;
                info!(path = ?path, "removed stale upload temp file");
            }
            Err(err) => warn!(path = ?path, error = %err, "failed to remove stale temp file"),
        }
    }
    Ok(removed)
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_replaces_existing_target() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("report.txt");
        std::fs::write(&target, b"old contents").expect("seed");

        let mut atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.write_all(b"new").await.expect("write");
        atomic.finalize().await.expect("finalize");

        assert_eq!(std::fs::read(&target).expect("read"), b"new");
        let leftovers = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_temp_and_keeps_target_absent() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("never.bin");
        let mut atomic = AtomicFile::new(&target).await.expect("create temp");
        atomic.write_all(b"partial").await.expect("write");
        atomic.cleanup().await;

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn temp_names_are_recognised() {
        let name = format!(".photo.jpg.tmp.{}", Uuid::new_v4());
        assert!(is_temp_file_name(&name));
        assert!(!is_temp_file_name("photo.jpg"));
        assert!(!is_temp_file_name(".hidden"));
        assert!(!is_temp_file_name(".notes.tmp.backup"));
    }

    #[tokio::test]
    async fn stale_temp_files_are_swept() {
        let temp = tempdir().expect("tempdir");
        let stale = temp.path().join(format!(".a.txt.tmp.{}", Uuid::new_v4()));
        std::fs::write(&stale, b"x").expect("write stale");
        std::fs::write(temp.path().join("a.txt"), b"keep").expect("write keep");

        let removed = cleanup_stale_temp_files(temp.path()).await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(temp.path().join("a.txt").exists());
    }
}
