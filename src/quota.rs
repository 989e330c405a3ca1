//! 上传目录容量检查。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    /// `current` is the measured directory size (`0` when the guard is disabled).
    Within { current: u64 },
    Exceeded { current: u64, limit: u64 },
}

/// Fixed ceiling on the aggregate size of the upload directory; `0` disables it.
#[derive(Debug, Clone, Copy)]
pub struct QuotaGuard {
    limit: u64,
}

impl QuotaGuard {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    /// Rejects once the directory is already at or above the ceiling.
    pub async fn check(&self, upload_dir: &Path) -> io::Result<QuotaStatus> {
        if self.limit == 0 {
            return Ok(QuotaStatus::Within { current: 0 });
        }
        let current = directory_size(upload_dir).await?;
        Ok(self.status(current, current >= self.limit))
    }

    /// Rejects when writing `incoming` bytes in place of `replaced` would pass the ceiling.
    ///
    /// `current` is the size measured by [`QuotaGuard::check`]; callers hold the
    /// upload lock in between, so the directory has not changed.
    pub fn check_incoming(&self, current: u64, incoming: u64, replaced: u64) -> QuotaStatus {
        if self.limit == 0 {
            return QuotaStatus::Within { current };
        }
        self.status(current, self.would_exceed(current, incoming, replaced))
    }

    fn would_exceed(&self, current: u64, incoming: u64, replaced: u64) -> bool {
        current.saturating_sub(replaced).saturating_add(incoming) > self.limit
    }

    fn status(&self, current: u64, exceeded: bool) -> QuotaStatus {
        if exceeded {
            QuotaStatus::Exceeded {
                current,
                limit: self.limit,
            }
        } else {
            QuotaStatus::Within { current }
        }
    }
}

/// Recursive sum of file sizes under `root`.
///
/// Symlinked files count with their target's size; symlinked directories are
/// not descended into. Entries that vanish or cannot be read are skipped.
pub async fn directory_size(root: &Path) -> io::Result<u64> {
    let mut total: u64 = 0;
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(err) => {
                skip_unreadable(&dir, root, err)?;
                continue;
            }
        };
        loop {
            let entry = match reader.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    skip_unreadable(&dir, root, err)?;
                    break;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(path = ?path, error = %err, "skipping entry");
                    continue;
                }
            };
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {
                    total = total.saturating_add(metadata.len());
                }
                Ok(_) => {}
                Err(err) => warn!(path = ?path, error = %err, "skipping entry"),
            }
        }
    }

    Ok(total)
}

/// The root itself must be readable; nested directories are skipped with a warning.
fn skip_unreadable(dir: &Path, root: &Path, err: io::Error) -> io::Result<()> {
    if dir == root {
        return Err(err);
    }
    warn!(path = ?dir, error = %err, "skipping unreadable directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn directory_size_walks_nested_dirs() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::write(root.join("a.bin"), vec![0u8; 5]).expect("write");
        std::fs::create_dir_all(root.join("nested/deeper")).expect("mkdir");
        std::fs::write(root.join("nested/b.bin"), vec![0u8; 7]).expect("write");
        std::fs::write(root.join("nested/deeper/c.bin"), b"").expect("write");

        assert_eq!(directory_size(root).await.expect("size"), 12);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn directory_size_counts_symlinked_files_but_not_dirs() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::fs::write(outside.join("big.bin"), vec![0u8; 100]).expect("write");

        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::write(root.join("own.bin"), vec![0u8; 3]).expect("write");
        symlink(outside.join("big.bin"), root.join("file-link")).expect("symlink");
        symlink(&outside, root.join("dir-link")).expect("symlink");
        symlink(root.join("missing"), root.join("dangling")).expect("symlink");

        assert_eq!(directory_size(&root).await.expect("size"), 103);
    }

    #[tokio::test]
    async fn check_rejects_at_or_above_limit() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("full.bin"), vec![0u8; 10]).expect("write");

        let status = QuotaGuard::new(10).check(temp.path()).await.expect("check");
        assert_eq!(
            status,
            QuotaStatus::Exceeded {
                current: 10,
                limit: 10
            }
        );
        let status = QuotaGuard::new(11).check(temp.path()).await.expect("check");
        assert_eq!(status, QuotaStatus::Within { current: 10 });
        let status = QuotaGuard::new(0).check(temp.path()).await.expect("check");
        assert_eq!(status, QuotaStatus::Within { current: 0 });
    }

    #[test]
    fn check_incoming_uses_measured_size() {
        let guard = QuotaGuard::new(10);
        assert_eq!(guard.check_incoming(5, 5, 0), QuotaStatus::Within { current: 5 });
        assert_eq!(
            guard.check_incoming(5, 10, 0),
            QuotaStatus::Exceeded {
                current: 5,
                limit: 10
            }
        );
        assert_eq!(
            QuotaGuard::new(0).check_incoming(5, u64::MAX, 0),
            QuotaStatus::Within { current: 5 }
        );
    }

    #[test]
    fn unreadable_nested_directory_is_skipped_but_root_is_not() {
        let root = Path::new("/uploads");
        let err = || io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(skip_unreadable(&root.join("nested"), root, err()).is_ok());
        let result = skip_unreadable(root, root, err());
        assert_eq!(
            result.map_err(|err| err.kind()),
            Err(io::ErrorKind::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let result = directory_size(&temp.path().join("gone")).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_nested_directory_does_not_fail_walk() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        std::fs::write(root.join("a.bin"), vec![0u8; 4]).expect("write");
        let locked = root.join("locked");
        std::fs::create_dir(&locked).expect("mkdir");
        std::fs::write(locked.join("b.bin"), vec![0u8; 6]).expect("write");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000))
            .expect("chmod");

        let total = directory_size(root).await;

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        // 以 root 运行时权限不生效，两种结果都可接受
        let total = total.expect("walk succeeds");
        assert!(total == 4 || total == 10, "{total}");
    }

    #[test]
    fn incoming_payload_counts_against_limit() {
        let guard = QuotaGuard::new(10);
        assert!(!guard.would_exceed(5, 5, 0));
        assert!(guard.would_exceed(5, 10, 0));
        // 覆盖同名文件时先扣除旧文件大小
        assert!(!guard.would_exceed(9, 9, 8));
    }
}
