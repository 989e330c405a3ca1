use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::ErrorKind;

use crate::atomic::is_temp_file_name;
use crate::config::UPLOAD_DIR_NAME;

/// Serving root plus the nested upload directory.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    upload_dir: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        let upload_dir = root.join(UPLOAD_DIR_NAME);
        Self { root, upload_dir }
    }

    /// Fails when the root is missing; creates `uploads/` eagerly.
    pub async fn ensure_layout(&self) -> io::Result<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("not a directory: {}", self.root.display()),
            ));
        }
        fs::create_dir_all(&self.upload_dir).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub async fn resolve_path_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.ensure_no_symlink_components(&target).await?;
        Ok(target)
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        let trimmed = relative.trim_start_matches(['/', '\\']);
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }
        Ok(self.root.join(normalized))
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::InvalidPath)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::InvalidPath);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::InvalidPath);
                    }
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// Immediate children of `dir`, directories first.
    pub async fn list_dir(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        let mut reader = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            // symlinks are never served, so do not advertise them
            if metadata.file_type().is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_file_name(&name) {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);

            entries.push(FileEntry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(entries)
    }
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<String>,
}
