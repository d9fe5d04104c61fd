use super::{DeleteStatus, FolderStatus, RemoteFileInfo, RemoteStore};
use crate::core::error::RemoteError;
use crate::core::scanner::hash_file;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 以本地目录作为远程存储（NAS 挂载、外置硬盘等）
pub struct LocalStore {
    base_path: PathBuf,
    name: String,
}

impl LocalStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFileInfo>, RemoteError> {
        let full_path = self.resolve_path(path);

        let metadata = match fs::metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        if metadata.is_dir() {
            return Ok(Some(RemoteFileInfo {
                path: path.to_string(),
                size: 0,
                content_hash: None,
                modified,
                is_dir: true,
            }));
        }

        let size = metadata.len();
        let content_hash = if size > 0 {
            let hash_path = full_path.clone();
            let hash = tokio::task::spawn_blocking(move || hash_file(&hash_path))
                .await
                .map_err(|e| RemoteError::transient(e.to_string()))?
                .map_err(|e| RemoteError::from(e.source))?;
            Some(hash)
        } else {
            None
        };

        Ok(Some(RemoteFileInfo {
            path: path.to_string(),
            size,
            content_hash,
            modified,
            is_dir: false,
        }))
    }

    async fn create_folder(&self, path: &str) -> Result<FolderStatus, RemoteError> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(m) if m.is_dir() => return Ok(FolderStatus::AlreadyExists),
            Ok(_) => {
                return Err(RemoteError::permanent(format!(
                    "{} 已存在且不是目录",
                    path
                )))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::create_dir_all(&full_path).await?;
        Ok(FolderStatus::Created)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let full_path = self.resolve_path(remote);

        if fs::metadata(&full_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(RemoteError::permanent(format!("{} 是目录", remote)));
        }

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 先写临时文件，再原子重命名
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = full_path.with_file_name(format!(".{}.partial", file_name));

        if let Err(e) = fs::copy(local, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<DeleteStatus, RemoteError> {
        let full_path = self.resolve_path(path);

        let metadata = match fs::metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeleteStatus::NotFound),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }

        Ok(DeleteStatus::Deleted)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
