//! 进程内存储，用于测试和 dry-run 演练
//!
//! 行为与层级型后端（WebDAV）一致：上传和建目录都要求父目录已存在。

use super::{DeleteStatus, FolderStatus, RemoteFileInfo, RemoteStore};
use crate::core::error::RemoteError;
use crate::core::scanner::hash_bytes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct MemObject {
    data: Vec<u8>,
    hash: Option<String>,
    modified: DateTime<Utc>,
    is_dir: bool,
}

pub struct MemoryStore {
    name: String,
    objects: Mutex<BTreeMap<String, MemObject>>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("memory:{}", name),
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// 读取已上传的内容
    pub async fn read(&self, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().await;
        objects
            .get(normalize(path))
            .filter(|o| !o.is_dir)
            .map(|o| o.data.clone())
    }

    /// 所有路径（有序）
    pub async fn paths(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    /// 直接写入对象，跳过父目录检查
    pub async fn insert_file(&self, path: &str, data: &[u8], modified: DateTime<Utc>) {
        let object = MemObject {
            data: data.to_vec(),
            hash: (!data.is_empty()).then(|| hash_bytes(data)),
            modified,
            is_dir: false,
        };
        self.objects
            .lock()
            .await
            .insert(normalize(path).to_string(), object);
    }

    fn check_parent(
        objects: &BTreeMap<String, MemObject>,
        path: &str,
    ) -> Result<(), RemoteError> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };
        match objects.get(parent) {
            Some(o) if o.is_dir => Ok(()),
            Some(_) => Err(RemoteError::permanent(format!("{} 不是目录", parent))),
            None => Err(RemoteError::permanent(format!("父目录 {} 不存在", parent))),
        }
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFileInfo>, RemoteError> {
        let objects = self.objects.lock().await;
        Ok(objects.get(normalize(path)).map(|o| RemoteFileInfo {
            path: normalize(path).to_string(),
            size: o.data.len() as u64,
            content_hash: o.hash.clone(),
            modified: Some(o.modified),
            is_dir: o.is_dir,
        }))
    }

    async fn create_folder(&self, path: &str) -> Result<FolderStatus, RemoteError> {
        let path = normalize(path);
        let mut objects = self.objects.lock().await;

        match objects.get(path) {
            Some(o) if o.is_dir => return Ok(FolderStatus::AlreadyExists),
            Some(_) => {
                return Err(RemoteError::permanent(format!("{} 已存在且不是目录", path)))
            }
            None => {}
        }
        Self::check_parent(&objects, path)?;

        objects.insert(
            path.to_string(),
            MemObject {
                data: Vec::new(),
                hash: None,
                modified: Utc::now(),
                is_dir: true,
            },
        );
        Ok(FolderStatus::Created)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let data = tokio::fs::read(local).await?;
        let remote = normalize(remote);
        let mut objects = self.objects.lock().await;

        if objects.get(remote).map(|o| o.is_dir).unwrap_or(false) {
            return Err(RemoteError::permanent(format!("{} 是目录", remote)));
        }
        Self::check_parent(&objects, remote)?;

        let hash = (!data.is_empty()).then(|| hash_bytes(&data));
        objects.insert(
            remote.to_string(),
            MemObject {
                data,
                hash,
                modified: Utc::now(),
                is_dir: false,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<DeleteStatus, RemoteError> {
        let path = normalize(path);
        let mut objects = self.objects.lock().await;

        if objects.remove(path).is_none() {
            return Ok(DeleteStatus::NotFound);
        }
        let prefix = format!("{}/", path);
        objects.retain(|k, _| !k.starts_with(&prefix));
        Ok(DeleteStatus::Deleted)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
