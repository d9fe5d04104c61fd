pub mod local;
pub mod memory;
pub mod object;
pub mod s3;
pub mod webdav;

use crate::config::{StorageConfig, StorageType};
use crate::core::error::RemoteError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use object::{HashSource, ObjectStore};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    pub path: String,
    pub size: u64,
    /// 小写十六进制 MD5；后端无法提供时为 None
    pub content_hash: Option<String>,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// create_folder 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    Created,
    AlreadyExists,
}

/// delete 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    NotFound,
}

/// 远程存储抽象接口
///
/// 路径均为相对存储根的 `/` 分隔路径。取消通过丢弃 future 完成。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 检查对象是否存在
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        Ok(self.get_metadata(path).await?.is_some())
    }

    /// 获取对象元数据，不存在时返回 None
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFileInfo>, RemoteError>;

    /// 创建目录（幂等）
    async fn create_folder(&self, path: &str) -> Result<FolderStatus, RemoteError>;

    /// 上传本地文件，已存在时覆盖
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// 删除文件或目录
    async fn delete(&self, path: &str) -> Result<DeleteStatus, RemoteError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.typ {
        StorageType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("Local storage requires path"))?;
            tracing::info!("初始化本地存储: {}", path);
            Ok(Arc::new(LocalStore::new(path)?) as Arc<dyn RemoteStore>)
        }
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow!("S3 storage requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow!("S3 storage requires region"))?;
            let access_key = config
                .access_key
                .as_ref()
                .ok_or_else(|| anyhow!("S3 storage requires accessKey"))?;
            let secret_key = config
                .secret_key
                .as_ref()
                .ok_or_else(|| anyhow!("S3 storage requires secretKey"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(s3::build(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.clone(),
                config.prefix.clone(),
            )?) as Arc<dyn RemoteStore>)
        }
        StorageType::WebDav => {
            let endpoint = config
                .webdav_endpoint
                .as_ref()
                .ok_or_else(|| anyhow!("WebDAV storage requires endpoint"))?;
            let username = config
                .username
                .as_ref()
                .ok_or_else(|| anyhow!("WebDAV storage requires username"))?;
            let password = config
                .password
                .as_ref()
                .ok_or_else(|| anyhow!("WebDAV storage requires password"))?;
            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Arc::new(webdav::build(endpoint, username, password, config.root.clone()).await?)
                as Arc<dyn RemoteStore>)
        }
        StorageType::Memory => {
            tracing::info!("创建内存存储: {}", config.name);
            Ok(Arc::new(MemoryStore::new(&config.name)) as Arc<dyn RemoteStore>)
        }
    }
}
