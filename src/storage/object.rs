//! 基于 opendal Operator 的通用远程存储

use super::{DeleteStatus, FolderStatus, RemoteFileInfo, RemoteStore};
use crate::core::error::RemoteError;
use async_trait::async_trait;
use opendal::{ErrorKind, Metadata, Operator};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 上传分块大小
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 远程内容哈希的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSource {
    /// Content-MD5，缺失时退回到形如 MD5 的 ETag（S3 单段上传）
    Etag,
    /// 仅信任 Content-MD5（WebDAV 的 ETag 不是内容哈希）
    ContentMd5,
}

pub struct ObjectStore {
    operator: Operator,
    name: String,
    hash_source: HashSource,
}

impl ObjectStore {
    pub fn new(operator: Operator, name: impl Into<String>, hash_source: HashSource) -> Self {
        Self {
            operator,
            name: name.into(),
            hash_source,
        }
    }

    fn to_info(&self, path: &str, meta: &Metadata) -> RemoteFileInfo {
        let is_dir = meta.is_dir();
        let content_hash = if is_dir {
            None
        } else {
            extract_hash(meta.content_md5(), meta.etag(), self.hash_source)
        };

        RemoteFileInfo {
            path: path.trim_end_matches('/').to_string(),
            size: if is_dir { 0 } else { meta.content_length() },
            content_hash,
            modified: meta.last_modified(),
            is_dir,
        }
    }

    async fn stat_opt(&self, path: &str) -> Result<Option<Metadata>, RemoteError> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RemoteStore for ObjectStore {
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFileInfo>, RemoteError> {
        if let Some(meta) = self.stat_opt(path).await? {
            return Ok(Some(self.to_info(path, &meta)));
        }
        // 同名目录
        let dir_path = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .stat_opt(&dir_path)
            .await?
            .map(|meta| self.to_info(path, &meta)))
    }

    async fn create_folder(&self, path: &str) -> Result<FolderStatus, RemoteError> {
        let dir_path = format!("{}/", path.trim_end_matches('/'));

        if let Some(meta) = self.stat_opt(&dir_path).await? {
            if meta.is_dir() {
                return Ok(FolderStatus::AlreadyExists);
            }
        }
        if let Some(meta) = self.stat_opt(path.trim_end_matches('/')).await? {
            if !meta.is_dir() {
                return Err(RemoteError::permanent(format!("{} 已存在且不是目录", path)));
            }
        }

        self.operator.create_dir(&dir_path).await?;
        Ok(FolderStatus::Created)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let mut file = tokio::fs::File::open(local).await?;
        let mut writer = self.operator.writer_with(remote).chunk(CHUNK_SIZE).await?;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            if let Err(e) = writer.write(buffer[..n].to_vec()).await {
                let _ = writer.abort().await;
                return Err(e.into());
            }
        }

        writer.close().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<DeleteStatus, RemoteError> {
        let Some(info) = self.get_metadata(path).await? else {
            return Ok(DeleteStatus::NotFound);
        };

        if info.is_dir {
            let dir_path = format!("{}/", path.trim_end_matches('/'));
            self.operator.remove_all(&dir_path).await?;
        } else {
            self.operator.delete(path).await?;
        }
        Ok(DeleteStatus::Deleted)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 从 Content-MD5 / ETag 中提取十六进制 MD5
fn extract_hash(
    content_md5: Option<&str>,
    etag: Option<&str>,
    source: HashSource,
) -> Option<String> {
    if let Some(md5) = content_md5.and_then(as_md5_hex) {
        return Some(md5);
    }
    match source {
        HashSource::Etag => etag.and_then(as_md5_hex),
        HashSource::ContentMd5 => None,
    }
}

/// 32 位十六进制才视为 MD5（分段上传的 ETag 带 `-N` 后缀）
fn as_md5_hex(value: &str) -> Option<String> {
    let value = value.trim_start_matches("W/").trim_matches('"');
    if value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(value.to_ascii_lowercase())
    } else {
        None
    }
}
