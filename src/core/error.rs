//! 同步核心的错误分类

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 扫描错误：会中止当前扫描
#[derive(Debug, Error)]
pub enum ScanError {
    /// 根目录不存在、不是目录或无法读取
    #[error("无法访问同步根目录 {path}: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// 遍历过程中出现的 I/O 错误
    #[error("扫描 {path} 时出错: {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// 阻塞扫描任务异常退出
    #[error("扫描任务异常终止: {0}")]
    Aborted(String),
}

/// 计算内容哈希失败（非致命）
#[derive(Debug, Error)]
#[error("无法计算 {path} 的哈希: {source}")]
pub struct HashError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// 远程错误分类，决定是否重试
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteErrorKind {
    /// 网络超时、5xx、限流：可重试
    Transient,
    /// 认证或权限失败
    Auth,
    /// 配额或空间不足
    Quota,
    /// 其他不可恢复错误（路径冲突等）
    Permanent,
}

impl RemoteErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, RemoteErrorKind::Transient)
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::Transient => write!(f, "transient"),
            RemoteErrorKind::Auth => write!(f, "auth"),
            RemoteErrorKind::Quota => write!(f, "quota"),
            RemoteErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// 远程存储操作错误
#[derive(Debug, Clone, Error)]
#[error("[{kind}] {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Quota, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permanent, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<io::Error> for RemoteError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::PermissionDenied => RemoteErrorKind::Auth,
            io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => RemoteErrorKind::Transient,
            // ENOSPC / EDQUOT
            _ if matches!(e.raw_os_error(), Some(28) | Some(122)) => RemoteErrorKind::Quota,
            _ => RemoteErrorKind::Permanent,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<opendal::Error> for RemoteError {
    fn from(e: opendal::Error) -> Self {
        use opendal::ErrorKind;

        let message = e.to_string();
        let kind = match e.kind() {
            ErrorKind::PermissionDenied => RemoteErrorKind::Auth,
            ErrorKind::RateLimited => RemoteErrorKind::Transient,
            _ if e.is_temporary() => RemoteErrorKind::Transient,
            _ if message.contains("507") || message.contains("QuotaExceeded") => {
                RemoteErrorKind::Quota
            }
            _ if message.contains("401") || message.contains("403") => RemoteErrorKind::Auth,
            _ => RemoteErrorKind::Permanent,
        };
        Self::new(kind, message)
    }
}

/// 监视器错误
#[derive(Debug, Error)]
pub enum WatchError {
    /// 初始扫描失败，监视器未启动
    #[error("监视器初始化失败: {0}")]
    Init(#[source] ScanError),
    /// 某次轮询扫描失败，下一周期继续
    #[error("轮询扫描失败: {0}")]
    Poll(#[source] ScanError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_classification() {
        let denied: RemoteError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert_eq!(denied.kind, RemoteErrorKind::Auth);
        assert!(!denied.is_retryable());

        let timeout: RemoteError = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(timeout.is_retryable());

        let missing: RemoteError = io::Error::from(io::ErrorKind::NotFound).into();
        assert_eq!(missing.kind, RemoteErrorKind::Permanent);
    }
}
