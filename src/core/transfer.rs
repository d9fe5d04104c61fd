//! 传输任务与同步结果

use crate::core::error::{RemoteError, RemoteErrorKind};
use crate::core::scanner::Entry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 决策阶段为每个条目产出的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    CreateFolder,
    /// overwrite 为 true 表示远程已有同名文件（更新）
    Upload { overwrite: bool },
    Skip,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::CreateFolder => write!(f, "create_folder"),
            TaskKind::Upload { overwrite: false } => write!(f, "create"),
            TaskKind::Upload { overwrite: true } => write!(f, "update"),
            TaskKind::Skip => write!(f, "skip"),
        }
    }
}

/// 一个待执行的传输任务
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub kind: TaskKind,
    pub entry: Entry,
    /// 远程完整路径（已拼接 remote_root）
    pub remote_path: String,
}

impl TransferTask {
    pub fn new(kind: TaskKind, entry: Entry, remote_root: &str) -> Self {
        let remote_path = remote_path(remote_root, &entry.relative_path);
        Self {
            kind,
            entry,
            remote_path,
        }
    }
}

/// 拼接远程根路径与相对路径
pub fn remote_path(remote_root: &str, relative_path: &str) -> String {
    let root = remote_root.trim_matches('/');
    let rel = relative_path.trim_start_matches('/');
    if root.is_empty() {
        rel.to_string()
    } else if rel.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root, rel)
    }
}

/// 单个条目的失败记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: String,
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl SyncFailure {
    pub fn new(path: impl Into<String>, error: &RemoteError) -> Self {
        Self {
            path: path.into(),
            kind: error.kind,
            message: error.message.clone(),
        }
    }
}

/// dry-run 模式下记录的计划动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub path: String,
    pub action: TaskKind,
    pub size: u64,
}

/// 一次同步的汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub pass_id: Uuid,
    pub target: String,
    pub dry_run: bool,
    /// 被取消时未执行的任务不计入任何计数
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub folders_created: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<SyncFailure>,
    pub planned: Vec<PlannedAction>,
}

impl SyncResult {
    pub fn new(target: impl Into<String>, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            pass_id: Uuid::new_v4(),
            target: target.into(),
            dry_run,
            cancelled: false,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            folders_created: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            failures: Vec::new(),
            planned: Vec::new(),
        }
    }

    /// 记录一次成功执行
    pub fn record_success(&mut self, kind: TaskKind, bytes: u64) {
        match kind {
            TaskKind::CreateFolder => self.folders_created += 1,
            TaskKind::Upload { overwrite: false } => {
                self.created += 1;
                self.bytes_transferred += bytes;
            }
            TaskKind::Upload { overwrite: true } => {
                self.updated += 1;
                self.bytes_transferred += bytes;
            }
            TaskKind::Skip => self.skipped += 1,
        }
    }

    pub fn record_failure(&mut self, path: impl Into<String>, error: &RemoteError) {
        self.failed += 1;
        self.failures.push(SyncFailure::new(path, error));
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }

    /// 成功处理的条目数（含跳过）
    pub fn succeeded(&self) -> usize {
        self.folders_created + self.created + self.updated + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_join() {
        assert_eq!(remote_path("", "a/b.txt"), "a/b.txt");
        assert_eq!(remote_path("/backup/", "a/b.txt"), "backup/a/b.txt");
        assert_eq!(remote_path("backup", ""), "backup");
    }

    #[test]
    fn test_result_counters() {
        let mut result = SyncResult::new("mem", false);
        result.record_success(TaskKind::CreateFolder, 0);
        result.record_success(TaskKind::Upload { overwrite: false }, 10);
        result.record_success(TaskKind::Upload { overwrite: true }, 5);
        result.record_success(TaskKind::Skip, 0);
        result.record_failure("x", &RemoteError::quota("full"));

        assert_eq!(result.succeeded(), 4);
        assert_eq!(result.failed, 1);
        assert_eq!(result.bytes_transferred, 15);
        assert_eq!(result.failures[0].kind, RemoteErrorKind::Quota);
        assert!(!result.is_success());
    }
}
