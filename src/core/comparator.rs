use crate::core::error::RemoteError;
use crate::core::retry::RetryPolicy;
use crate::core::scanner::{Entry, Inventory};
use crate::core::transfer::{remote_path, SyncFailure, TaskKind, TransferTask};
use crate::storage::{RemoteFileInfo, RemoteStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 远程没有内容哈希时使用的修改时间容差（秒）
    pub time_tolerance_seconds: i64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
        }
    }
}

/// 决策结果：待执行任务 + 查询阶段就已失败的条目
#[derive(Debug, Default)]
pub struct Plan {
    pub tasks: Vec<TransferTask>,
    pub failures: Vec<SyncFailure>,
    /// 查询未完成就被取消
    pub cancelled: bool,
}

impl Plan {
    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind == kind).count()
    }

    pub fn upload_bytes(&self) -> u64 {
        self.tasks
            .iter()
            .filter(|t| matches!(t.kind, TaskKind::Upload { .. }))
            .map(|t| t.entry.size)
            .sum()
    }
}

/// 文件比较器
pub struct FileComparator {
    config: CompareConfig,
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::with_config(CompareConfig::default())
    }
}

impl FileComparator {
    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    /// 根据本地条目与远程信息决定动作
    pub fn decide(
        &self,
        entry: &Entry,
        remote: Option<&RemoteFileInfo>,
    ) -> Result<TaskKind, RemoteError> {
        if entry.is_dir {
            return Ok(TaskKind::CreateFolder);
        }

        let Some(remote) = remote else {
            return Ok(TaskKind::Upload { overwrite: false });
        };

        if remote.is_dir {
            return Err(RemoteError::permanent(format!(
                "远程 {} 是目录，无法写入文件",
                remote.path
            )));
        }

        // 空文件没有哈希
        if entry.size == 0 && remote.size == 0 {
            return Ok(TaskKind::Skip);
        }

        let Some(local_hash) = entry.content_hash.as_deref() else {
            debug!("本地哈希缺失，覆盖上传: {}", entry.relative_path);
            return Ok(TaskKind::Upload { overwrite: true });
        };

        if let Some(remote_hash) = remote.content_hash.as_deref() {
            return Ok(if local_hash.eq_ignore_ascii_case(remote_hash) {
                TaskKind::Skip
            } else {
                TaskKind::Upload { overwrite: true }
            });
        }

        // 远程无哈希：大小 + 修改时间，只在本地比远程新超过容差时上传
        if entry.size != remote.size {
            debug!(
                "文件大小不同: {} (local={}, remote={})",
                entry.relative_path, entry.size, remote.size
            );
            return Ok(TaskKind::Upload { overwrite: true });
        }

        let local_newer = match remote.modified {
            Some(remote_modified) => {
                (entry.modified - remote_modified).num_seconds()
                    > self.config.time_tolerance_seconds
            }
            None => false,
        };

        Ok(if local_newer {
            TaskKind::Upload { overwrite: true }
        } else {
            TaskKind::Skip
        })
    }

    /// 对整个 Inventory 做决策
    ///
    /// 目录直接生成 CreateFolder；文件以 `concurrency` 并发查询远程元数据。
    /// 任务顺序与 Inventory 一致，保证目录排在其内容之前。
    /// cancel 触发后立即停止查询，返回的 Plan 标记为已取消。
    pub async fn plan(
        &self,
        inventory: &Inventory,
        store: Arc<dyn RemoteStore>,
        remote_root: &str,
        concurrency: usize,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Plan {
        let lookups = inventory.entries().iter().cloned().map(|entry| {
            let store = store.clone();
            let path = remote_path(remote_root, &entry.relative_path);
            async move {
                if entry.is_dir {
                    return (entry, Ok(None));
                }
                let label = format!("查询 {}", path);
                let result = retry
                    .run(&label, || store.get_metadata(&path))
                    .await;
                (entry, result)
            }
        });

        let results: Vec<_> = stream::iter(lookups)
            .buffered(concurrency.max(1))
            .take_until(cancel.cancelled())
            .collect()
            .await;

        let mut plan = Plan::default();
        if results.len() < inventory.len() {
            debug!("查询阶段被取消: {}/{}", results.len(), inventory.len());
            plan.cancelled = true;
        }

        for (entry, lookup) in results {
            let decision = lookup.and_then(|remote| self.decide(&entry, remote.as_ref()));
            match decision {
                Ok(kind) => plan.tasks.push(TransferTask::new(kind, entry, remote_root)),
                Err(e) => {
                    debug!("决策失败: {}: {}", entry.relative_path, e);
                    plan.failures.push(SyncFailure::new(entry.relative_path, &e));
                }
            }
        }

        plan
    }
}
