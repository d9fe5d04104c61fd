use crate::core::comparator::FileComparator;
use crate::core::error::{RemoteError, ScanError};
use crate::core::pattern::FilterSet;
use crate::core::retry::RetryPolicy;
use crate::core::scanner::{FileScanner, Inventory};
use crate::core::transfer::{remote_path, PlannedAction, SyncResult, TaskKind, TransferTask};
use crate::storage::{FolderStatus, RemoteStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 最大并发传输数（至少为 1）
    pub concurrency: usize,
    /// Transient 错误的额外重试次数
    pub retry_attempts: u32,
    /// 重试基础延迟，第 n 次重试等待 base * 2^n
    pub retry_base_delay: Duration,
    /// 只决策不执行
    pub dry_run: bool,
    /// 远程根目录，空字符串表示存储根
    pub remote_root: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            dry_run: false,
            remote_root: String::new(),
        }
    }
}

impl SyncOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_base_delay)
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// 目录任务的完成状态，子任务据此等待父目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderGate {
    Pending,
    Ready,
    Failed,
}

/// 单个任务的执行结果
struct TaskOutcome {
    kind: TaskKind,
    bytes: u64,
    folder_status: Option<FolderStatus>,
}

/// 同步引擎
pub struct SyncEngine {
    comparator: FileComparator,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            comparator: FileComparator::default(),
        }
    }

    /// 扫描 root 并同步到 store
    ///
    /// 只有扫描失败会返回错误；单个条目的失败记录在 SyncResult 中。
    pub async fn synchronize(
        &self,
        root: &Path,
        filter: &FilterSet,
        store: Arc<dyn RemoteStore>,
        options: &SyncOptions,
        cancel: CancellationToken,
    ) -> Result<SyncResult, ScanError> {
        let inventory = FileScanner::new(filter.clone())
            .with_cancel(cancel.clone())
            .scan(root)
            .await?;
        Ok(self
            .synchronize_inventory(&inventory, store, options, cancel)
            .await)
    }

    /// 使用已有的扫描结果同步（多个目标共享一次扫描）
    pub async fn synchronize_inventory(
        &self,
        inventory: &Inventory,
        store: Arc<dyn RemoteStore>,
        options: &SyncOptions,
        cancel: CancellationToken,
    ) -> SyncResult {
        let mut result = SyncResult::new(store.name(), options.dry_run);
        let policy = options.retry_policy();

        info!(
            "开始同步: {} -> {} ({} 个条目, dry_run={})",
            inventory.root().display(),
            store.name(),
            inventory.len(),
            options.dry_run
        );

        if cancel.is_cancelled() {
            result.cancelled = true;
            result.finish();
            return result;
        }

        if !options.dry_run {
            if let Err(e) = ensure_remote_root(store.as_ref(), &options.remote_root, policy).await
            {
                error!("无法创建远程根目录 {}: {}", options.remote_root, e);
                for entry in inventory {
                    result.record_failure(entry.relative_path.clone(), &e);
                }
                result.finish();
                return result;
            }
        }

        let plan = self
            .comparator
            .plan(
                inventory,
                store.clone(),
                &options.remote_root,
                options.effective_concurrency(),
                policy,
                &cancel,
            )
            .await;

        if plan.cancelled {
            info!("同步在查询阶段被取消: {}", store.name());
            result.cancelled = true;
            result.finish();
            return result;
        }

        debug!(
            "计划: 建目录 {}, 新增 {}, 更新 {}, 待上传 {} 字节",
            plan.count(TaskKind::CreateFolder),
            plan.count(TaskKind::Upload { overwrite: false }),
            plan.count(TaskKind::Upload { overwrite: true }),
            plan.upload_bytes()
        );

        for failure in plan.failures {
            result.failed += 1;
            result.failures.push(failure);
        }

        if options.dry_run {
            for task in &plan.tasks {
                result.record_success(task.kind, 0);
                result.planned.push(PlannedAction {
                    path: task.entry.relative_path.clone(),
                    action: task.kind,
                    size: task.entry.size,
                });
            }
            result.finish();
            info!(
                "[dry-run] {}: 建目录 {}, 新增 {}, 更新 {}, 跳过 {}, 失败 {}",
                store.name(),
                result.folders_created,
                result.created,
                result.updated,
                result.skipped,
                result.failed
            );
            return result;
        }

        self.execute(plan.tasks, store.clone(), options, policy, &cancel, &mut result)
            .await;

        result.finish();
        info!(
            "同步完成: {} 建目录 {}, 新增 {}, 更新 {}, 跳过 {}, 失败 {}, 传输 {} 字节, 耗时 {}ms{}",
            store.name(),
            result.folders_created,
            result.created,
            result.updated,
            result.skipped,
            result.failed,
            result.bytes_transferred,
            result.duration_ms,
            if result.cancelled { " (已取消)" } else { "" }
        );
        result
    }

    /// 有界并发执行任务
    async fn execute(
        &self,
        tasks: Vec<TransferTask>,
        store: Arc<dyn RemoteStore>,
        options: &SyncOptions,
        policy: RetryPolicy,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) {
        let semaphore = Arc::new(Semaphore::new(options.effective_concurrency()));

        // 每个 CreateFolder 任务一个 gate
        let mut gate_senders: HashMap<String, watch::Sender<FolderGate>> = HashMap::new();
        let mut gates: HashMap<String, watch::Receiver<FolderGate>> = HashMap::new();
        for task in &tasks {
            if task.kind == TaskKind::CreateFolder {
                let (tx, rx) = watch::channel(FolderGate::Pending);
                gate_senders.insert(task.remote_path.clone(), tx);
                gates.insert(task.remote_path.clone(), rx);
            }
        }

        let mut handles: Vec<(String, JoinHandle<Result<TaskOutcome, RemoteError>>)> =
            Vec::new();

        for task in tasks {
            if task.kind == TaskKind::Skip {
                result.record_success(TaskKind::Skip, 0);
                continue;
            }

            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let parent_gate = task
                .entry
                .parent()
                .map(|parent| remote_path(&options.remote_root, parent))
                .and_then(|parent| gates.get(&parent).cloned());
            let own_gate = if task.kind == TaskKind::CreateFolder {
                gate_senders.remove(&task.remote_path)
            } else {
                None
            };

            let store = store.clone();
            let path = task.entry.relative_path.clone();

            let handle = tokio::spawn(async move {
                let outcome = run_task(task, store.as_ref(), policy, parent_gate, own_gate).await;
                drop(permit);
                outcome
            });
            handles.push((path, handle));
        }

        // 未派发的目录 gate 在此释放
        drop(gate_senders);

        // 等待所有已派发任务完成
        for (path, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => match outcome.folder_status {
                    Some(FolderStatus::AlreadyExists) => result.record_success(TaskKind::Skip, 0),
                    _ => result.record_success(outcome.kind, outcome.bytes),
                },
                Ok(Err(e)) => {
                    warn!("同步失败: {}: {}", path, e);
                    result.record_failure(path, &e);
                }
                Err(e) => {
                    error!("任务异常退出: {}: {}", path, e);
                    result.record_failure(path, &RemoteError::permanent(e.to_string()));
                }
            }
        }
    }
}

/// 执行单个任务（含父目录等待与重试）
async fn run_task(
    task: TransferTask,
    store: &dyn RemoteStore,
    policy: RetryPolicy,
    parent_gate: Option<watch::Receiver<FolderGate>>,
    own_gate: Option<watch::Sender<FolderGate>>,
) -> Result<TaskOutcome, RemoteError> {
    // 任务异常退出时也要释放等待中的子任务
    let own_gate = own_gate.map(|tx| {
        scopeguard::guard(tx, |tx| {
            tx.send_if_modified(|state| {
                if *state == FolderGate::Pending {
                    *state = FolderGate::Failed;
                    true
                } else {
                    false
                }
            });
        })
    });

    if let Some(gate) = parent_gate {
        if !wait_for_folder(gate).await {
            let parent = task.entry.parent().unwrap_or_default();
            return Err(RemoteError::permanent(format!("父目录创建失败: {}", parent)));
        }
    }

    let outcome = match task.kind {
        TaskKind::CreateFolder => {
            debug!("创建目录: {}", task.remote_path);
            let status = policy
                .run(&format!("创建目录 {}", task.remote_path), || {
                    store.create_folder(&task.remote_path)
                })
                .await;
            if let Some(gate) = &own_gate {
                let state = if status.is_ok() {
                    FolderGate::Ready
                } else {
                    FolderGate::Failed
                };
                gate.send_replace(state);
            }
            TaskOutcome {
                kind: task.kind,
                bytes: 0,
                folder_status: Some(status?),
            }
        }
        TaskKind::Upload { overwrite } => {
            debug!(
                "上传: {} -> {} ({} 字节, overwrite={})",
                task.entry.relative_path, task.remote_path, task.entry.size, overwrite
            );
            policy
                .run(&format!("上传 {}", task.remote_path), || {
                    store.upload(&task.entry.absolute_path, &task.remote_path)
                })
                .await?;
            TaskOutcome {
                kind: task.kind,
                bytes: task.entry.size,
                folder_status: None,
            }
        }
        TaskKind::Skip => TaskOutcome {
            kind: task.kind,
            bytes: 0,
            folder_status: None,
        },
    };

    Ok(outcome)
}

/// 等待父目录完成，返回是否创建成功
async fn wait_for_folder(mut gate: watch::Receiver<FolderGate>) -> bool {
    loop {
        let state = *gate.borrow_and_update();
        match state {
            FolderGate::Ready => return true,
            FolderGate::Failed => return false,
            FolderGate::Pending => {}
        }
        if gate.changed().await.is_err() {
            return *gate.borrow() == FolderGate::Ready;
        }
    }
}

/// 逐级创建远程根目录
async fn ensure_remote_root(
    store: &dyn RemoteStore,
    remote_root: &str,
    policy: RetryPolicy,
) -> Result<(), RemoteError> {
    let mut current = String::new();
    for segment in remote_root.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        let status = policy
            .run(&format!("创建远程根目录 {}", current), || {
                store.create_folder(&current)
            })
            .await?;
        debug!("远程根目录 {}: {:?}", current, status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::fs;

    #[tokio::test]
    async fn test_remote_root_is_created() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("c.txt"), "yo").unwrap();

        let store = Arc::new(MemoryStore::new("t"));
        let options = SyncOptions {
            remote_root: "backup/daily".to_string(),
            ..Default::default()
        };
        let result = SyncEngine::new()
            .synchronize(
                dir.path(),
                &FilterSet::empty(),
                store.clone(),
                &options,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.is_success(), "{:?}", result.failures);
        assert_eq!(
            store.read("backup/daily/b/c.txt").await,
            Some(b"yo".to_vec())
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();

        let store = Arc::new(MemoryStore::new("t"));
        let cancel = CancellationToken::new();
        let inventory = FileScanner::new(FilterSet::empty())
            .scan_blocking(dir.path())
            .unwrap();
        cancel.cancel();

        let result = SyncEngine::new()
            .synchronize_inventory(&inventory, store.clone(), &SyncOptions::default(), cancel)
            .await;
        assert!(result.cancelled);
        assert_eq!(result.succeeded(), 0);
        assert!(store.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_folder() {
        let (tx, rx) = watch::channel(FolderGate::Pending);
        let waiter = tokio::spawn(wait_for_folder(rx));
        tx.send_replace(FolderGate::Ready);
        assert!(waiter.await.unwrap());

        let (tx, rx) = watch::channel(FolderGate::Pending);
        drop(tx);
        assert!(!wait_for_folder(rx).await);
    }
}
