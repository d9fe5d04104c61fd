use crate::core::daemon::PassRunner;
use crate::core::engine::{SyncEngine, SyncOptions};
use crate::core::pattern::FilterSet;
use crate::core::scanner::FileScanner;
use crate::core::transfer::SyncResult;
use crate::db::SyncHistory;
use crate::storage::RemoteStore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 一个同步目标
#[derive(Clone)]
pub struct SyncTarget {
    pub name: String,
    pub store: Arc<dyn RemoteStore>,
    /// 目标内的目录
    pub remote_root: String,
}

/// 同步任务：一次扫描，依次同步到每个目标
pub struct SyncJob {
    root: PathBuf,
    filter: FilterSet,
    targets: Vec<SyncTarget>,
    options: SyncOptions,
    engine: SyncEngine,
    history: Option<SyncHistory>,
    reports: Option<mpsc::Sender<SyncResult>>,
}

impl SyncJob {
    pub fn new(
        root: impl Into<PathBuf>,
        filter: FilterSet,
        targets: Vec<SyncTarget>,
        options: SyncOptions,
    ) -> Self {
        Self {
            root: root.into(),
            filter,
            targets,
            options,
            engine: SyncEngine::new(),
            history: None,
            reports: None,
        }
    }

    /// 每次同步完成后写入历史记录
    pub fn with_history(mut self, history: SyncHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// 每次同步完成后把结果发送到该通道（满时丢弃）
    pub fn with_reports(mut self, reports: mpsc::Sender<SyncResult>) -> Self {
        self.reports = Some(reports);
        self
    }

    async fn report(&self, result: &SyncResult) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(result).await {
                warn!("写入同步历史失败: {}", e);
            }
        }
        if let Some(tx) = &self.reports {
            match tx.try_send(result.clone()) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => warn!("结果通道已满，丢弃 {}", result.pass_id),
            }
        }
    }
}

#[async_trait]
impl PassRunner for SyncJob {
    async fn run_pass(&self, cancel: CancellationToken) -> Vec<SyncResult> {
        let inventory = match FileScanner::new(self.filter.clone())
            .with_cancel(cancel.clone())
            .scan(&self.root)
            .await
        {
            Ok(inventory) => inventory,
            Err(e) => {
                error!("扫描失败: {}", e);
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            if cancel.is_cancelled() {
                info!("同步已取消，跳过目标 {}", target.name);
                break;
            }

            let options = SyncOptions {
                remote_root: target.remote_root.clone(),
                ..self.options.clone()
            };
            let mut result = self
                .engine
                .synchronize_inventory(&inventory, target.store.clone(), &options, cancel.clone())
                .await;
            result.target = target.name.clone();

            self.report(&result).await;
            results.push(result);
        }
        results
    }
}
