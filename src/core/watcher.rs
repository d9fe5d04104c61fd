//! 轮询式文件变更监视
//!
//! 定期重新扫描（不计算哈希），与上一次快照比较得到变更事件，
//! 按路径去抖后通过有界通道投递。通道已满时丢弃新事件。

use crate::core::error::WatchError;
use crate::core::pattern::FilterSet;
use crate::core::scanner::{FileScanner, Inventory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 错误通道容量
const ERROR_BUFFER: usize = 16;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// 同一路径两次事件之间的最小间隔
    pub debounce: Duration,
    /// 事件通道容量
    pub capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(2),
            capacity: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub is_dir: bool,
    pub timestamp: DateTime<Utc>,
}

/// 按路径去抖
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_emitted: HashMap<String, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emitted: HashMap::new(),
        }
    }

    /// 窗口内已发出过事件的路径返回 false；只有放行时才更新时间
    pub fn should_emit(&mut self, path: &str, now: Instant) -> bool {
        if let Some(last) = self.last_emitted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_emitted.insert(path.to_string(), now);
        true
    }

    /// 清理过期记录
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    size: u64,
    modified: DateTime<Utc>,
    is_dir: bool,
}

/// 上一次扫描的视图，只由监视任务持有
#[derive(Debug, Default)]
struct WatchState {
    entries: HashMap<String, Snapshot>,
}

impl WatchState {
    fn from_inventory(inventory: &Inventory) -> Self {
        let entries = inventory
            .iter()
            .map(|e| {
                (
                    e.relative_path.clone(),
                    Snapshot {
                        size: e.size,
                        modified: e.modified,
                        is_dir: e.is_dir,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// 与新视图比较，结果按路径排序；目录只报告新增与删除
    fn diff(&self, next: &WatchState) -> Vec<Change> {
        let mut changes = Vec::new();

        for (path, snap) in &next.entries {
            match self.entries.get(path) {
                None => changes.push((path.clone(), ChangeKind::Created, snap.is_dir)),
                Some(old) if old.is_dir != snap.is_dir => {
                    changes.push((path.clone(), ChangeKind::Removed, old.is_dir));
                    changes.push((path.clone(), ChangeKind::Created, snap.is_dir));
                }
                Some(old) if !snap.is_dir && old != snap => {
                    changes.push((path.clone(), ChangeKind::Modified, false))
                }
                Some(_) => {}
            }
        }

        for (path, snap) in &self.entries {
            if !next.entries.contains_key(path) {
                changes.push((path.clone(), ChangeKind::Removed, snap.is_dir));
            }
        }

        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }
}

/// 监视器句柄
#[derive(Debug)]
pub struct WatchHandle {
    pub events: mpsc::Receiver<ChangeEvent>,
    pub errors: mpsc::Receiver<WatchError>,
    pub join: JoinHandle<()>,
}

impl WatchHandle {
    /// 以 Stream 形式消费事件；错误通道随之关闭
    pub fn into_stream(self) -> ReceiverStream<ChangeEvent> {
        ReceiverStream::new(self.events)
    }
}

pub struct ChangeWatcher;

impl ChangeWatcher {
    /// 完成初始扫描后启动轮询任务；初始扫描失败直接返回错误
    pub async fn spawn(
        root: &Path,
        filter: FilterSet,
        config: WatchConfig,
        cancel: CancellationToken,
    ) -> Result<WatchHandle, WatchError> {
        let scanner = FileScanner::new(filter).without_hashes();
        let initial = scanner.scan(root).await.map_err(WatchError::Init)?;
        let state = WatchState::from_inventory(&initial);

        info!(
            "开始监视: {} ({} 个条目, 轮询间隔 {:?}, 去抖 {:?})",
            root.display(),
            state.entries.len(),
            config.poll_interval,
            config.debounce
        );

        let (event_tx, event_rx) = mpsc::channel(config.capacity.max(1));
        let (error_tx, error_rx) = mpsc::channel(ERROR_BUFFER);

        let join = tokio::spawn(poll_loop(
            root.to_path_buf(),
            scanner,
            state,
            config,
            event_tx,
            error_tx,
            cancel,
        ));

        Ok(WatchHandle {
            events: event_rx,
            errors: error_rx,
            join,
        })
    }
}

type Change = (String, ChangeKind, bool);

/// 每个路径每轮只判断一次去抖：类型改变产生的 Removed/Created 一起放行或一起抑制
fn debounce_changes(debouncer: &mut Debouncer, changes: Vec<Change>, now: Instant) -> Vec<Change> {
    let mut emitted = Vec::with_capacity(changes.len());
    let mut current: Option<(String, bool)> = None;

    for (path, kind, is_dir) in changes {
        let allowed = match &current {
            Some((last, allowed)) if *last == path => *allowed,
            _ => {
                let allowed = debouncer.should_emit(&path, now);
                current = Some((path.clone(), allowed));
                allowed
            }
        };
        if allowed {
            emitted.push((path, kind, is_dir));
        } else {
            debug!("去抖抑制: {} {:?}", path, kind);
        }
    }
    emitted
}

async fn poll_loop(
    root: PathBuf,
    scanner: FileScanner,
    mut state: WatchState,
    config: WatchConfig,
    event_tx: mpsc::Sender<ChangeEvent>,
    error_tx: mpsc::Sender<WatchError>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(config.debounce);
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 第一次 tick 立即返回
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("监视器停止: {}", root.display());
                return;
            }
            _ = ticker.tick() => {}
        }

        let next = match scanner.scan(&root).await {
            Ok(inventory) => WatchState::from_inventory(&inventory),
            Err(e) => {
                warn!("轮询扫描失败: {}", e);
                if let Err(TrySendError::Full(e)) = error_tx.try_send(WatchError::Poll(e)) {
                    warn!("错误通道已满，丢弃: {}", e);
                }
                continue;
            }
        };

        let changes = state.diff(&next);
        state = next;

        let now = Instant::now();
        for (path, kind, is_dir) in debounce_changes(&mut debouncer, changes, now) {
            let event = ChangeEvent {
                relative_path: path,
                kind,
                is_dir,
                timestamp: Utc::now(),
            };
            match event_tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!(
                        "事件通道已满，丢弃事件: {} {:?}",
                        event.relative_path, event.kind
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("事件接收端已关闭，监视器退出");
                    return;
                }
            }
        }
        debouncer.prune(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debouncer_suppresses_within_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(2));

        assert!(debouncer.should_emit("a.txt", start));
        assert!(!debouncer.should_emit("a.txt", start + Duration::from_millis(500)));
        assert!(debouncer.should_emit("b.txt", start + Duration::from_millis(500)));
        // 被抑制的事件不刷新窗口
        assert!(debouncer.should_emit("a.txt", start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_debouncer_prune() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(1));
        debouncer.should_emit("a", start);
        debouncer.should_emit("b", start + Duration::from_millis(900));
        debouncer.prune(start + Duration::from_millis(1500));
        assert_eq!(debouncer.len(), 1);
    }

    fn snap(size: u64, secs: i64, is_dir: bool) -> Snapshot {
        Snapshot {
            size,
            modified: DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            is_dir,
        }
    }

    #[test]
    fn test_diff() {
        let mut old = WatchState::default();
        old.entries.insert("a.txt".into(), snap(1, 10, false));
        old.entries.insert("b".into(), snap(0, 10, true));
        old.entries.insert("gone.txt".into(), snap(1, 10, false));

        let mut next = WatchState::default();
        next.entries.insert("a.txt".into(), snap(2, 10, false));
        // 目录时间变化不报告
        next.entries.insert("b".into(), snap(0, 20, true));
        next.entries.insert("new.txt".into(), snap(1, 10, false));

        let changes = old.diff(&next);
        assert_eq!(
            changes,
            vec![
                ("a.txt".to_string(), ChangeKind::Modified, false),
                ("gone.txt".to_string(), ChangeKind::Removed, false),
                ("new.txt".to_string(), ChangeKind::Created, false),
            ]
        );
    }

    #[test]
    fn test_type_change_emits_both_events() {
        let mut old = WatchState::default();
        old.entries.insert("x".into(), snap(1, 10, false));
        let mut next = WatchState::default();
        next.entries.insert("x".into(), snap(0, 20, true));
        next.entries.insert("y.txt".into(), snap(1, 10, false));

        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        let emitted = debounce_changes(&mut debouncer, old.diff(&next), start);
        assert_eq!(
            emitted,
            vec![
                ("x".to_string(), ChangeKind::Removed, false),
                ("x".to_string(), ChangeKind::Created, true),
                ("y.txt".to_string(), ChangeKind::Created, false),
            ]
        );

        // 窗口内再次改变类型，整组被抑制
        let emitted = debounce_changes(
            &mut debouncer,
            next.diff(&old),
            start + Duration::from_millis(500),
        );
        assert!(emitted.is_empty());
    }
}
