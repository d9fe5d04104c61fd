//! 常驻调度循环
//!
//! 启动后先执行一次同步，之后由定时器、文件变更事件或手动命令触发。
//! 同一时间最多一个同步在执行；执行期间的触发合并为一次待执行标记。

use crate::core::error::WatchError;
use crate::core::pattern::FilterSet;
use crate::core::transfer::SyncResult;
use crate::core::watcher::{ChangeEvent, ChangeWatcher, WatchConfig, WatchHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 控制通道容量
const COMMAND_BUFFER: usize = 16;

/// 执行一次同步
#[async_trait]
pub trait PassRunner: Send + Sync + 'static {
    /// cancel 触发后应尽快停止派发新任务
    async fn run_pass(&self, cancel: CancellationToken) -> Vec<SyncResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DaemonState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub watch_mode: bool,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub event_buffer: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            watch_mode: false,
            poll_interval: Duration::from_secs(1),
            debounce: Duration::from_secs(2),
            event_buffer: 100,
        }
    }
}

impl ScheduleConfig {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            poll_interval: self.poll_interval,
            debounce: self.debounce,
            capacity: self.event_buffer,
        }
    }

    fn watch_changed(&self, other: &ScheduleConfig) -> bool {
        self.watch_mode != other.watch_mode || self.watch_config_key() != other.watch_config_key()
    }

    fn watch_config_key(&self) -> (Duration, Duration, usize) {
        (self.poll_interval, self.debounce, self.event_buffer)
    }
}

#[derive(Debug, Clone)]
pub enum DaemonCommand {
    TriggerSync,
    ReloadConfig(ScheduleConfig),
    Shutdown,
}

/// 守护进程句柄
pub struct DaemonHandle {
    commands: mpsc::Sender<DaemonCommand>,
    state: watch::Receiver<DaemonState>,
    join: JoinHandle<()>,
}

impl DaemonHandle {
    pub async fn trigger(&self) -> Result<()> {
        self.send(DaemonCommand::TriggerSync).await
    }

    pub async fn reload(&self, config: ScheduleConfig) -> Result<()> {
        self.send(DaemonCommand::ReloadConfig(config)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(DaemonCommand::Shutdown).await
    }

    async fn send(&self, command: DaemonCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("守护进程已退出"))
    }

    /// 可克隆的命令发送端（用于信号处理）
    pub fn sender(&self) -> mpsc::Sender<DaemonCommand> {
        self.commands.clone()
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state.clone()
    }

    /// 等待调度循环退出
    pub async fn wait(self) -> Result<()> {
        self.join.await?;
        Ok(())
    }
}

struct RunningPass {
    handle: JoinHandle<Vec<SyncResult>>,
    cancel: CancellationToken,
}

struct RunningWatcher {
    handle: WatchHandle,
    cancel: CancellationToken,
}

pub struct Daemon {
    runner: Arc<dyn PassRunner>,
    root: PathBuf,
    filter: FilterSet,
    config: ScheduleConfig,
    cancel: CancellationToken,
    state: watch::Sender<DaemonState>,
    pass: Option<RunningPass>,
    watcher: Option<RunningWatcher>,
    pending: bool,
    passes: u64,
}

impl Daemon {
    /// 启动调度循环；cancel 触发等同于 Shutdown 命令
    pub fn start(
        runner: Arc<dyn PassRunner>,
        root: impl Into<PathBuf>,
        filter: FilterSet,
        config: ScheduleConfig,
        cancel: CancellationToken,
    ) -> DaemonHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(DaemonState::Idle);

        let daemon = Daemon {
            runner,
            root: root.into(),
            filter,
            config,
            cancel,
            state: state_tx,
            pass: None,
            watcher: None,
            pending: false,
            passes: 0,
        };
        let join = tokio::spawn(daemon.run(command_rx));

        DaemonHandle {
            commands: command_tx,
            state: state_rx,
            join,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<DaemonCommand>) {
        info!(
            "守护进程启动: {} (间隔 {:?}, 监视模式 {})",
            self.root.display(),
            self.config.interval,
            self.config.watch_mode
        );

        if self.config.watch_mode {
            self.start_watcher().await;
        }

        info!("执行初始同步");
        self.start_pass();
        let mut next_tick = Instant::now() + self.config.interval;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("收到取消信号，停止守护进程");
                    break;
                }
                command = commands.recv() => match command {
                    Some(DaemonCommand::TriggerSync) => {
                        debug!("手动触发同步");
                        self.trigger();
                    }
                    Some(DaemonCommand::ReloadConfig(config)) => {
                        self.reload(config).await;
                        next_tick = Instant::now() + self.config.interval;
                    }
                    Some(DaemonCommand::Shutdown) | None => {
                        info!("收到停止命令，停止守护进程");
                        break;
                    }
                },
                finished = join_pass(&mut self.pass) => {
                    self.pass = None;
                    self.finish_pass(finished);
                }
                _ = sleep_until(next_tick) => {
                    next_tick = Instant::now() + self.config.interval;
                    debug!("定时触发同步");
                    self.trigger();
                }
                signal = next_watch_signal(&mut self.watcher) => match signal {
                    WatchSignal::Event(event) => {
                        debug!("文件变更 {:?}: {}", event.kind, event.relative_path);
                        self.trigger();
                    }
                    WatchSignal::Error(err) => warn!("{}", err),
                    WatchSignal::Closed => {
                        warn!("文件监视器已退出");
                        self.watcher = None;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    fn set_state(&self, state: DaemonState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("守护进程状态: {:?} -> {:?}", previous, state);
        }
    }

    /// 空闲时立即开始；执行中只记录一次待执行
    fn trigger(&mut self) {
        if self.pass.is_some() {
            if !self.pending {
                debug!("同步进行中，合并触发");
            }
            self.pending = true;
        } else {
            self.start_pass();
        }
    }

    fn start_pass(&mut self) {
        let cancel = self.cancel.child_token();
        let runner = self.runner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run_pass(token).await });

        self.passes += 1;
        self.pass = Some(RunningPass { handle, cancel });
        self.set_state(DaemonState::Running);
    }

    fn finish_pass(&mut self, finished: Result<Vec<SyncResult>, JoinError>) {
        self.log_pass(finished);

        self.set_state(DaemonState::Idle);
        if self.pending {
            self.pending = false;
            debug!("执行合并的待执行同步");
            self.start_pass();
        }
    }

    fn log_pass(&self, finished: Result<Vec<SyncResult>, JoinError>) {
        match finished {
            Ok(results) if results.is_empty() => {
                warn!("第 {} 次同步没有产生结果（扫描失败或已取消）", self.passes);
            }
            Ok(results) => {
                for result in &results {
                    if result.is_success() {
                        info!(
                            "第 {} 次同步完成 [{}]: 成功 {}, 传输 {} 字节",
                            self.passes,
                            result.target,
                            result.succeeded(),
                            result.bytes_transferred
                        );
                    } else {
                        error!(
                            "第 {} 次同步存在失败 [{}]: 成功 {}, 失败 {}",
                            self.passes,
                            result.target,
                            result.succeeded(),
                            result.failed
                        );
                    }
                }
            }
            Err(e) => error!("同步任务异常退出: {}", e),
        }
    }

    async fn reload(&mut self, config: ScheduleConfig) {
        info!(
            "重新加载调度配置: 间隔 {:?}, 监视模式 {}",
            config.interval, config.watch_mode
        );
        let restart_watcher = self.config.watch_changed(&config);
        self.config = config;

        if restart_watcher {
            self.stop_watcher().await;
            if self.config.watch_mode {
                self.start_watcher().await;
            }
        }
    }

    async fn start_watcher(&mut self) {
        let cancel = self.cancel.child_token();
        match ChangeWatcher::spawn(
            &self.root,
            self.filter.clone(),
            self.config.watch_config(),
            cancel.clone(),
        )
        .await
        {
            Ok(handle) => self.watcher = Some(RunningWatcher { handle, cancel }),
            Err(e) => error!("启动文件监视器失败: {}", e),
        }
    }

    async fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.cancel.cancel();
            if let Err(e) = watcher.handle.join.await {
                warn!("文件监视器异常退出: {}", e);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.set_state(DaemonState::Stopping);

        if let Some(pass) = self.pass.take() {
            info!("等待进行中的同步结束");
            pass.cancel.cancel();
            let finished = pass.handle.await;
            self.pending = false;
            self.log_pass(finished);
        }

        self.stop_watcher().await;
        self.set_state(DaemonState::Stopped);
        info!("守护进程已停止");
    }
}

async fn join_pass(pass: &mut Option<RunningPass>) -> Result<Vec<SyncResult>, JoinError> {
    match pass {
        Some(pass) => (&mut pass.handle).await,
        None => std::future::pending().await,
    }
}

enum WatchSignal {
    Event(ChangeEvent),
    Error(WatchError),
    Closed,
}

/// 监视器的下一个事件或错误；未启用监视时永远挂起
async fn next_watch_signal(watcher: &mut Option<RunningWatcher>) -> WatchSignal {
    let Some(watcher) = watcher else {
        return std::future::pending().await;
    };
    let handle = &mut watcher.handle;
    tokio::select! {
        event = handle.events.recv() => match event {
            Some(event) => WatchSignal::Event(event),
            None => WatchSignal::Closed,
        },
        Some(err) = handle.errors.recv() => WatchSignal::Error(err),
    }
}
