use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use cloudsync_lib::config::{
    default_config_dir, default_config_path, AppConfig, StorageConfig,
};
use cloudsync_lib::core::{
    Daemon, DaemonCommand, FileScanner, PassRunner, SyncJob, SyncResult, SyncTarget,
};
use cloudsync_lib::logging::{LogConfig, SizeRotatingWriter};
use cloudsync_lib::{create_store, SyncHistory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudsync")]
#[command(version)]
#[command(about = "把本地目录同步到一个或多个远程存储")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行一次同步
    Sync {
        /// 只显示计划动作，不修改远程
        #[arg(long)]
        dry_run: bool,

        /// 只同步指定名称的目标
        #[arg(short, long)]
        target: Option<String>,
    },

    /// 常驻运行，按间隔或文件变更同步
    Daemon {
        /// 启用文件变更监视（覆盖配置）
        #[arg(short, long)]
        watch: bool,

        /// 同步间隔（覆盖配置），如 "30s"、"10m"
        #[arg(short, long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },

    /// 扫描源目录并打印结果
    Scan {
        /// 扫描的目录，默认使用配置中的 sourcePath
        path: Option<PathBuf>,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 查看同步历史
    History {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// 写出默认配置文件
    Init {
        /// 覆盖已有配置
        #[arg(long)]
        force: bool,
    },
}

/// 初始化日志系统
///
/// 守护模式额外写入大小轮转的日志文件（经 non_blocking 异步写入），返回的 guard 需持有到退出。
fn init_logging(
    config: &LogConfig,
    config_dir: &Path,
    verbose: bool,
    daemon: bool,
) -> Option<WorkerGuard> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };

    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["sqlx=warn", "opendal=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    // 文件日志层：仅守护模式且启用时存在
    let mut file_error = None;
    let (file_layer, guard) = if daemon && config.enabled {
        match SizeRotatingWriter::new(&config.log_dir(config_dir), config.max_size_mb) {
            Ok(file_writer) => {
                let (writer, guard) = tracing_appender::non_blocking(file_writer);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some(e);
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if let Some(e) = file_error {
        // 文件日志创建失败，只保留控制台
        warn!(
            "无法创建日志文件 {}: {}",
            config.log_dir(config_dir).display(),
            e
        );
    }
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Init { force } = cli.command {
        return init_command(&config_path, force);
    }

    let config = AppConfig::load(&config_path)?;
    let daemon_mode = matches!(cli.command, Commands::Daemon { .. });
    let _guard = init_logging(&config.log, &config_dir_of(&config_path), cli.verbose, daemon_mode);

    match cli.command {
        Commands::Sync { dry_run, target } => {
            sync_command(&config, &config_path, dry_run, target.as_deref()).await
        }
        Commands::Daemon { watch, interval } => {
            daemon_command(config, &config_path, watch, interval).await
        }
        Commands::Scan { path, json } => scan_command(&config, path, json).await,
        Commands::History { limit } => history_command(&config, &config_path, limit).await,
        Commands::Init { .. } => Ok(()),
    }
}

fn init_command(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("配置文件已存在: {} (使用 --force 覆盖)", path.display());
    }
    AppConfig::default().save(path)?;
    println!("已写入默认配置: {}", path.display());
    println!("请设置 general.sourcePath 并在 targets 中添加至少一个同步目标。");
    Ok(())
}

fn config_dir_of(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_dir)
}

async fn build_targets(config: &AppConfig, only: Option<&str>) -> Result<Vec<SyncTarget>> {
    let selected: Vec<&StorageConfig> = match only {
        Some(name) => vec![config
            .target(name)
            .ok_or_else(|| anyhow!("未找到同步目标: {}", name))?],
        None => config.targets.iter().collect(),
    };
    if selected.is_empty() {
        bail!("没有可用的同步目标");
    }

    let mut targets = Vec::with_capacity(selected.len());
    for target in selected {
        let store = create_store(target)
            .await
            .with_context(|| format!("无法初始化同步目标 {}", target.name))?;
        targets.push(SyncTarget {
            name: target.name.clone(),
            store,
            remote_root: target.destination_path.clone(),
        });
    }
    Ok(targets)
}

async fn open_history(config: &AppConfig, config_path: &Path) -> Option<SyncHistory> {
    if !config.history.enabled {
        return None;
    }
    let path = config.history_path(&config_dir_of(config_path));
    match SyncHistory::open(&path).await {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("同步历史不可用: {:#}", e);
            None
        }
    }
}

async fn build_job(
    config: &AppConfig,
    config_path: &Path,
    dry_run: bool,
    only: Option<&str>,
) -> Result<SyncJob> {
    config.validate()?;
    let targets = build_targets(config, only).await?;

    let mut job = SyncJob::new(
        config.source_path(),
        config.filter_set(),
        targets,
        config.sync_options(dry_run),
    );
    if !dry_run {
        if let Some(history) = open_history(config, config_path).await {
            job = job.with_history(history);
        }
    }
    Ok(job)
}

/// Ctrl-C 时取消
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到 Ctrl-C，停止派发新任务");
            token.cancel();
        }
    });
    cancel
}

fn print_result(result: &SyncResult) {
    let mode = if result.dry_run { " [dry-run]" } else { "" };
    println!(
        "{}{}: 建目录 {}, 新增 {}, 更新 {}, 跳过 {}, 失败 {}, 传输 {} 字节, 耗时 {}ms",
        result.target,
        mode,
        result.folders_created,
        result.created,
        result.updated,
        result.skipped,
        result.failed,
        result.bytes_transferred,
        result.duration_ms
    );
    for action in &result.planned {
        println!("  {:<14} {} ({} 字节)", action.action.to_string(), action.path, action.size);
    }
    for failure in &result.failures {
        println!("  失败 [{}] {}: {}", failure.kind, failure.path, failure.message);
    }
    if result.cancelled {
        println!("  已取消");
    }
}

async fn sync_command(
    config: &AppConfig,
    config_path: &Path,
    dry_run: bool,
    only: Option<&str>,
) -> Result<()> {
    let job = build_job(config, config_path, dry_run, only).await?;
    let results = job.run_pass(cancel_on_ctrl_c()).await;

    for result in &results {
        print_result(result);
    }
    pass_outcome(&results)
}

/// 手动同步的退出状态：只有扫描失败或没有执行任何目标时才算失败，
/// 条目失败只体现在摘要中
fn pass_outcome(results: &[SyncResult]) -> Result<()> {
    if results.is_empty() {
        bail!("同步未执行（扫描失败或已取消）");
    }
    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        warn!("{} 个目标同步未完全成功", failed);
    }
    Ok(())
}

async fn daemon_command(
    mut config: AppConfig,
    config_path: &Path,
    watch: bool,
    interval: Option<Duration>,
) -> Result<()> {
    if watch {
        config.daemon.watch_mode = true;
    }
    if let Some(interval) = interval {
        config.daemon.sync_interval = interval;
    }
    let job = build_job(&config, config_path, false, None).await?;

    let pid_file = config.daemon.pid_file.clone();
    if let Some(pid_file) = &pid_file {
        std::fs::write(pid_file, std::process::id().to_string())
            .with_context(|| format!("无法写入 PID 文件 {}", pid_file.display()))?;
    }

    let cancel = CancellationToken::new();
    let handle = Daemon::start(
        Arc::new(job),
        config.source_path(),
        config.filter_set(),
        config.schedule_config(),
        cancel.clone(),
    );

    let signals = tokio::spawn(forward_signals(
        handle.sender(),
        config_path.to_path_buf(),
        Overrides { watch, interval },
    ));

    let outcome = handle.wait().await;
    signals.abort();

    if let Some(pid_file) = &pid_file {
        let _ = std::fs::remove_file(pid_file);
    }

    if config.history.enabled {
        if let Some(history) = open_history(&config, config_path).await {
            match history.prune(config.history.keep).await {
                Ok(0) => {}
                Ok(n) => info!("清理了 {} 条旧的同步历史", n),
                Err(e) => warn!("清理同步历史失败: {}", e),
            }
            history.close().await;
        }
    }

    outcome
}

/// 命令行上覆盖的调度参数，重新加载时保持
#[derive(Clone, Copy)]
struct Overrides {
    watch: bool,
    interval: Option<Duration>,
}

/// 重新读取配置，只应用调度相关的部分
fn reload_schedule(config_path: &Path, overrides: Overrides) -> Result<DaemonCommand> {
    let mut config = AppConfig::load(config_path)?;
    if overrides.watch {
        config.daemon.watch_mode = true;
    }
    if let Some(interval) = overrides.interval {
        config.daemon.sync_interval = interval;
    }
    config.validate()?;
    Ok(DaemonCommand::ReloadConfig(config.schedule_config()))
}

async fn send(commands: &mpsc::Sender<DaemonCommand>, command: DaemonCommand) -> Result<()> {
    commands
        .send(command)
        .await
        .map_err(|_| anyhow!("守护进程已退出"))
}

/// SIGINT / SIGTERM -> Shutdown，SIGHUP -> ReloadConfig
#[cfg(unix)]
async fn forward_signals(
    commands: mpsc::Sender<DaemonCommand>,
    config_path: PathBuf,
    overrides: Overrides,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("收到 SIGINT，正在停止");
                return send(&commands, DaemonCommand::Shutdown).await;
            }
            _ = sigterm.recv() => {
                info!("收到 SIGTERM，正在停止");
                return send(&commands, DaemonCommand::Shutdown).await;
            }
            _ = sighup.recv() => {
                info!("收到 SIGHUP，重新加载配置");
                match reload_schedule(&config_path, overrides) {
                    Ok(command) => send(&commands, command).await?,
                    Err(e) => error!("重新加载配置失败: {:#}", e),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(
    commands: mpsc::Sender<DaemonCommand>,
    _config_path: PathBuf,
    _overrides: Overrides,
) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("收到 Ctrl-C，正在停止");
    send(&commands, DaemonCommand::Shutdown).await
}

async fn scan_command(config: &AppConfig, path: Option<PathBuf>, json: bool) -> Result<()> {
    let root = match path {
        Some(p) => p,
        None if !config.general.source_path.trim().is_empty() => config.source_path(),
        None => bail!("未指定扫描目录，且配置中没有 sourcePath"),
    };

    let inventory = FileScanner::new(config.filter_set()).scan(&root).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
        return Ok(());
    }

    for entry in &inventory {
        if entry.is_dir {
            println!("{:>12}  {:<32}  {}/", "-", "-", entry.relative_path);
        } else {
            println!(
                "{:>12}  {:<32}  {}",
                entry.size,
                entry.content_hash.as_deref().unwrap_or("-"),
                entry.relative_path
            );
        }
    }
    println!(
        "共 {} 个文件, {} 个目录, {} 字节",
        inventory.file_count(),
        inventory.dir_count(),
        inventory.total_bytes()
    );
    Ok(())
}

async fn history_command(config: &AppConfig, config_path: &Path, limit: u32) -> Result<()> {
    let path = config.history_path(&config_dir_of(config_path));
    if !path.exists() {
        println!("暂无同步历史");
        return Ok(());
    }

    let history = SyncHistory::open(&path).await?;
    let records = history.recent(limit).await?;
    history.close().await;

    if records.is_empty() {
        println!("暂无同步历史");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<12} 新增 {:>5}  更新 {:>5}  跳过 {:>5}  失败 {:>4}  {:>12} 字节  {}{}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.target,
            record.created,
            record.updated,
            record.skipped,
            record.failed,
            record.bytes_transferred,
            humantime::format_duration(Duration::from_millis(record.duration_ms)),
            if record.cancelled { "  (已取消)" } else { "" }
        );
    }
    Ok(())
}
