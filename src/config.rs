//! 应用配置模块

use crate::core::daemon::ScheduleConfig;
use crate::core::engine::SyncOptions;
use crate::core::pattern::FilterSet;
use crate::logging::LogConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 配置文件名
pub const CONFIG_FILE: &str = "config.json";

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
    WebDav,
    Memory,
}

/// 同步目标的存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webdav_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// 目标存储内的目录，如 "backups/documents"
    #[serde(default)]
    pub destination_path: String,
}

impl StorageConfig {
    pub fn local(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            typ: StorageType::Local,
            path: Some(path.to_string()),
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: None,
            webdav_endpoint: None,
            username: None,
            password: None,
            root: None,
            destination_path: String::new(),
        }
    }
}

/// 通用同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    /// 要同步的本地目录
    #[serde(default)]
    pub source_path: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay", with = "humantime_serde")]
    pub retry_base_delay: Duration,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_ignore_patterns() -> Vec<String> {
    [".git/", ".DS_Store", "Thumbs.db", "*.tmp", "*.temp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            source_path: String::new(),
            max_concurrency: default_max_concurrency(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay: default_retry_base_delay(),
            ignore_patterns: default_ignore_patterns(),
            include_patterns: Vec::new(),
        }
    }
}

/// 守护进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default = "default_sync_interval", with = "humantime_serde")]
    pub sync_interval: Duration,
    #[serde(default)]
    pub watch_mode: bool,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// 守护进程运行期间写入 PID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<PathBuf>,
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_debounce() -> Duration {
    Duration::from_secs(2)
}

fn default_event_buffer() -> usize {
    100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sync_interval: default_sync_interval(),
            watch_mode: false,
            poll_interval: default_poll_interval(),
            debounce: default_debounce(),
            event_buffer: default_event_buffer(),
            pid_file: None,
        }
    }
}

/// 同步历史配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
    /// 为空时使用配置目录下的 history.db
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// 最多保留的记录数
    #[serde(default = "default_history_keep")]
    pub keep: u32,
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_keep() -> u32 {
    500
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            path: None,
            keep: default_history_keep(),
        }
    }
}

/// 完整配置（config.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub targets: Vec<StorageConfig>,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl AppConfig {
    /// 读取配置文件；不存在时写出默认配置
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("已创建默认配置文件: {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        let mut config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("无法解析配置文件 {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// 保存配置
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("无法写入配置文件 {}", path.display()))?;
        Ok(())
    }

    /// 环境变量中的凭据优先于配置文件
    pub fn apply_env_overrides(&mut self) {
        let access_key = std::env::var("CLOUDSYNC_S3_ACCESS_KEY").ok();
        let secret_key = std::env::var("CLOUDSYNC_S3_SECRET_KEY").ok();
        let webdav_password = std::env::var("CLOUDSYNC_WEBDAV_PASSWORD").ok();

        for target in &mut self.targets {
            match target.typ {
                StorageType::S3 => {
                    if access_key.is_some() {
                        target.access_key = access_key.clone();
                    }
                    if secret_key.is_some() {
                        target.secret_key = secret_key.clone();
                    }
                }
                StorageType::WebDav => {
                    if webdav_password.is_some() {
                        target.password = webdav_password.clone();
                    }
                }
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.source_path.trim().is_empty() {
            bail!("general.sourcePath 不能为空");
        }
        if self.general.max_concurrency == 0 {
            bail!("general.maxConcurrency 必须大于 0");
        }
        if self.targets.is_empty() {
            bail!("至少需要配置一个同步目标 (targets)");
        }
        if self.daemon.sync_interval.is_zero() {
            bail!("daemon.syncInterval 必须大于 0");
        }
        if self.daemon.poll_interval.is_zero() {
            bail!("daemon.pollInterval 必须大于 0");
        }

        let mut names = std::collections::HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                bail!("同步目标的 name 不能为空");
            }
            if !names.insert(target.name.as_str()) {
                bail!("同步目标名称重复: {}", target.name);
            }
        }
        Ok(())
    }

    pub fn source_path(&self) -> PathBuf {
        PathBuf::from(&self.general.source_path)
    }

    pub fn target(&self, name: &str) -> Option<&StorageConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn filter_set(&self) -> FilterSet {
        FilterSet::new(
            &self.general.ignore_patterns,
            &self.general.include_patterns,
        )
    }

    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        SyncOptions {
            concurrency: self.general.max_concurrency,
            retry_attempts: self.general.retry_attempts,
            retry_base_delay: self.general.retry_base_delay,
            dry_run,
            remote_root: String::new(),
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: self.daemon.sync_interval,
            watch_mode: self.daemon.watch_mode,
            poll_interval: self.daemon.poll_interval,
            debounce: self.daemon.debounce,
            event_buffer: self.daemon.event_buffer,
        }
    }

    /// 历史数据库路径
    pub fn history_path(&self, config_dir: &Path) -> PathBuf {
        self.history
            .path
            .clone()
            .unwrap_or_else(|| config_dir.join("history.db"))
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("cloudsync"))
        .unwrap_or_else(|| PathBuf::from(".cloudsync"))
}

/// 默认配置文件路径
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE)
}
