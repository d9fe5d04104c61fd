pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, StorageConfig, StorageType};
pub use core::{
    FilterSet, SyncEngine, SyncJob, SyncOptions, SyncResult, SyncTarget,
};
pub use db::SyncHistory;
pub use storage::{create_store, RemoteStore};

/// 平台相关的配置目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux: 优先 XDG_CONFIG_HOME
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
