#![allow(dead_code)]

use async_trait::async_trait;
use cloudsync_lib::core::{RemoteError, RemoteErrorKind};
use cloudsync_lib::storage::{
    DeleteStatus, FolderStatus, MemoryStore, RemoteFileInfo, RemoteStore,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 写入文件，自动创建父目录
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

struct Injected {
    kind: RemoteErrorKind,
    /// None 表示一直失败
    remaining: Option<u32>,
}

/// 包装 MemoryStore：统计并发与调用次数，可按路径注入失败
pub struct FlakyStore {
    inner: MemoryStore,
    upload_delay: Duration,
    lookup_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    mutations: AtomicUsize,
    failures: Mutex<HashMap<String, Injected>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new("flaky"),
            upload_delay: Duration::ZERO,
            lookup_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// 让 path 上的写操作失败；times 为 None 时一直失败
    pub fn fail(&self, path: &str, kind: RemoteErrorKind, times: Option<u32>) {
        self.failures.lock().unwrap().insert(
            path.to_string(),
            Injected {
                kind,
                remaining: times,
            },
        );
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// create_folder / upload / delete 的调用总数
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// 某个路径上写操作的调用次数
    pub fn calls(&self, path: &str) -> u32 {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn record_call(&self, path: &str) -> Result<(), RemoteError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(path.to_string()).or_insert(0) += 1;

        let mut failures = self.failures.lock().unwrap();
        let Some(injected) = failures.get_mut(path) else {
            return Ok(());
        };
        match injected.remaining {
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(RemoteError::new(injected.kind, format!("注入失败: {}", path)))
            }
            None => Err(RemoteError::new(injected.kind, format!("注入失败: {}", path))),
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn get_metadata(&self, path: &str) -> Result<Option<RemoteFileInfo>, RemoteError> {
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
        self.inner.get_metadata(path).await
    }

    async fn create_folder(&self, path: &str) -> Result<FolderStatus, RemoteError> {
        self.record_call(path)?;
        self.inner.create_folder(path).await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let outcome = async {
            self.record_call(remote)?;
            if !self.upload_delay.is_zero() {
                tokio::time::sleep(self.upload_delay).await;
            }
            self.inner.upload(local, remote).await
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn delete(&self, path: &str) -> Result<DeleteStatus, RemoteError> {
        self.record_call(path)?;
        self.inner.delete(path).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
