use crate::core::error::{HashError, ScanError};
use crate::core::pattern::FilterSet;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 一次扫描发现的文件或目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// 相对同步根目录的路径，使用 `/` 分隔
    pub relative_path: String,
    /// 本地绝对路径
    pub absolute_path: PathBuf,
    pub is_dir: bool,
    /// 文件大小；目录恒为 0
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// 内容 MD5（小写十六进制）；目录、空文件、哈希失败时为 None
    pub content_hash: Option<String>,
}

impl Entry {
    /// 父目录的相对路径，顶层条目返回 None
    pub fn parent(&self) -> Option<&str> {
        self.relative_path.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub fn is_empty_file(&self) -> bool {
        !self.is_dir && self.size == 0
    }
}

/// 一次扫描的完整结果，生成后不再修改
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    root: PathBuf,
    entries: Vec<Entry>,
}

impl Inventory {
    pub fn new(root: PathBuf, entries: Vec<Entry>) -> Self {
        Self { root, entries }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, relative_path: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.relative_path == relative_path)
    }

    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir).count()
    }

    pub fn dir_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dir).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// 扫描选项
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub compute_hashes: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            compute_hashes: true,
        }
    }
}

/// 文件扫描器
#[derive(Debug, Clone)]
pub struct FileScanner {
    filter: FilterSet,
    options: ScanOptions,
    cancel: Option<CancellationToken>,
}

impl FileScanner {
    pub fn new(filter: FilterSet) -> Self {
        Self::with_options(filter, ScanOptions::default())
    }

    pub fn with_options(filter: FilterSet, options: ScanOptions) -> Self {
        Self {
            filter,
            options,
            cancel: None,
        }
    }

    /// 只收集大小和修改时间（监视器使用）
    pub fn without_hashes(mut self) -> Self {
        self.options.compute_hashes = false;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }

    /// 在阻塞线程池中扫描
    pub async fn scan(&self, root: &Path) -> Result<Inventory, ScanError> {
        let scanner = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root))
            .await
            .map_err(|e| ScanError::Aborted(e.to_string()))?
    }

    /// 深度优先遍历 root，返回过滤后的条目
    pub fn scan_blocking(&self, root: &Path) -> Result<Inventory, ScanError> {
        let metadata = std::fs::metadata(root).map_err(|source| ScanError::RootInaccessible {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ScanError::RootInaccessible {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "不是目录"),
            });
        }

        debug!("开始扫描: {}", root.display());

        let mut entries = Vec::new();
        let mut ignored = 0usize;
        let mut excluded = 0usize;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                // 根目录本身不参与过滤
                if e.depth() == 0 {
                    return true;
                }
                let Some(rel) = relative_path(root, e.path()) else {
                    return false;
                };
                let is_dir = e.file_type().is_dir();
                if self.filter.should_ignore(&rel, is_dir) {
                    // 被忽略的目录整棵子树都不会再进入
                    debug!("忽略: {}", rel);
                    ignored += 1;
                    return false;
                }
                true
            });

        for item in walker {
            if entries.len() % 100 == 0 && self.is_cancelled() {
                return Err(ScanError::Aborted("扫描已取消".to_string()));
            }

            let dir_entry = match item {
                Ok(e) => e,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    let depth = err.depth();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "符号链接循环"));
                    if depth == 0 {
                        return Err(ScanError::RootInaccessible { path, source });
                    }
                    if source.kind() == io::ErrorKind::NotFound {
                        // 扫描期间被删除
                        debug!("条目已消失，跳过: {}", path.display());
                        continue;
                    }
                    return Err(ScanError::Traversal { path, source });
                }
            };

            if dir_entry.depth() == 0 {
                continue;
            }

            let file_type = dir_entry.file_type();
            if file_type.is_symlink() {
                debug!("跳过符号链接: {}", dir_entry.path().display());
                continue;
            }

            let Some(rel) = relative_path(root, dir_entry.path()) else {
                continue;
            };
            let is_dir = file_type.is_dir();

            if !self.filter.should_include(&rel, is_dir) {
                excluded += 1;
                continue;
            }

            let metadata = match dir_entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "无法读取元数据"));
                    if source.kind() == io::ErrorKind::NotFound {
                        debug!("条目已消失，跳过: {}", rel);
                        continue;
                    }
                    return Err(ScanError::Traversal {
                        path: dir_entry.path().to_path_buf(),
                        source,
                    });
                }
            };

            let size = if is_dir { 0 } else { metadata.len() };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

            let content_hash = if self.options.compute_hashes && !is_dir && size > 0 {
                match hash_file(dir_entry.path()) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                }
            } else {
                None
            };

            entries.push(Entry {
                relative_path: rel,
                absolute_path: dir_entry.path().to_path_buf(),
                is_dir,
                size,
                modified,
                content_hash,
            });
        }

        let inventory = Inventory::new(root.to_path_buf(), entries);
        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个被忽略, {} 个未包含",
            inventory.file_count(),
            inventory.dir_count(),
            ignored,
            excluded
        );

        Ok(inventory)
    }
}

/// 扫描 root 并计算内容哈希
pub async fn scan(root: &Path, filter: &FilterSet) -> Result<Inventory, ScanError> {
    FileScanner::new(filter.clone()).scan(root).await
}

/// 流式计算文件 MD5
pub fn hash_file(path: &Path) -> Result<String, HashError> {
    let to_err = |source: io::Error| HashError {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(to_err)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer).map_err(to_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 计算内存数据的 MD5
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b").join("c.txt"), "yo").unwrap();
        fs::write(dir.path().join("junk.tmp"), "x").unwrap();
        fs::write(dir.path().join("empty.dat"), "").unwrap();
        dir
    }

    #[test]
    fn test_scan_records_entries_and_hashes() {
        let dir = fixture();
        let filter = FilterSet::new(&["*.tmp"], &[]);
        let inventory = FileScanner::new(filter).scan_blocking(dir.path()).unwrap();

        let paths: Vec<&str> = inventory
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "b", "b/c.txt", "empty.dat"]);

        let a = inventory.get("a.txt").unwrap();
        assert_eq!(a.size, 2);
        assert_eq!(a.content_hash.as_deref(), Some(hash_bytes(b"hi").as_str()));

        let b = inventory.get("b").unwrap();
        assert!(b.is_dir);
        assert_eq!(b.size, 0);
        assert!(b.content_hash.is_none());

        // 空文件不计算哈希
        assert!(inventory.get("empty.dat").unwrap().content_hash.is_none());
    }

    #[test]
    fn test_ignored_directory_is_pruned() {
        let dir = fixture();
        fs::create_dir_all(dir.path().join(".git").join("objects")).unwrap();
        fs::write(dir.path().join(".git").join("objects").join("x"), "blob").unwrap();

        let filter = FilterSet::new(&[".git/"], &[]);
        let inventory = FileScanner::new(filter).scan_blocking(dir.path()).unwrap();
        assert!(inventory
            .iter()
            .all(|e| !e.relative_path.starts_with(".git")));
    }

    #[test]
    fn test_include_keeps_directories() {
        let dir = fixture();
        let filter = FilterSet::new(&[], &["c.txt"]);
        let inventory = FileScanner::new(filter).scan_blocking(dir.path()).unwrap();
        let paths: Vec<&str> = inventory
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["b", "b/c.txt"]);
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = FileScanner::new(FilterSet::empty()).scan_blocking(&missing);
        assert!(matches!(result, Err(ScanError::RootInaccessible { .. })));
    }

    #[test]
    fn test_without_hashes() {
        let dir = fixture();
        let inventory = FileScanner::new(FilterSet::empty())
            .without_hashes()
            .scan_blocking(dir.path())
            .unwrap();
        assert!(inventory.iter().all(|e| e.content_hash.is_none()));
        assert_eq!(inventory.file_count(), 4);
    }

    #[test]
    fn test_entry_parent() {
        let dir = fixture();
        let inventory = FileScanner::new(FilterSet::empty())
            .scan_blocking(dir.path())
            .unwrap();
        assert_eq!(inventory.get("b/c.txt").unwrap().parent(), Some("b"));
        assert_eq!(inventory.get("a.txt").unwrap().parent(), None);
    }
}
