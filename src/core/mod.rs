pub mod comparator;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod job;
pub mod pattern;
pub mod retry;
pub mod scanner;
pub mod transfer;
pub mod watcher;

pub use comparator::{CompareConfig, FileComparator, Plan};
pub use daemon::{Daemon, DaemonCommand, DaemonHandle, DaemonState, PassRunner, ScheduleConfig};
pub use engine::{SyncEngine, SyncOptions};
pub use error::{HashError, RemoteError, RemoteErrorKind, ScanError, WatchError};
pub use job::{SyncJob, SyncTarget};
pub use pattern::{FilterSet, Pattern};
pub use retry::RetryPolicy;
pub use scanner::{hash_file, scan, Entry, FileScanner, Inventory, ScanOptions};
pub use transfer::{PlannedAction, SyncFailure, SyncResult, TaskKind, TransferTask};
pub use watcher::{ChangeEvent, ChangeKind, ChangeWatcher, Debouncer, WatchConfig, WatchHandle};
