pub mod models;
pub use models::*;

use crate::core::transfer::SyncResult;
use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
pub use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// 同步历史（SQLite）
#[derive(Debug, Clone)]
pub struct SyncHistory {
    pool: SqlitePool,
}

impl SyncHistory {
    /// 打开（必要时创建）历史数据库并运行迁移
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // SQLite 连接字符串格式: sqlite:path
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let pool = SqlitePoolOptions::new()
            .max_connections(5) // SQLite 单文件，不需要太多连接
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .with_context(|| format!("无法打开历史数据库 {}", path.display()))?;

        Self::migrate(pool).await
    }

    /// 内存数据库（单连接，连接关闭即丢失）
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        // 运行数据库迁移
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// 写入一次同步结果
    pub async fn record(&self, result: &SyncResult) -> Result<()> {
        let row = SyncRecordRow::from_result(result)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sync_history (
                pass_id, target, dry_run, cancelled, started_at, finished_at, duration_ms,
                folders_created, created, updated, skipped, failed, bytes_transferred, failures
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.pass_id)
        .bind(&row.target)
        .bind(row.dry_run)
        .bind(row.cancelled)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(row.duration_ms)
        .bind(row.folders_created)
        .bind(row.created)
        .bind(row.updated)
        .bind(row.skipped)
        .bind(row.failed)
        .bind(row.bytes_transferred)
        .bind(&row.failures)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 最近的记录，新的在前
    pub async fn recent(&self, limit: u32) -> Result<Vec<SyncRecord>> {
        let rows = sqlx::query_as::<_, SyncRecordRow>(
            "SELECT * FROM sync_history ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncRecord::try_from).collect()
    }

    /// 只保留最近 keep 条，返回删除数量
    pub async fn prune(&self, keep: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_history WHERE pass_id NOT IN (
                SELECT pass_id FROM sync_history ORDER BY started_at DESC, rowid DESC LIMIT ?
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RemoteError;
    use crate::core::transfer::TaskKind;

    #[tokio::test]
    async fn test_record_and_recent() {
        let history = SyncHistory::open_in_memory().await.unwrap();

        let mut first = SyncResult::new("nas", false);
        first.record_success(TaskKind::Upload { overwrite: false }, 42);
        first.finish();
        history.record(&first).await.unwrap();

        let mut second = SyncResult::new("s3", false);
        second.record_failure("a.txt", &RemoteError::auth("denied"));
        second.finish();
        history.record(&second).await.unwrap();

        let records = history.recent(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target, "s3");
        assert_eq!(records[0].failures.len(), 1);
        assert_eq!(records[1].bytes_transferred, 42);
        assert_eq!(records[1].pass_id, first.pass_id.to_string());
    }

    #[tokio::test]
    async fn test_prune() {
        let history = SyncHistory::open_in_memory().await.unwrap();
        for i in 0..5 {
            let mut result = SyncResult::new(format!("t{}", i), false);
            result.finish();
            history.record(&result).await.unwrap();
        }

        assert_eq!(history.prune(2).await.unwrap(), 3);
        assert_eq!(history.recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let history = SyncHistory::open(&path).await.unwrap();
        history.record(&SyncResult::new("x", true)).await.unwrap();
        history.close().await;
        assert!(path.exists());
    }
}
