use crate::core::transfer::{SyncFailure, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一条同步历史
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub pass_id: String,
    pub target: String,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub folders_created: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
    pub failures: Vec<SyncFailure>,
}

// 数据库表模型
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncRecordRow {
    pub pass_id: String,
    pub target: String,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: i64,
    pub folders_created: i64,
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
    pub failed: i64,
    pub bytes_transferred: i64,
    pub failures: String,
}

impl SyncRecordRow {
    pub fn from_result(result: &SyncResult) -> anyhow::Result<Self> {
        Ok(Self {
            pass_id: result.pass_id.to_string(),
            target: result.target.clone(),
            dry_run: result.dry_run,
            cancelled: result.cancelled,
            started_at: result.started_at.timestamp_millis(),
            finished_at: result.finished_at.timestamp_millis(),
            duration_ms: result.duration_ms as i64,
            folders_created: result.folders_created as i64,
            created: result.created as i64,
            updated: result.updated as i64,
            skipped: result.skipped as i64,
            failed: result.failed as i64,
            bytes_transferred: result.bytes_transferred as i64,
            failures: serde_json::to_string(&result.failures)?,
        })
    }
}

impl TryFrom<SyncRecordRow> for SyncRecord {
    type Error = anyhow::Error;

    fn try_from(row: SyncRecordRow) -> Result<Self, Self::Error> {
        let timestamp = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| anyhow::anyhow!("Invalid timestamp: {}", ms))
        };

        Ok(SyncRecord {
            started_at: timestamp(row.started_at)?,
            finished_at: timestamp(row.finished_at)?,
            failures: serde_json::from_str(&row.failures)?,
            pass_id: row.pass_id,
            target: row.target,
            dry_run: row.dry_run,
            cancelled: row.cancelled,
            duration_ms: row.duration_ms.max(0) as u64,
            folders_created: row.folders_created.max(0) as u64,
            created: row.created.max(0) as u64,
            updated: row.updated.max(0) as u64,
            skipped: row.skipped.max(0) as u64,
            failed: row.failed.max(0) as u64,
            bytes_transferred: row.bytes_transferred.max(0) as u64,
        })
    }
}
