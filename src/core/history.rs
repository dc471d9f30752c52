//! 同步运行历史（SQLite）

use crate::core::engine::SyncReport;
use crate::models::SyncStatus;
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    run_id TEXT PRIMARY KEY,
    remote_root TEXT NOT NULL,
    local_root TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    status TEXT NOT NULL,
    files_scanned INTEGER NOT NULL DEFAULT 0,
    files_transferred INTEGER NOT NULL DEFAULT 0,
    files_skipped INTEGER NOT NULL DEFAULT 0,
    files_failed INTEGER NOT NULL DEFAULT 0,
    bytes_transferred INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
)"#;

/// 一次运行的历史记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunRecord {
    pub run_id: String,
    pub remote_root: String,
    pub local_root: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub files_scanned: u32,
    pub files_transferred: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
    pub error_message: Option<String>,
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct SyncRunRow {
    run_id: String,
    remote_root: String,
    local_root: String,
    start_time: i64,
    end_time: i64,
    status: String,
    files_scanned: i64,
    files_transferred: i64,
    files_skipped: i64,
    files_failed: i64,
    bytes_transferred: i64,
    error_message: Option<String>,
}

impl From<SyncRunRow> for SyncRunRecord {
    fn from(row: SyncRunRow) -> Self {
        SyncRunRecord {
            run_id: row.run_id,
            remote_root: row.remote_root,
            local_root: row.local_root,
            start_time: row.start_time,
            end_time: row.end_time,
            status: SyncStatus::from(row.status.as_str()),
            files_scanned: row.files_scanned as u32,
            files_transferred: row.files_transferred as u32,
            files_skipped: row.files_skipped as u32,
            files_failed: row.files_failed as u32,
            bytes_transferred: row.bytes_transferred as u64,
            error_message: row.error_message,
        }
    }
}

/// 同步历史存储
#[derive(Clone)]
pub struct SyncHistory {
    db: Arc<SqlitePool>,
}

impl SyncHistory {
    /// 打开（必要时创建）数据库文件
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Windows 路径需要转换反斜杠为正斜杠
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&format!("sqlite:{}?mode=rwc", path_str))
            .await?;

        Self::init(db).await
    }

    /// 内存数据库（单连接，否则每个连接各有一份数据）
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(db).await
    }

    async fn init(db: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&db).await?;
        Ok(Self { db: Arc::new(db) })
    }

    /// 记录一次运行
    pub async fn record(&self, report: &SyncReport) -> Result<()> {
        let error_message = if report.failures.is_empty() {
            None
        } else {
            Some(
                report
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.relative_path, f.error))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        sqlx::query(
            r#"INSERT OR REPLACE INTO sync_runs
               (run_id, remote_root, local_root, start_time, end_time, status, files_scanned,
                files_transferred, files_skipped, files_failed, bytes_transferred, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&report.run_id)
        .bind(&report.remote_root_id)
        .bind(&report.local_root)
        .bind(report.start_time)
        .bind(report.end_time)
        .bind(report.status.to_string())
        .bind(report.files_scanned as i64)
        .bind(report.files_transferred as i64)
        .bind(report.files_skipped as i64)
        .bind(report.files_failed as i64)
        .bind(report.bytes_transferred as i64)
        .bind(error_message)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// 最近的运行，新的在前
    pub async fn recent(&self, limit: u32) -> Result<Vec<SyncRunRecord>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(
            "SELECT * FROM sync_runs ORDER BY start_time DESC, end_time DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}
