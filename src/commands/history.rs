use super::sync::HISTORY_DB;
use super::HistoryArgs;
use crate::core::{SyncHistory, SyncRunRecord};
use anyhow::{Context, Result};
use std::path::Path;

fn format_record(record: &SyncRunRecord) -> String {
    let started = chrono::DateTime::from_timestamp(record.start_time, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.start_time.to_string());

    format!(
        "{}  {:<16} {} -> {}  下载 {} 跳过 {} 失败 {}  {} bytes",
        started,
        record.status.to_string(),
        if record.remote_root.is_empty() {
            "/"
        } else {
            record.remote_root.as_str()
        },
        record.local_root,
        record.files_transferred,
        record.files_skipped,
        record.files_failed,
        record.bytes_transferred
    )
}

/// 执行 `history` 子命令
pub async fn run(args: &HistoryArgs, data_dir: &Path) -> Result<bool> {
    let history = SyncHistory::open(&data_dir.join(HISTORY_DB))
        .await
        .context("打开同步历史失败")?;
    let records = history.recent(args.limit).await?;

    if records.is_empty() {
        println!("暂无同步记录");
    }
    for record in &records {
        println!("{}", format_record(record));
        if let Some(message) = &record.error_message {
            println!("    {}", message);
        }
    }

    history.close().await;
    Ok(true)
}
