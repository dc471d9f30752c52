use crate::models::{SyncProgress, SyncStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 一次同步运行的计数器，传输任务并发更新
#[derive(Debug)]
pub struct SyncSession {
    run_id: String,
    files_scanned: u32,
    files_to_sync: u32,
    bytes_planned: u64,
    bytes_transferred: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    started: Instant,
}

impl SyncSession {
    pub fn new(run_id: &str, files_scanned: u32, files_to_sync: u32, bytes_planned: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            files_scanned,
            files_to_sync,
            bytes_planned,
            bytes_transferred: AtomicU64::new(0),
            files_completed: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_bytes(&self, delta: u64) {
        self.bytes_transferred.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    pub fn bytes_planned(&self) -> u64 {
        self.bytes_planned
    }

    pub fn files_completed(&self) -> u64 {
        self.files_completed.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> u64 {
        self.files_failed.load(Ordering::Relaxed)
    }

    /// 已处理（成功或失败）的文件是否覆盖全部计划
    pub fn is_finished(&self) -> bool {
        self.files_completed() + self.files_failed() >= self.files_to_sync as u64
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 生成进度快照，`speed` 由调用方按采样间隔计算
    pub fn snapshot(&self, status: SyncStatus, phase: String, speed: u64) -> SyncProgress {
        let bytes = self.bytes_transferred();
        let eta = if speed > 0 {
            self.bytes_planned.saturating_sub(bytes) / speed
        } else {
            0
        };

        SyncProgress {
            run_id: self.run_id.clone(),
            status,
            phase,
            files_scanned: self.files_scanned,
            files_to_sync: self.files_to_sync,
            files_completed: self.files_completed() as u32,
            files_failed: self.files_failed() as u32,
            bytes_transferred: bytes,
            bytes_total: self.bytes_planned,
            speed,
            eta,
        }
    }
}
