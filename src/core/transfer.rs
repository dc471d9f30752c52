//! 分块下载 - 每块独立重试，写入后校验

use crate::core::hashing::hash_file;
use crate::core::retry::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::models::{RemoteFileMetadata, RemoteItem};
use crate::remote::RemoteStore;
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 默认分块大小 32MB
pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// 校验失败后的重新下载次数
const VERIFY_RETRIES: u32 = 1;

/// 下载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStatus {
    /// 累计已下载字节
    pub resumable_progress: u64,
    /// 已知的总大小
    pub total_size: Option<u64>,
    pub done: bool,
}

impl DownloadStatus {
    pub fn fraction(&self) -> Option<f64> {
        self.total_size
            .filter(|t| *t > 0)
            .map(|t| self.resumable_progress as f64 / t as f64)
    }
}

/// 按偏移量逐块读取远程文件
///
/// 已知大小时读到总大小为止（大小为 0 不发请求）；大小未知时读到返回不足一块为止。
pub struct ChunkedDownload<'a> {
    remote: &'a dyn RemoteStore,
    file_id: &'a str,
    chunk_size: u64,
    total_size: Option<u64>,
    progress: u64,
    done: bool,
    retry: RetryPolicy,
}

impl<'a> ChunkedDownload<'a> {
    pub fn new(
        remote: &'a dyn RemoteStore,
        file_id: &'a str,
        total_size: Option<u64>,
        chunk_size: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            file_id,
            chunk_size: chunk_size.max(1),
            total_size,
            progress: 0,
            done: false,
            retry,
        }
    }

    fn status(&self) -> DownloadStatus {
        DownloadStatus {
            resumable_progress: self.progress,
            total_size: self.total_size,
            done: self.done,
        }
    }

    /// 下载下一块
    pub async fn next_chunk(&mut self) -> anyhow::Result<(Bytes, DownloadStatus)> {
        if self.done {
            return Ok((Bytes::new(), self.status()));
        }

        let length = match self.total_size {
            Some(total) => self.chunk_size.min(total.saturating_sub(self.progress)),
            None => self.chunk_size,
        };
        if length == 0 {
            self.done = true;
            return Ok((Bytes::new(), self.status()));
        }

        let remote = self.remote;
        let file_id = self.file_id;
        let offset = self.progress;
        let data = self
            .retry
            .run(&format!("下载 {} @{}", file_id, offset), move || {
                remote.read_range(file_id, offset, length)
            })
            .await?;

        self.progress += data.len() as u64;
        self.done = (data.len() as u64) < length
            || self.total_size.map(|t| self.progress >= t).unwrap_or(false);

        Ok((data, self.status()))
    }
}

/// 单个文件的传输结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub bytes_written: u64,
    /// 是否做过内容哈希校验
    pub hash_verified: bool,
    /// 下载次数（校验失败会重新下载）
    pub attempts: u32,
}

/// 文件传输器
#[derive(Debug, Clone, Copy)]
pub struct Transferer {
    chunk_size: u64,
    verify_after_write: bool,
    retry: RetryPolicy,
}

impl Default for Transferer {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_after_write: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Transferer {
    pub fn new(chunk_size: u64, verify_after_write: bool, retry: RetryPolicy) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            verify_after_write,
            retry,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 下载 `item` 到 `dest`（覆盖写入）
    ///
    /// `progress` 收到的是每块新增的字节数。失败时目标位置可能留下不完整的文件。
    pub async fn transfer(
        &self,
        remote: &dyn RemoteStore,
        item: &RemoteItem,
        metadata: &RemoteFileMetadata,
        dest: &Path,
        cancel: &AtomicBool,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> SyncResult<TransferOutcome> {
        let display_path = item.relative_file_path();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let written = self
                .download_once(remote, item, metadata, dest, cancel, progress)
                .await?;

            match self.verify(dest, metadata, written).await? {
                None => {
                    info!(
                        "下载完成: {} ({} bytes, 第{}次)",
                        display_path, written, attempts
                    );
                    return Ok(TransferOutcome {
                        bytes_written: written,
                        hash_verified: self.verify_after_write && metadata.content_hash.is_some(),
                        attempts,
                    });
                }
                Some(reason) if attempts <= VERIFY_RETRIES => {
                    warn!("校验失败，重新下载 {}: {}", display_path, reason);
                }
                Some(reason) => {
                    return Err(SyncError::interrupted(display_path, reason));
                }
            }
        }
    }

    async fn download_once(
        &self,
        remote: &dyn RemoteStore,
        item: &RemoteItem,
        metadata: &RemoteFileMetadata,
        dest: &Path,
        cancel: &AtomicBool,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> SyncResult<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::local_io(parent, e))?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SyncError::local_io(dest, e))?;

        let mut download = ChunkedDownload::new(
            remote,
            &item.id,
            metadata.known_size(),
            self.chunk_size,
            self.retry,
        );
        let mut reported = 0u64;

        loop {
            if cancel.load(Ordering::Relaxed) {
                let _ = file.flush().await;
                return Err(SyncError::interrupted(item.relative_file_path(), "cancelled"));
            }

            let (data, status) = download.next_chunk().await.map_err(|e| {
                SyncError::interrupted(item.relative_file_path(), format!("{:#}", e))
            })?;

            file.write_all(&data)
                .await
                .map_err(|e| SyncError::local_io(dest, e))?;

            let delta = status.resumable_progress - reported;
            reported = status.resumable_progress;
            if delta > 0 {
                progress(delta);
            }
            if let Some(fraction) = status.fraction() {
                debug!("{}: {:.0}%", item.relative_file_path(), fraction * 100.0);
            }

            if status.done {
                break;
            }
        }

        file.flush().await.map_err(|e| SyncError::local_io(dest, e))?;
        Ok(reported)
    }

    /// 返回 None 表示校验通过
    async fn verify(
        &self,
        dest: &Path,
        metadata: &RemoteFileMetadata,
        written: u64,
    ) -> SyncResult<Option<String>> {
        if let Some(expected) = metadata.known_size() {
            if written != expected {
                return Ok(Some(format!(
                    "size mismatch: expected {}, got {}",
                    expected, written
                )));
            }
        }

        if !self.verify_after_write {
            return Ok(None);
        }

        if let Some(expected) = &metadata.content_hash {
            let actual = hash_file(dest, expected.algorithm)
                .await
                .map_err(|e| SyncError::local_io(dest, e))?;
            if !actual.matches(expected) {
                return Ok(Some(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::hash_bytes;
    use crate::models::{HashAlgorithm, ItemKind};
    use crate::remote::LocalDirRemote;
    use std::sync::atomic::AtomicU64;

    fn item(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: id.rsplit('/').next().unwrap().to_string(),
            kind: ItemKind::File,
            relative_path: String::new(),
        }
    }

    #[tokio::test]
    async fn test_chunked_download_known_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        let remote = LocalDirRemote::new(dir.path()).unwrap();

        let mut download = ChunkedDownload::new(&remote, "a.bin", Some(10), 4, RetryPolicy::none());
        let mut chunks = Vec::new();
        loop {
            let (data, status) = download.next_chunk().await.unwrap();
            chunks.push(data.len());
            if status.done {
                assert_eq!(status.resumable_progress, 10);
                assert_eq!(status.fraction(), Some(1.0));
                break;
            }
        }
        assert_eq!(chunks, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_chunked_download_unknown_size_stops_on_short_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"01234567").unwrap();
        let remote = LocalDirRemote::new(dir.path()).unwrap();

        let mut download = ChunkedDownload::new(&remote, "a.bin", None, 4, RetryPolicy::none());
        let (_, s1) = download.next_chunk().await.unwrap();
        let (_, s2) = download.next_chunk().await.unwrap();
        let (last, s3) = download.next_chunk().await.unwrap();
        assert!(!s1.done && !s2.done);
        assert!(last.is_empty());
        assert!(s3.done);
        assert_eq!(s3.resumable_progress, 8);
        assert_eq!(s3.fraction(), None);
    }

    #[tokio::test]
    async fn test_known_empty_file_issues_no_read() {
        let dir = tempfile::tempdir().unwrap();
        let remote = LocalDirRemote::new(dir.path()).unwrap();

        // 文件不存在：任何读取都会失败
        let mut download = ChunkedDownload::new(&remote, "gone.bin", Some(0), 4, RetryPolicy::none());
        let (data, status) = download.next_chunk().await.unwrap();
        assert!(data.is_empty());
        assert!(status.done);
        assert_eq!(status.resumable_progress, 0);
    }

    #[tokio::test]
    async fn test_transfer_reports_deltas_and_verifies() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(remote_dir.path().join("a.bin"), &data).unwrap();
        let remote = LocalDirRemote::new(remote_dir.path()).unwrap();

        let metadata = RemoteFileMetadata {
            size_bytes: data.len() as u64,
            size_known: true,
            content_hash: Some(hash_bytes(HashAlgorithm::Blake3, &data)),
            modified_at: None,
        };
        let dest = local_dir.path().join("nested/dir/a.bin");
        let total = AtomicU64::new(0);
        let sink = |delta: u64| {
            total.fetch_add(delta, Ordering::SeqCst);
        };

        let outcome = Transferer::new(300, true, RetryPolicy::none())
            .transfer(&remote, &item("a.bin"), &metadata, &dest, &AtomicBool::new(false), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 1000);
        assert!(outcome.hash_verified);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(total.load(Ordering::SeqCst), 1000);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_retries_once_then_fails() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("a.bin"), b"actual").unwrap();
        let remote = LocalDirRemote::new(remote_dir.path()).unwrap();

        let metadata = RemoteFileMetadata {
            size_bytes: 6,
            size_known: true,
            content_hash: Some(hash_bytes(HashAlgorithm::Blake3, b"expect")),
            modified_at: None,
        };
        let total = AtomicU64::new(0);
        let sink = |delta: u64| {
            total.fetch_add(delta, Ordering::SeqCst);
        };

        let err = Transferer::new(4, true, RetryPolicy::none())
            .transfer(
                &remote,
                &item("a.bin"),
                &metadata,
                &local_dir.path().join("a.bin"),
                &AtomicBool::new(false),
                &sink,
            )
            .await
            .unwrap_err();

        match err {
            SyncError::TransferInterrupted { reason, .. } => {
                assert!(reason.contains("checksum mismatch"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // 两次完整下载
        assert_eq!(total.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_transfer() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        std::fs::write(remote_dir.path().join("a.bin"), b"data").unwrap();
        let remote = LocalDirRemote::new(remote_dir.path()).unwrap();

        let err = Transferer::default()
            .transfer(
                &remote,
                &item("a.bin"),
                &RemoteFileMetadata::default(),
                &local_dir.path().join("a.bin"),
                &AtomicBool::new(true),
                &|_: u64| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TransferInterrupted { .. }));
    }
}
