use crate::core::hashing::hash_file;
use crate::error::{SyncError, SyncResult};
use crate::models::{ChangeReason, RemoteFileMetadata, RemoteItem, SyncDecision};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 本地/远程差异判断
///
/// 判断顺序：本地缺失 -> 大小不同 -> 哈希不同 -> 已同步。大小不同时不读取本地内容。
pub struct ChangeDetector {
    local_root: PathBuf,
}

impl ChangeDetector {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub async fn decide(
        &self,
        item: &RemoteItem,
        metadata: RemoteFileMetadata,
    ) -> SyncResult<SyncDecision> {
        let reason = self.classify(item, &metadata).await?;
        debug!("{} -> {}", item.relative_file_path(), reason);
        Ok(SyncDecision::new(item.clone(), metadata, reason))
    }

    async fn classify(
        &self,
        item: &RemoteItem,
        metadata: &RemoteFileMetadata,
    ) -> SyncResult<ChangeReason> {
        let local_path = item.local_path(&self.local_root);

        let local = match tokio::fs::metadata(&local_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChangeReason::Missing)
            }
            Err(e) => return Err(SyncError::local_io(local_path, e)),
        };

        // 同名目录等非普通文件按缺失处理，写入时再报错
        if !local.is_file() {
            return Ok(ChangeReason::Missing);
        }

        // 后端没有报告大小时跳过大小比较
        if let Some(size) = metadata.known_size() {
            if local.len() != size {
                return Ok(ChangeReason::SizeMismatch);
            }
        }

        if let Some(remote_hash) = &metadata.content_hash {
            let local_hash = hash_file(&local_path, remote_hash.algorithm)
                .await
                .map_err(|e| SyncError::local_io(&local_path, e))?;
            if !local_hash.matches(remote_hash) {
                return Ok(ChangeReason::HashMismatch);
            }
        }

        Ok(ChangeReason::UpToDate)
    }
}
