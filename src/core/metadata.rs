use crate::core::retry::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::models::RemoteFileMetadata;
use crate::remote::{RawMetadata, RemoteStore};

/// 远程文件元数据获取
pub struct MetadataFetcher<'a> {
    remote: &'a dyn RemoteStore,
    retry: RetryPolicy,
}

impl<'a> MetadataFetcher<'a> {
    pub fn new(remote: &'a dyn RemoteStore, retry: RetryPolicy) -> Self {
        Self { remote, retry }
    }

    pub async fn fetch(&self, file_id: &str) -> SyncResult<RemoteFileMetadata> {
        let remote = self.remote;
        let raw = self
            .retry
            .run(&format!("获取元数据 {}", file_id), move || {
                remote.file_metadata(file_id)
            })
            .await
            .map_err(|e| SyncError::remote(format!("metadata {}", file_id), e))?;
        Ok(normalize(raw))
    }
}

/// 缺失的大小记为 0（标记为未知），空哈希视为未知
pub fn normalize(raw: RawMetadata) -> RemoteFileMetadata {
    RemoteFileMetadata {
        size_bytes: raw.size.unwrap_or(0),
        size_known: raw.size.is_some(),
        content_hash: raw.content_hash.filter(|h| !h.hex.trim().is_empty()),
        modified_at: raw.modified_at,
    }
}
