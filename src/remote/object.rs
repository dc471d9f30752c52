use super::{ListPage, RawMetadata, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::models::{ItemKind, RemoteEntry};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

/// WebDAV / S3 远程存储（基于 opendal）
///
/// 条目 ID 即存储内路径，文件夹以 `/` 结尾。列表只有一页，不提供内容哈希。
pub struct ObjectRemote {
    operator: Operator,
    name: String,
}

impl ObjectRemote {
    pub fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self {
            operator: Self::with_timeouts(Operator::new(builder)?.finish()),
            name,
        })
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self {
            operator: Self::with_timeouts(Operator::new(builder)?.finish()),
            name,
        })
    }

    fn with_timeouts(operator: Operator) -> Operator {
        operator.layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
    }

    /// 文件夹 ID 规范化为 opendal 目录路径
    fn dir_path(folder_id: &str) -> String {
        let trimmed = folder_id.trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", trimmed)
        }
    }
}

#[async_trait]
impl RemoteStore for ObjectRemote {
    async fn list_page(&self, folder_id: &str, _page_token: Option<&str>) -> Result<ListPage> {
        let dir = Self::dir_path(folder_id);
        let listed = self
            .operator
            .list_with(&dir)
            .metakey(Metakey::Mode)
            .await?;

        let entries = listed
            .into_iter()
            // 列表结果包含目录自身
            .filter(|entry| entry.path().trim_matches('/') != dir.trim_matches('/'))
            .map(|entry| {
                let kind = if entry.metadata().is_dir() {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                };
                RemoteEntry {
                    id: entry.path().to_string(),
                    name: entry.name().trim_end_matches('/').to_string(),
                    kind,
                }
            })
            .collect();

        Ok(ListPage {
            entries,
            next_page_token: None,
        })
    }

    async fn file_metadata(&self, file_id: &str) -> Result<RawMetadata> {
        let meta = self.operator.stat(file_id).await?;
        Ok(RawMetadata {
            size: Some(meta.content_length()),
            content_hash: None,
            modified_at: meta.last_modified(),
        })
    }

    async fn read_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        let data = self
            .operator
            .read_with(file_id)
            .range(offset..offset + length)
            .await?;
        Ok(Bytes::from(data.to_vec()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
