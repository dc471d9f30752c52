use super::{ListPage, RawMetadata, RemoteStore};
use crate::core::hashing::hash_file;
use crate::models::{HashAlgorithm, ItemKind, RemoteEntry};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// 以本地目录作为远程树（挂载的共享目录、测试夹具）
///
/// 条目 ID 是相对于根目录、用 `/` 分隔的路径，根目录 ID 为空串。
pub struct LocalDirRemote {
    base_path: PathBuf,
    name: String,
    page_size: usize,
    checksums: bool,
}

impl LocalDirRemote {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            return Err(anyhow!("远程目录不存在: {}", base_path.display()));
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self {
            base_path,
            name,
            page_size: 100,
            checksums: true,
        })
    }

    /// 每页条目数
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 不提供内容哈希（模拟只返回大小的存储）
    pub fn without_checksums(mut self) -> Self {
        self.checksums = false;
        self
    }

    fn resolve_path(&self, id: &str) -> Result<PathBuf> {
        let id = id.trim_start_matches('/').trim_start_matches('\\');
        let relative = Path::new(id);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!("非法条目 ID: {}", id));
        }
        Ok(if id.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(relative)
        })
    }

    fn child_id(folder_id: &str, name: &str) -> String {
        let folder_id = folder_id.trim_matches('/');
        if folder_id.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", folder_id, name)
        }
    }
}

#[async_trait]
impl RemoteStore for LocalDirRemote {
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> Result<ListPage> {
        let dir = self.resolve_path(folder_id)?;
        let mut reader = fs::read_dir(&dir).await?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // 跟随符号链接
            let metadata = fs::metadata(entry.path()).await?;
            entries.push(RemoteEntry {
                id: Self::child_id(folder_id, &name),
                name,
                kind: if metadata.is_dir() {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                },
            });
        }
        // read_dir 顺序不稳定，分页前先排序
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| anyhow!("无效的分页令牌: {}", token))?,
            None => 0,
        };
        let end = (start + self.page_size).min(entries.len());
        let next_page_token = (end < entries.len()).then(|| end.to_string());
        let page = entries
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect();

        Ok(ListPage {
            entries: page,
            next_page_token,
        })
    }

    async fn file_metadata(&self, file_id: &str) -> Result<RawMetadata> {
        let path = self.resolve_path(file_id)?;
        let metadata = fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Err(anyhow!("不是文件: {}", file_id));
        }

        let content_hash = if self.checksums {
            Some(hash_file(&path, HashAlgorithm::Blake3).await?)
        } else {
            None
        };

        Ok(RawMetadata {
            size: Some(metadata.len()),
            content_hash,
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn read_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        let path = self.resolve_path(file_id)?;
        let mut file = fs::File::open(&path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        // 文件剩余内容不足 length 时返回实际可用的数据
        let mut buffer = Vec::new();
        file.take(length).read_to_end(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
