pub mod drive;
pub mod local;
pub mod object;

use crate::auth::Credential;
use crate::models::{ContentHash, RemoteEntry};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use drive::GoogleDriveRemote;
pub use local::LocalDirRemote;
pub use object::ObjectRemote;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- 列表、元数据
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 分块下载
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 一页列表结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    pub next_page_token: Option<String>,
}

/// 后端返回的原始元数据，任何字段都可能缺失
#[derive(Debug, Clone, Default)]
pub struct RawMetadata {
    pub size: Option<u64>,
    pub content_hash: Option<ContentHash>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// 带 HTTP 状态码的错误，供重试层区分临时/永久失败
#[derive(Debug, thiserror::Error)]
#[error("HTTP {status}: {message}")]
pub struct HttpStatusError {
    pub status: u16,
    pub message: String,
}

impl HttpStatusError {
    pub fn is_transient(&self) -> bool {
        self.status >= 500 || self.status == 408 || self.status == 429
    }

    /// 凭证缺失、无效或权限不足
    pub fn is_auth(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// 后端尚未拿到凭证
#[derive(Debug, thiserror::Error)]
#[error("{0} 尚未授权")]
pub struct NotAuthorizedError(pub String);

/// 错误链中是否有认证类错误（不重试，按认证失败处理）
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain().any(|e| {
        e.downcast_ref::<NotAuthorizedError>().is_some()
            || e.downcast_ref::<HttpStatusError>()
                .is_some_and(HttpStatusError::is_auth)
    })
}

/// 远程层级存储接口
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出文件夹的一页直接子条目
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> Result<ListPage>;

    /// 获取文件元数据
    async fn file_metadata(&self, file_id: &str) -> Result<RawMetadata>;

    /// 读取 [offset, offset + length) 范围的内容，文件末尾处可能返回更少字节
    async fn read_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes>;

    /// 使用凭证（不需要认证的后端忽略）
    async fn authorize(&self, _credential: &Credential) -> Result<()> {
        Ok(())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 远程存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Drive,
    Local,
    WebDav,
    S3,
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(rename = "type")]
    pub typ: RemoteType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl RemoteConfig {
    pub fn new(typ: RemoteType) -> Self {
        Self {
            typ,
            path: None,
            endpoint: None,
            username: None,
            password: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            root: None,
        }
    }
}

/// 根据配置创建远程存储实例
pub fn create_remote(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.typ {
        RemoteType::Drive => {
            let remote = match &config.endpoint {
                Some(endpoint) => GoogleDriveRemote::with_base_url(endpoint),
                None => GoogleDriveRemote::new(),
            };
            tracing::info!("初始化 Google Drive 存储: {}", remote.name());
            Ok(Arc::new(remote) as Arc<dyn RemoteStore>)
        }
        RemoteType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local remote requires path"))?;
            tracing::info!("初始化本地目录存储: {}", path);
            Ok(Arc::new(LocalDirRemote::new(path)?) as Arc<dyn RemoteStore>)
        }
        RemoteType::WebDav => {
            let endpoint = config
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires endpoint"))?;
            let username = config
                .username
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires username"))?;
            let password = config
                .password
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires password"))?;
            tracing::info!("创建 WebDAV 存储: endpoint={}, root={:?}", endpoint, config.root);
            Ok(Arc::new(ObjectRemote::webdav(endpoint, username, password, config.root.clone())?)
                as Arc<dyn RemoteStore>)
        }
        RemoteType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 remote requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 remote requires region"))?;
            let access_key = config
                .access_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 remote requires accessKey"))?;
            let secret_key = config
                .secret_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 remote requires secretKey"))?;
            tracing::info!("初始化 S3 存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(ObjectRemote::s3(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.clone(),
                config.root.clone(),
            )?) as Arc<dyn RemoteStore>)
        }
    }
}
