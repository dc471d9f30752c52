// Google Drive 远程存储 - OAuth Bearer 令牌 + Drive v3 HTTP 接口

use super::{
    HttpStatusError, ListPage, NotAuthorizedError, RawMetadata, RemoteStore, IO_TIMEOUT_SECS,
    OP_TIMEOUT_SECS,
};
use crate::auth::Credential;
use crate::models::{ContentHash, HashAlgorithm, ItemKind, RemoteEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Drive 文件夹的 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
struct DriveEntryResponse {
    id: String,
    name: String,
    #[serde(rename = "mimeType")]
    mime_type: String,
}

impl From<DriveEntryResponse> for RemoteEntry {
    fn from(response: DriveEntryResponse) -> Self {
        let kind = if response.mime_type == FOLDER_MIME_TYPE {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        Self {
            id: response.id,
            name: response.name,
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileListResponse {
    files: Option<Vec<DriveEntryResponse>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveMetadataResponse {
    /// Drive 以十进制字符串返回大小
    size: Option<String>,
    #[serde(rename = "md5Checksum")]
    md5_checksum: Option<String>,
    #[serde(rename = "modifiedTime")]
    modified_time: Option<String>,
}

impl From<DriveMetadataResponse> for RawMetadata {
    fn from(response: DriveMetadataResponse) -> Self {
        Self {
            size: response.size.and_then(|s| s.parse().ok()),
            content_hash: response
                .md5_checksum
                .map(|md5| ContentHash::new(HashAlgorithm::Md5, md5)),
            modified_at: response.modified_time.and_then(|dt| {
                DateTime::parse_from_rfc3339(&dt)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        }
    }
}

/// Google Drive 远程存储
pub struct GoogleDriveRemote {
    http_client: reqwest::Client,
    base_url: String,
    page_size: u32,
    access_token: RwLock<Option<String>>,
    name: String,
}

impl GoogleDriveRemote {
    pub fn new() -> Self {
        Self::with_base_url(DRIVE_API_BASE)
    }

    /// 指定 API 地址（测试或代理）
    pub fn with_base_url(base_url: &str) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http_client,
            name: format!("gdrive:{}", base_url),
            base_url,
            page_size: 1000,
            access_token: RwLock::new(None),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn token(&self) -> Result<String> {
        self.access_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| NotAuthorizedError("Google Drive".to_string()).into())
    }

    /// 非 2xx 响应转换为 HttpStatusError
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(HttpStatusError {
            status: status.as_u16(),
            message,
        }
        .into())
    }
}

impl Default for GoogleDriveRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for GoogleDriveRemote {
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> Result<ListPage> {
        let query = format!(
            "'{}' in parents and trashed=false",
            folder_id.replace('\'', "\\'")
        );
        let page_size = self.page_size.to_string();

        let mut request = self
            .http_client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(self.token()?)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "nextPageToken, files(id, name, mimeType)"),
                ("pageSize", page_size.as_str()),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.context("Failed to list folder")?;
        let list: DriveFileListResponse = Self::ensure_success(response)
            .await?
            .json()
            .await
            .context("Failed to parse file list response")?;

        let entries: Vec<RemoteEntry> = list
            .files
            .unwrap_or_default()
            .into_iter()
            .map(RemoteEntry::from)
            .collect();
        debug!("列出 {} 页: {} 个条目", folder_id, entries.len());

        Ok(ListPage {
            entries,
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn file_metadata(&self, file_id: &str) -> Result<RawMetadata> {
        let response = self
            .http_client
            .get(format!("{}/files/{}", self.base_url, file_id))
            .bearer_auth(self.token()?)
            .query(&[("fields", "size, md5Checksum, modifiedTime")])
            .send()
            .await
            .context("Failed to get file metadata")?;

        let metadata: DriveMetadataResponse = Self::ensure_success(response)
            .await?
            .json()
            .await
            .context("Failed to parse file metadata")?;

        Ok(metadata.into())
    }

    async fn read_range(&self, file_id: &str, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let response = self
            .http_client
            .get(format!("{}/files/{}", self.base_url, file_id))
            .bearer_auth(self.token()?)
            .query(&[("alt", "media")])
            .header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", offset, offset + length - 1),
            )
            .send()
            .await
            .context("Failed to download file")?;

        // 范围超出文件末尾（包括空文件）
        if response.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }

        let response = Self::ensure_success(response).await?;
        let partial = response.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes()
            .await
            .context("Failed to read download response")?;

        if partial {
            return Ok(body);
        }

        // 服务器忽略了 Range，返回了完整内容
        let start = (offset as usize).min(body.len());
        let end = (offset.saturating_add(length) as usize).min(body.len());
        Ok(body.slice(start..end))
    }

    async fn authorize(&self, credential: &Credential) -> Result<()> {
        *self.access_token.write().unwrap_or_else(|e| e.into_inner()) =
            Some(credential.access_token.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
