//! 同步数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 远程条目类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// 文件夹列表中的直接子条目（未带路径）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
}

/// 遍历远程树后得到的条目
///
/// `relative_path` 是从遍历根开始的祖先文件夹名，用 `/` 连接，根目录下的文件为空串。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub relative_path: String,
}

impl RemoteItem {
    /// 相对于本地根目录的文件路径（`relative_path/name`）
    pub fn relative_file_path(&self) -> String {
        if self.relative_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.relative_path, self.name)
        }
    }

    /// 本地路径 = local_root / relative_path / name
    pub fn local_path(&self, local_root: &Path) -> PathBuf {
        let mut path = local_root.to_path_buf();
        for part in self.relative_path.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(&self.name);
        path
    }
}

/// 内容哈希算法
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Blake3,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Md5 => write!(f, "md5"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// 内容哈希（十六进制）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    pub hex: String,
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            hex: hex.into(),
        }
    }

    /// 十六进制比较忽略大小写
    pub fn matches(&self, other: &ContentHash) -> bool {
        self.algorithm == other.algorithm && self.hex.eq_ignore_ascii_case(&other.hex)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// 远程文件元数据
///
/// 后端没有返回大小时 `size_bytes` 为 0 且 `size_known` 为 false，只能靠存在性判断；
/// `content_hash` 为 None 表示“未知”，不等于空内容的哈希。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMetadata {
    pub size_bytes: u64,
    #[serde(default)]
    pub size_known: bool,
    pub content_hash: Option<ContentHash>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteFileMetadata {
    /// 后端确实报告过的大小（包括 0）
    pub fn known_size(&self) -> Option<u64> {
        self.size_known.then_some(self.size_bytes)
    }
}

/// 变更原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChangeReason {
    Missing,
    SizeMismatch,
    HashMismatch,
    UpToDate,
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeReason::Missing => write!(f, "missing"),
            ChangeReason::SizeMismatch => write!(f, "size_mismatch"),
            ChangeReason::HashMismatch => write!(f, "hash_mismatch"),
            ChangeReason::UpToDate => write!(f, "up_to_date"),
        }
    }
}

/// 单个文件的同步决策，只在一次运行内有效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDecision {
    pub item: RemoteItem,
    pub metadata: RemoteFileMetadata,
    pub needs_transfer: bool,
    pub reason: ChangeReason,
}

impl SyncDecision {
    pub fn new(item: RemoteItem, metadata: RemoteFileMetadata, reason: ChangeReason) -> Self {
        Self {
            item,
            metadata,
            needs_transfer: reason != ChangeReason::UpToDate,
            reason,
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Authenticating,
    Scanning,
    Comparing,
    Syncing,
    Completed,
    PartiallyFailed,
    Cancelled,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Authenticating => "authenticating",
            SyncStatus::Scanning => "scanning",
            SyncStatus::Comparing => "comparing",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::PartiallyFailed => "partially_failed",
            SyncStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for SyncStatus {
    fn from(s: &str) -> Self {
        match s {
            "authenticating" => SyncStatus::Authenticating,
            "scanning" => SyncStatus::Scanning,
            "comparing" => SyncStatus::Comparing,
            "syncing" => SyncStatus::Syncing,
            "partially_failed" => SyncStatus::PartiallyFailed,
            "cancelled" => SyncStatus::Cancelled,
            _ => SyncStatus::Completed,
        }
    }
}

/// 同步进度（发送给进度上报方）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub run_id: String,
    pub status: SyncStatus,
    pub phase: String,
    pub files_scanned: u32,
    pub files_to_sync: u32,
    pub files_completed: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    /// 字节/秒
    pub speed: u64,
    /// 预计剩余秒数
    pub eta: u64,
}
