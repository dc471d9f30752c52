//! 同步错误类型

use crate::remote::is_auth_error;
use std::path::PathBuf;
use thiserror::Error;

/// 同步运行中的错误
#[derive(Error, Debug)]
pub enum SyncError {
    /// 凭证无效或获取失败，在任何列表请求之前终止
    #[error("认证失败: {0}")]
    AuthFailure(String),

    /// 列表或元数据请求在重试后仍然失败
    #[error("远程服务不可用 ({operation}): {source:#}")]
    RemoteUnavailable {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// 单个文件下载失败或被取消
    #[error("传输中断 {path}: {reason}")]
    TransferInterrupted { path: String, reason: String },

    /// 本地目录或文件无法创建/写入/读取
    #[error("本地 IO 失败 {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 两个远程文件映射到同一本地路径
    #[error("本地路径冲突 {path}: {first_id} 与 {second_id}")]
    PathCollision {
        path: String,
        first_id: String,
        second_id: String,
    },

    #[error("同步已取消")]
    Cancelled,
}

impl SyncError {
    /// 列表/元数据失败；凭证被拒绝时归为认证失败
    pub fn remote(operation: impl Into<String>, source: anyhow::Error) -> Self {
        let operation = operation.into();
        if is_auth_error(&source) {
            return SyncError::AuthFailure(format!("{}: {:#}", operation, source));
        }
        SyncError::RemoteUnavailable { operation, source }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn interrupted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::TransferInterrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 是否只影响单个文件（运行可以继续）
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            SyncError::TransferInterrupted { .. } | SyncError::LocalIo { .. }
        )
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
