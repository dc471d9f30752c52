pub mod auth;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod models;
pub mod remote;

pub use core::{SyncConfig, SyncEngine, SyncHistory, SyncReport};
pub use error::{SyncError, SyncResult};
pub use models::{RemoteFileMetadata, RemoteItem, SyncDecision, SyncProgress, SyncStatus};
pub use remote::{create_remote, RemoteConfig, RemoteStore, RemoteType};

/// 平台目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}
