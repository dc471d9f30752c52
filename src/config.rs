//! 应用配置模块

use crate::core::engine::SyncConfig;
use crate::core::retry::RetryPolicy;
use crate::core::tree::ScanConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// 数据目录环境变量
pub const HOME_ENV: &str = "DRIVEMIRROR_HOME";

/// 数据目录：`$DRIVEMIRROR_HOME`，否则为平台配置目录下的 drivemirror
pub fn data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    crate::dirs::config_dir()
        .map(|p| p.join("drivemirror"))
        .unwrap_or_else(|| PathBuf::from(".drivemirror"))
}

/// 读取 config.json 中的一个配置段，缺失或格式错误时使用默认值
pub fn load_section<T: DeserializeOwned + Default>(config_dir: &Path, key: &str) -> T {
    let config_file = config_dir.join(CONFIG_FILE);
    fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(key).cloned())
        .and_then(|section| match serde_json::from_value::<T>(section) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("配置段 {} 格式错误，使用默认值: {}", key, e);
                None
            }
        })
        .unwrap_or_default()
}

/// 写回 config.json 中的一个配置段，保留其它段
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join(CONFIG_FILE);

    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value).map_err(io::Error::other)?;
    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(&config_file, content)
}

/// 多个远程文件映射到同一本地路径时的处理方式
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CollisionPolicy {
    /// 终止本次运行
    #[default]
    Fail,
    /// 保留遍历顺序中的第一个，其余记为失败
    KeepFirst,
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 分块大小（MB）
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 写入后按远程哈希校验
    #[serde(default = "default_true")]
    pub verify_after_write: bool,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    /// 冲突检测时忽略大小写
    #[serde(default = "default_case_insensitive")]
    pub case_insensitive_paths: bool,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_chunk_size_mb() -> u64 {
    32
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_case_insensitive() -> bool {
    cfg!(any(target_os = "windows", target_os = "macos"))
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrent_transfers: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            verify_after_write: true,
            collision_policy: CollisionPolicy::default(),
            case_insensitive_paths: default_case_insensitive(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl TransferConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "transfer")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "transfer", self)
    }

    /// 转换为引擎配置
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            chunk_size: self.chunk_size_mb.max(1) * 1024 * 1024,
            max_concurrent_transfers: self.max_concurrent_transfers.max(1),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay_ms: self.retry_base_delay_ms,
            },
            verify_after_write: self.verify_after_write,
            collision_policy: self.collision_policy,
            case_insensitive_paths: self.case_insensitive_paths,
            scan_config: ScanConfig {
                exclude_patterns: self.exclude_patterns.clone(),
            },
        }
    }
}
