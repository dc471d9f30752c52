//! 凭证提供方（外部协作者接口）
//!
//! 引擎只在运行开始时取一次凭证，不负责刷新。

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// 访问凭证
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |t| t <= Utc::now())
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<Credential>;
}

/// 固定凭证
pub struct StaticCredentials(pub Credential);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self) -> Result<Credential> {
        Ok(self.0.clone())
    }
}

/// 令牌文件格式（兼容 `token` / `access_token` 两种字段名）
#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(default)]
    expiry: Option<String>,
}

/// 先读环境变量，再读令牌文件
pub struct TokenFileProvider {
    env_var: String,
    path: PathBuf,
}

impl TokenFileProvider {
    pub fn new(env_var: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            env_var: env_var.into(),
            path: path.into(),
        }
    }

    fn parse(content: &str) -> Result<Credential> {
        let token: TokenFile = serde_json::from_str(content).context("令牌 JSON 无效")?;
        if token.token.is_empty() {
            return Err(anyhow!("令牌为空"));
        }
        let expires_at = match token.expiry {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .with_context(|| format!("无法解析过期时间: {}", s))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        Ok(Credential {
            access_token: token.token,
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialProvider for TokenFileProvider {
    async fn credential(&self) -> Result<Credential> {
        if let Ok(content) = std::env::var(&self.env_var) {
            debug!("从环境变量 {} 读取令牌", self.env_var);
            return Self::parse(&content);
        }

        debug!("环境变量未设置，读取令牌文件 {:?}", self.path);
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("找不到令牌: 环境变量 {} 与文件 {:?} 都不可用", self.env_var, self.path))?;
        Self::parse(&content)
    }
}
