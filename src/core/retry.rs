//! 远程调用重试（指数退避）

use crate::remote::{is_auth_error, HttpStatusError};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次调用）
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），第 n 次重试等待 base * 2^n
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    /// 执行操作，临时失败时重试
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let delay = self.delay(attempt);
                    warn!(
                        "{} 失败，{}ms 后重试 ({}/{}): {:#}",
                        operation,
                        delay.as_millis(),
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 0 {
                        error!("{} 最终失败 (已重试{}次): {:#}", operation, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// 判断错误是否值得重试
pub fn is_transient(err: &anyhow::Error) -> bool {
    if is_auth_error(err) {
        return false;
    }
    if let Some(http) = err.chain().find_map(|e| e.downcast_ref::<HttpStatusError>()) {
        return http.is_transient();
    }
    if let Some(io) = err.chain().find_map(|e| e.downcast_ref::<std::io::Error>()) {
        return !matches!(
            io.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::InvalidInput
        );
    }
    true
}
