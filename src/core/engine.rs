use crate::auth::CredentialProvider;
use crate::config::CollisionPolicy;
use crate::core::comparator::ChangeDetector;
use crate::core::history::SyncHistory;
use crate::core::lister::RemoteLister;
use crate::core::metadata::MetadataFetcher;
use crate::core::retry::RetryPolicy;
use crate::core::session::SyncSession;
use crate::core::transfer::{Transferer, DEFAULT_CHUNK_SIZE};
use crate::core::tree::{ScanConfig, TreeFlattener};
use crate::error::{SyncError, SyncResult};
use crate::models::{RemoteItem, SyncDecision, SyncProgress, SyncStatus};
use crate::remote::RemoteStore;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 进度上报间隔
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 分块大小（字节）
    pub chunk_size: u64,
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
    pub retry: RetryPolicy,
    /// 写入后校验哈希，不一致时重新下载一次
    pub verify_after_write: bool,
    pub collision_policy: CollisionPolicy,
    /// 冲突检测时忽略大小写
    pub case_insensitive_paths: bool,
    /// 遍历配置
    pub scan_config: ScanConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_transfers: 1,
            retry: RetryPolicy::default(),
            verify_after_write: true,
            collision_policy: CollisionPolicy::Fail,
            case_insensitive_paths: cfg!(any(target_os = "windows", target_os = "macos")),
            scan_config: ScanConfig::default(),
        }
    }
}

/// 单个文件的失败记录
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub relative_path: String,
    pub remote_id: String,
    pub error: String,
}

impl FileFailure {
    pub fn new(item: &RemoteItem, error: &SyncError) -> Self {
        Self {
            relative_path: item.relative_file_path(),
            remote_id: item.id.clone(),
            error: error.to_string(),
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub remote_root_id: String,
    pub local_root: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub files_scanned: u32,
    pub files_transferred: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    /// 需要下载的文件大小之和
    pub bytes_planned: u64,
    /// 成功下载的文件大小之和
    pub bytes_transferred: u64,
    pub duration_ms: u64,
    pub failures: Vec<FileFailure>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }
}

/// 差异分析结果
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub files_scanned: u32,
    pub decisions: Vec<SyncDecision>,
    /// 分析阶段就失败的文件（路径冲突、本地读取失败）
    pub failures: Vec<FileFailure>,
}

impl SyncPlan {
    pub fn pending(&self) -> impl Iterator<Item = &SyncDecision> {
        self.decisions.iter().filter(|d| d.needs_transfer)
    }

    pub fn bytes_planned(&self) -> u64 {
        self.pending().map(|d| d.metadata.size_bytes).sum()
    }
}

/// 检查本地路径冲突
///
/// 按遍历顺序处理，第一个占用路径的文件获胜。
pub fn resolve_collisions(
    items: Vec<RemoteItem>,
    policy: CollisionPolicy,
    case_insensitive: bool,
) -> SyncResult<(Vec<RemoteItem>, Vec<FileFailure>)> {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();

    for item in items {
        let path = item.relative_file_path();
        let key = if case_insensitive {
            path.to_lowercase()
        } else {
            path.clone()
        };

        if let Some(first_id) = owners.get(&key) {
            let err = SyncError::PathCollision {
                path,
                first_id: first_id.clone(),
                second_id: item.id.clone(),
            };
            match policy {
                CollisionPolicy::Fail => return Err(err),
                CollisionPolicy::KeepFirst => {
                    warn!("{}", err);
                    dropped.push(FileFailure::new(&item, &err));
                }
            }
        } else {
            owners.insert(key, item.id.clone());
            kept.push(item);
        }
    }

    Ok((kept, dropped))
}

/// 同步引擎
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    history: Option<SyncHistory>,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_config(remote, SyncConfig::default())
    }

    pub fn with_config(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self {
            remote,
            config,
            credentials: None,
            history: None,
            progress_tx: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 运行前获取凭证并交给远程存储
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn with_history(mut self, history: SyncHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_progress(mut self, progress_tx: mpsc::Sender<SyncProgress>) -> Self {
        self.progress_tx = Some(progress_tx);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 取消同步（运行开始前调用同样有效，标志不会被重置）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 供其它任务（如 Ctrl-C 处理）使用的取消标志
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 只分析不下载
    pub async fn analyze(&self, remote_root_id: &str, local_root: &Path) -> SyncResult<SyncPlan> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.authenticate(&run_id).await?;
        self.plan(&run_id, remote_root_id, local_root).await
    }

    /// 把远程文件夹树镜像到 `local_root`
    ///
    /// 认证、遍历、元数据失败会终止运行并返回错误；单个文件的失败收集在报告中。
    pub async fn sync(&self, remote_root_id: &str, local_root: &Path) -> SyncResult<SyncReport> {
        let start_time = chrono::Utc::now().timestamp();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "开始同步: {} [{}] -> {} ({})",
            self.remote.name(),
            remote_root_id,
            local_root.display(),
            run_id
        );

        self.authenticate(&run_id).await?;
        let plan = self.plan(&run_id, remote_root_id, local_root).await?;

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let pending: Vec<SyncDecision> = plan.pending().cloned().collect();
        let files_skipped = (plan.decisions.len() - pending.len()) as u32;
        let bytes_planned = plan.bytes_planned();
        let mut failures = plan.failures;

        info!(
            "比较完成: {} 个文件, {} 个需要下载 ({} bytes), {} 个已同步, {} 个失败",
            plan.files_scanned,
            pending.len(),
            bytes_planned,
            files_skipped,
            failures.len()
        );

        let session = Arc::new(SyncSession::new(
            &run_id,
            plan.files_scanned,
            pending.len() as u32,
            bytes_planned,
        ));

        // 没有需要下载的文件时不创建本地根目录
        let (files_transferred, bytes_transferred, transfer_failures) = if pending.is_empty() {
            info!("所有文件已是最新");
            (0, 0, Vec::new())
        } else {
            tokio::fs::create_dir_all(local_root)
                .await
                .map_err(|e| SyncError::local_io(local_root, e))?;

            self.send_phase(
                &run_id,
                SyncStatus::Syncing,
                format!("准备下载 {} 个文件...", pending.len()),
                plan.files_scanned,
            )
            .await;

            self.execute_transfers(pending, local_root, session.clone())
                .await
        };
        failures.extend(transfer_failures);

        let status = if self.is_cancelled() {
            SyncStatus::Cancelled
        } else if failures.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::PartiallyFailed
        };

        let report = SyncReport {
            run_id: run_id.clone(),
            remote_root_id: remote_root_id.to_string(),
            local_root: local_root.display().to_string(),
            start_time,
            end_time: chrono::Utc::now().timestamp(),
            status: status.clone(),
            files_scanned: plan.files_scanned,
            files_transferred,
            files_skipped,
            files_failed: failures.len() as u32,
            bytes_planned,
            bytes_transferred,
            duration_ms: started.elapsed().as_millis() as u64,
            failures,
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&report).await {
                warn!("记录同步历史失败: {}", e);
            }
        }

        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(session.snapshot(status, "同步完成".to_string(), 0))
                .await;
        }

        info!(
            "同步完成: {} - 下载 {}, 跳过 {}, 失败 {}, {} bytes, {}ms",
            run_id,
            report.files_transferred,
            report.files_skipped,
            report.files_failed,
            report.bytes_transferred,
            report.duration_ms
        );

        Ok(report)
    }

    async fn authenticate(&self, run_id: &str) -> SyncResult<()> {
        let Some(provider) = &self.credentials else {
            return Ok(());
        };

        self.send_phase(run_id, SyncStatus::Authenticating, "正在验证凭证...".into(), 0)
            .await;

        let credential = provider.credential().await.map_err(|e| {
            error!("获取凭证失败: {:#}", e);
            SyncError::AuthFailure(format!("{:#}", e))
        })?;
        if credential.is_expired() {
            error!("凭证已过期");
            return Err(SyncError::AuthFailure("凭证已过期".to_string()));
        }

        self.remote
            .authorize(&credential)
            .await
            .map_err(|e| SyncError::AuthFailure(format!("{:#}", e)))
    }

    /// 遍历远程树并逐个判断是否需要下载
    async fn plan(
        &self,
        run_id: &str,
        remote_root_id: &str,
        local_root: &Path,
    ) -> SyncResult<SyncPlan> {
        let remote = self.remote.as_ref();

        self.send_phase(run_id, SyncStatus::Scanning, "正在遍历远程文件夹...".into(), 0)
            .await;

        let items = TreeFlattener::new(RemoteLister::new(remote, self.config.retry))
            .with_config(self.config.scan_config.clone())
            .with_cancel(self.cancelled.clone())
            .flatten(remote_root_id)
            .await
            .inspect_err(|e| error!("遍历远程树失败: {}", e))?;
        let files_scanned = items.len() as u32;

        let (items, mut failures) = resolve_collisions(
            items,
            self.config.collision_policy,
            self.config.case_insensitive_paths,
        )?;

        self.send_phase(
            run_id,
            SyncStatus::Comparing,
            "正在比较文件差异...".into(),
            files_scanned,
        )
        .await;

        let fetcher = MetadataFetcher::new(remote, self.config.retry);
        let detector = ChangeDetector::new(local_root);
        let mut decisions = Vec::with_capacity(items.len());

        for item in items {
            if self.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let metadata = fetcher
                .fetch(&item.id)
                .await
                .inspect_err(|e| error!("获取元数据失败 {}: {}", item.relative_file_path(), e))?;

            match detector.decide(&item, metadata).await {
                Ok(decision) => decisions.push(decision),
                Err(e) if e.is_per_file() => {
                    warn!("无法比较本地文件 {}: {}", item.relative_file_path(), e);
                    failures.push(FileFailure::new(&item, &e));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(SyncPlan {
            files_scanned,
            decisions,
            failures,
        })
    }

    /// 执行下载，返回 (成功数, 成功字节数, 失败列表)
    async fn execute_transfers(
        &self,
        decisions: Vec<SyncDecision>,
        local_root: &Path,
        session: Arc<SyncSession>,
    ) -> (u32, u64, Vec<FileFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let transferer = Transferer::new(
            self.config.chunk_size,
            self.config.verify_after_write,
            self.config.retry,
        );

        let _ticker = scopeguard::guard(self.spawn_progress_ticker(session.clone()), |handle| {
            if let Some(handle) = handle {
                handle.abort();
            }
        });

        let mut handles: Vec<(RemoteItem, JoinHandle<Option<SyncResult<u64>>>)> = Vec::new();

        for decision in decisions {
            if self.is_cancelled() {
                info!("同步已取消，剩余文件不再下载");
                break;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let remote = self.remote.clone();
            let session = session.clone();
            let cancelled = self.cancelled.clone();
            let dest = decision.item.local_path(local_root);
            let item = decision.item.clone();

            debug!("下载 {} ({})", item.relative_file_path(), decision.reason);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                // 排队期间被取消的文件不算失败
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }

                let sink_session = session.clone();
                let sink = move |delta: u64| sink_session.record_bytes(delta);
                let result = transferer
                    .transfer(
                        remote.as_ref(),
                        &decision.item,
                        &decision.metadata,
                        &dest,
                        &cancelled,
                        &sink,
                    )
                    .await;

                match &result {
                    Ok(_) => session.file_completed(),
                    Err(_) => session.file_failed(),
                }
                Some(result.map(|outcome| outcome.bytes_written))
            });

            handles.push((item, handle));
        }

        let mut files_transferred = 0u32;
        let mut bytes_transferred = 0u64;
        let mut failures = Vec::new();

        for (item, handle) in handles {
            match handle.await {
                Ok(Some(Ok(bytes))) => {
                    files_transferred += 1;
                    bytes_transferred += bytes;
                }
                Ok(Some(Err(e))) => {
                    error!("下载失败 {}: {}", item.relative_file_path(), e);
                    failures.push(FileFailure::new(&item, &e));
                }
                Ok(None) => {}
                Err(e) => {
                    error!("下载任务异常 {}: {}", item.relative_file_path(), e);
                    failures.push(FileFailure {
                        relative_path: item.relative_file_path(),
                        remote_id: item.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        (files_transferred, bytes_transferred, failures)
    }

    /// 启动进度上报任务
    fn spawn_progress_ticker(&self, session: Arc<SyncSession>) -> Option<JoinHandle<()>> {
        let tx = self.progress_tx.clone()?;
        let cancelled = self.cancelled.clone();

        Some(tokio::spawn(async move {
            let mut last_bytes = 0u64;
            let mut last_time = Instant::now();

            loop {
                tokio::time::sleep(PROGRESS_INTERVAL).await;

                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                let bytes = session.bytes_transferred();
                let now = Instant::now();
                let elapsed = now.duration_since(last_time).as_secs_f64();
                let speed = if elapsed > 0.0 {
                    (bytes.saturating_sub(last_bytes) as f64 / elapsed) as u64
                } else {
                    0
                };
                last_bytes = bytes;
                last_time = now;

                let mut progress = session.snapshot(SyncStatus::Syncing, String::new(), speed);
                progress.phase = format!(
                    "同步中 {}/{}",
                    progress.files_completed + progress.files_failed,
                    progress.files_to_sync
                );
                if tx.send(progress).await.is_err() {
                    break;
                }

                if session.is_finished() {
                    break;
                }
            }
        }))
    }

    async fn send_phase(&self, run_id: &str, status: SyncStatus, phase: String, files_scanned: u32) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(SyncProgress {
                    run_id: run_id.to_string(),
                    status,
                    phase,
                    files_scanned,
                    files_to_sync: 0,
                    files_completed: 0,
                    files_failed: 0,
                    bytes_transferred: 0,
                    bytes_total: 0,
                    speed: 0,
                    eta: 0,
                })
                .await;
        }
    }
}
