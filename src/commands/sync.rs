use super::{Backend, SyncArgs};
use crate::auth::TokenFileProvider;
use crate::config::{CollisionPolicy, TransferConfig};
use crate::core::{SyncEngine, SyncHistory, SyncReport};
use crate::models::{SyncProgress, SyncStatus};
use crate::remote::{create_remote, RemoteConfig, RemoteType};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Drive 令牌环境变量
pub const TOKEN_ENV: &str = "DRIVEMIRROR_TOKEN";

pub const HISTORY_DB: &str = "drivemirror.db";

fn remote_config(args: &SyncArgs) -> RemoteConfig {
    let typ = match args.backend {
        Backend::Drive => RemoteType::Drive,
        Backend::Local => RemoteType::Local,
        Backend::Webdav => RemoteType::WebDav,
        Backend::S3 => RemoteType::S3,
    };
    let mut config = RemoteConfig::new(typ);
    config.path = args.source_dir.clone();
    config.endpoint = args.endpoint.clone();
    config.username = args.username.clone();
    config.password = args.password.clone();
    config.bucket = args.bucket.clone();
    config.region = Some(args.region.clone());
    config.access_key = args.access_key.clone();
    config.secret_key = args.secret_key.clone();
    config
}

/// 配置文件为基础，命令行参数覆盖
fn transfer_config(args: &SyncArgs, data_dir: &Path) -> TransferConfig {
    let mut config = TransferConfig::load(data_dir);
    if let Some(chunk_size_mb) = args.chunk_size_mb {
        config.chunk_size_mb = chunk_size_mb;
    }
    if let Some(jobs) = args.jobs {
        config.max_concurrent_transfers = jobs;
    }
    if args.no_verify {
        config.verify_after_write = false;
    }
    if args.keep_first {
        config.collision_policy = CollisionPolicy::KeepFirst;
    }
    config.exclude_patterns.extend(args.exclude.iter().cloned());
    config
}

fn default_root(backend: Backend) -> &'static str {
    match backend {
        Backend::Drive => "root",
        _ => "",
    }
}

/// 把进度写到日志
fn spawn_progress_logger(mut rx: mpsc::Receiver<SyncProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            match progress.status {
                SyncStatus::Syncing if progress.bytes_total > 0 => info!(
                    "{} | {}/{} bytes, {} B/s, 剩余 {}s",
                    progress.phase,
                    progress.bytes_transferred,
                    progress.bytes_total,
                    progress.speed,
                    progress.eta
                ),
                _ => info!("[{}] {}", progress.status, progress.phase),
            }
        }
    })
}

fn print_report(report: &SyncReport) {
    println!(
        "{}: 扫描 {} 个文件, 下载 {}, 跳过 {}, 失败 {}, {} / {} bytes, 用时 {}ms",
        report.status,
        report.files_scanned,
        report.files_transferred,
        report.files_skipped,
        report.files_failed,
        report.bytes_transferred,
        report.bytes_planned,
        report.duration_ms
    );
    for failure in &report.failures {
        println!("  失败 {} ({}): {}", failure.relative_path, failure.remote_id, failure.error);
    }
}

/// 执行 `sync` 子命令，返回是否全部成功
pub async fn run(args: &SyncArgs, data_dir: &Path) -> Result<bool> {
    let remote = create_remote(&remote_config(args)).context("创建远程存储失败")?;
    let config = transfer_config(args, data_dir);
    let root = args
        .root
        .clone()
        .unwrap_or_else(|| default_root(args.backend).to_string());

    let mut engine = SyncEngine::with_config(remote, config.sync_config());

    if args.backend == Backend::Drive {
        let token_file = args
            .token_file
            .clone()
            .unwrap_or_else(|| data_dir.join("token.json"));
        engine = engine.with_credentials(Arc::new(TokenFileProvider::new(TOKEN_ENV, token_file)));
    }

    match SyncHistory::open(&data_dir.join(HISTORY_DB)).await {
        Ok(history) => engine = engine.with_history(history),
        Err(e) => warn!("无法打开同步历史，本次不记录: {:#}", e),
    }

    let (tx, rx) = mpsc::channel(64);
    let engine = engine.with_progress(tx);
    let logger = spawn_progress_logger(rx);

    let cancel_flag = engine.cancel_flag();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，当前文件结束后停止");
            cancel_flag.store(true, Ordering::SeqCst);
        }
    });
    let _ctrl_c = scopeguard::guard(ctrl_c, |handle| handle.abort());

    if args.dry_run {
        let plan = engine
            .analyze(&root, &args.dest)
            .await
            .context("分析失败")?;
        for decision in plan.pending() {
            println!(
                "{}\t{}\t{}",
                decision.reason,
                decision.metadata.size_bytes,
                decision.item.relative_file_path()
            );
        }
        for failure in &plan.failures {
            println!("failed\t-\t{}: {}", failure.relative_path, failure.error);
        }
        println!(
            "{} 个文件需要下载, 共 {} bytes",
            plan.pending().count(),
            plan.bytes_planned()
        );
        return Ok(plan.failures.is_empty());
    }

    let report = engine.sync(&root, &args.dest).await.context("同步失败")?;

    // 关闭进度通道，等日志任务写完
    drop(engine);
    let _ = logger.await;

    print_report(&report);
    Ok(report.is_success())
}
