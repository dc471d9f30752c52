use async_trait::async_trait;
use bytes::Bytes;
use drivemirror_lib::auth::{Credential, StaticCredentials};
use drivemirror_lib::config::CollisionPolicy;
use drivemirror_lib::core::{RetryPolicy, ScanConfig, SyncConfig, SyncEngine, SyncHistory};
use drivemirror_lib::models::{ChangeReason, SyncProgress, SyncStatus};
use drivemirror_lib::remote::{HttpStatusError, ListPage, LocalDirRemote, RawMetadata, RemoteStore};
use drivemirror_lib::SyncError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, data: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

fn config() -> SyncConfig {
    SyncConfig {
        chunk_size: 4,
        retry: RetryPolicy {
            max_retries: 1,
            base_delay_ms: 1,
        },
        case_insensitive_paths: false,
        ..Default::default()
    }
}

/// 2023-05/a.pdf (10) + 2023-06/b.pdf (5) + 2023-06/c.pdf (7)
fn scenario_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "2023-05/a.pdf", b"aaaaaaaaaa");
    write(dir.path(), "2023-06/b.pdf", b"bbbbb");
    write(dir.path(), "2023-06/c.pdf", b"ccccccc");
    dir
}

fn local_engine(remote_dir: &Path) -> SyncEngine {
    let remote = LocalDirRemote::new(remote_dir).unwrap().with_page_size(2);
    SyncEngine::with_config(Arc::new(remote), config())
}

async fn pending_paths(engine: &SyncEngine, local: &Path) -> Vec<(String, ChangeReason)> {
    engine
        .analyze("", local)
        .await
        .unwrap()
        .pending()
        .map(|d| (d.item.relative_file_path(), d.reason))
        .collect()
}

/// 按需注入故障的远程存储
struct FaultyRemote {
    inner: LocalDirRemote,
    fail_list: Option<String>,
    fail_read: Option<String>,
    corrupt_once: Option<String>,
    corrupted: AtomicBool,
    cancel_on_read: Mutex<Option<Arc<AtomicBool>>>,
}

impl FaultyRemote {
    fn new(dir: &Path) -> Self {
        Self {
            inner: LocalDirRemote::new(dir).unwrap(),
            fail_list: None,
            fail_read: None,
            corrupt_once: None,
            corrupted: AtomicBool::new(false),
            cancel_on_read: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn list_page(&self, folder_id: &str, page_token: Option<&str>) -> anyhow::Result<ListPage> {
        if self.fail_list.as_deref() == Some(folder_id) {
            return Err(anyhow::Error::new(HttpStatusError {
                status: 503,
                message: "backend error".into(),
            }));
        }
        self.inner.list_page(folder_id, page_token).await
    }

    async fn file_metadata(&self, file_id: &str) -> anyhow::Result<RawMetadata> {
        self.inner.file_metadata(file_id).await
    }

    async fn read_range(&self, file_id: &str, offset: u64, length: u64) -> anyhow::Result<Bytes> {
        if self.fail_read.as_deref() == Some(file_id) {
            return Err(anyhow::Error::new(HttpStatusError {
                status: 403,
                message: "download quota exceeded".into(),
            }));
        }

        let cancel = self.cancel_on_read.lock().unwrap().clone();
        if let Some(flag) = cancel {
            flag.store(true, Ordering::SeqCst);
        }

        let data = self.inner.read_range(file_id, offset, length).await?;
        if self.corrupt_once.as_deref() == Some(file_id)
            && offset == 0
            && !self.corrupted.swap(true, Ordering::SeqCst)
        {
            let mut bad = data.to_vec();
            bad[0] ^= 0xff;
            return Ok(Bytes::from(bad));
        }
        Ok(data)
    }

    fn name(&self) -> &str {
        "faulty"
    }
}

#[tokio::test]
async fn mirrors_three_file_scenario() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("mirror");

    let report = local_engine(remote.path()).sync("", &dest).await.unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_scanned, 3);
    assert_eq!(report.files_transferred, 3);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(report.bytes_planned, 22);
    assert_eq!(report.bytes_transferred, 22);
    assert!(report.failures.is_empty());

    assert_eq!(std::fs::read(dest.join("2023-05/a.pdf")).unwrap(), b"aaaaaaaaaa");
    assert_eq!(std::fs::read(dest.join("2023-06/b.pdf")).unwrap(), b"bbbbb");
    assert_eq!(std::fs::read(dest.join("2023-06/c.pdf")).unwrap(), b"ccccccc");
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let engine = local_engine(remote.path());

    engine.sync("", local.path()).await.unwrap();
    let second = engine.sync("", local.path()).await.unwrap();

    assert_eq!(second.status, SyncStatus::Completed);
    assert_eq!(second.files_transferred, 0);
    assert_eq!(second.bytes_transferred, 0);
    assert_eq!(second.files_skipped, 3);
}

#[tokio::test]
async fn new_remote_file_is_the_only_transfer() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let engine = local_engine(remote.path());
    engine.sync("", local.path()).await.unwrap();

    write(remote.path(), "2023-06/e.pdf", b"new");
    assert_eq!(
        pending_paths(&engine, local.path()).await,
        vec![("2023-06/e.pdf".to_string(), ChangeReason::Missing)]
    );

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.files_transferred, 1);
    assert_eq!(report.bytes_transferred, 3);
}

#[tokio::test]
async fn changed_remote_content_is_retransferred() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let engine = local_engine(remote.path());
    engine.sync("", local.path()).await.unwrap();

    // 同大小不同内容 -> 哈希不同；大小变化 -> 大小不同
    write(remote.path(), "2023-06/b.pdf", b"BBBBB");
    write(remote.path(), "2023-06/c.pdf", b"cc");

    assert_eq!(
        pending_paths(&engine, local.path()).await,
        vec![
            ("2023-06/b.pdf".to_string(), ChangeReason::HashMismatch),
            ("2023-06/c.pdf".to_string(), ChangeReason::SizeMismatch),
        ]
    );

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.files_transferred, 2);
    assert_eq!(report.bytes_transferred, 7);
    assert_eq!(std::fs::read(local.path().join("2023-06/b.pdf")).unwrap(), b"BBBBB");
    assert_eq!(std::fs::read(local.path().join("2023-06/c.pdf")).unwrap(), b"cc");
}

#[tokio::test]
async fn local_tampering_is_repaired() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let engine = local_engine(remote.path());
    engine.sync("", local.path()).await.unwrap();

    std::fs::remove_file(local.path().join("2023-05/a.pdf")).unwrap();
    std::fs::write(local.path().join("2023-06/b.pdf"), b"bb").unwrap();

    assert_eq!(
        pending_paths(&engine, local.path()).await,
        vec![
            ("2023-05/a.pdf".to_string(), ChangeReason::Missing),
            ("2023-06/b.pdf".to_string(), ChangeReason::SizeMismatch),
        ]
    );

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.files_transferred, 2);
    assert_eq!(report.bytes_transferred, 15);
    assert_eq!(std::fs::read(local.path().join("2023-06/b.pdf")).unwrap(), b"bbbbb");
}

#[tokio::test]
async fn path_fidelity() {
    let remote = tempfile::tempdir().unwrap();
    write(remote.path(), "2024-01/report.pdf", b"%PDF-1.7");
    let local = tempfile::tempdir().unwrap();

    local_engine(remote.path()).sync("", local.path()).await.unwrap();

    let expected = local.path().join("2024-01").join("report.pdf");
    assert_eq!(std::fs::read(expected).unwrap(), b"%PDF-1.7");
}

#[tokio::test]
async fn byte_accounting_matches_pending_sizes() {
    let remote = scenario_tree();
    write(remote.path(), "big/blob.bin", &vec![7u8; 1000]);
    let local = tempfile::tempdir().unwrap();
    // 预先放好一个已同步的文件
    write(local.path(), "2023-05/a.pdf", b"aaaaaaaaaa");

    let engine = local_engine(remote.path());
    let plan = engine.analyze("", local.path()).await.unwrap();
    let expected: u64 = plan.pending().map(|d| d.metadata.size_bytes).sum();

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(expected, 1012);
    assert_eq!(report.bytes_planned, expected);
    assert_eq!(report.bytes_transferred, expected);
    assert_eq!(report.files_skipped, 1);
}

#[tokio::test]
async fn empty_root_completes_with_zero_transfers() {
    let remote = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(remote.path().join("empty")).unwrap();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("mirror");

    let report = local_engine(remote.path()).sync("", &dest).await.unwrap();
    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_scanned, 0);
    assert_eq!(report.files_transferred, 0);
    assert!(!dest.exists());
}

#[tokio::test]
async fn empty_remote_file_replaces_tampered_local_copy() {
    let remote = tempfile::tempdir().unwrap();
    write(remote.path(), "empty.txt", b"");
    let local = tempfile::tempdir().unwrap();
    write(local.path(), "empty.txt", b"tampered-content");

    let store = LocalDirRemote::new(remote.path()).unwrap().without_checksums();
    let engine = SyncEngine::with_config(Arc::new(store), config());

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_transferred, 1);
    assert_eq!(report.bytes_transferred, 0);
    assert_eq!(std::fs::read(local.path().join("empty.txt")).unwrap().len(), 0);

    let again = engine.sync("", local.path()).await.unwrap();
    assert_eq!(again.files_transferred, 0);
    assert_eq!(again.files_skipped, 1);
}

#[tokio::test]
async fn cancel_requested_before_sync_is_honoured() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("mirror");

    let engine = local_engine(remote.path());
    engine.cancel();

    let err = engine.sync("", &dest).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert!(!dest.exists());
}

#[tokio::test]
async fn hashless_remote_relies_on_size() {
    let remote = tempfile::tempdir().unwrap();
    write(remote.path(), "notes.txt", b"hello");
    let local = tempfile::tempdir().unwrap();
    write(local.path(), "notes.txt", b"HELLO");

    let store = LocalDirRemote::new(remote.path()).unwrap().without_checksums();
    let engine = SyncEngine::with_config(Arc::new(store), config());

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.files_transferred, 0);
}

#[tokio::test]
async fn exclude_patterns_skip_items() {
    let remote = scenario_tree();
    write(remote.path(), "2023-06/scratch.tmp", b"tmp");
    let local = tempfile::tempdir().unwrap();

    let mut cfg = config();
    cfg.scan_config = ScanConfig {
        exclude_patterns: vec!["*.tmp".into()],
    };
    let store = LocalDirRemote::new(remote.path()).unwrap();
    let report = SyncEngine::with_config(Arc::new(store), cfg)
        .sync("", local.path())
        .await
        .unwrap();

    assert_eq!(report.files_scanned, 3);
    assert!(!local.path().join("2023-06/scratch.tmp").exists());
}

#[tokio::test]
async fn per_file_failure_does_not_abort_run() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();

    let mut faulty = FaultyRemote::new(remote.path());
    faulty.fail_read = Some("2023-06/b.pdf".into());
    let report = SyncEngine::with_config(Arc::new(faulty), config())
        .sync("", local.path())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::PartiallyFailed);
    assert_eq!(report.files_transferred, 2);
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.bytes_transferred, 17);
    assert_eq!(report.failures[0].relative_path, "2023-06/b.pdf");
    assert_eq!(report.failures[0].remote_id, "2023-06/b.pdf");

    // 恢复后只补传失败的文件
    let retry = local_engine(remote.path()).sync("", local.path()).await.unwrap();
    assert_eq!(retry.files_transferred, 1);
    assert_eq!(retry.bytes_transferred, 5);
    assert_eq!(retry.status, SyncStatus::Completed);
}

#[tokio::test]
async fn listing_failure_is_fatal() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("mirror");

    let mut faulty = FaultyRemote::new(remote.path());
    faulty.fail_list = Some("2023-06".into());
    let err = SyncEngine::with_config(Arc::new(faulty), config())
        .sync("", &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteUnavailable { .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn corrupted_download_is_retried_once() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();

    let mut faulty = FaultyRemote::new(remote.path());
    faulty.corrupt_once = Some("2023-05/a.pdf".into());
    let report = SyncEngine::with_config(Arc::new(faulty), config())
        .sync("", local.path())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_transferred, 3);
    assert_eq!(std::fs::read(local.path().join("2023-05/a.pdf")).unwrap(), b"aaaaaaaaaa");
}

#[tokio::test]
async fn expired_credentials_abort_before_listing() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let dest = local.path().join("mirror");

    let credential = Credential {
        access_token: "stale".into(),
        expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(5)),
    };
    let err = local_engine(remote.path())
        .with_credentials(Arc::new(StaticCredentials(credential)))
        .sync("", &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AuthFailure(_)));
    assert!(!dest.exists());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn case_insensitive_collisions_follow_policy() {
    let remote = tempfile::tempdir().unwrap();
    write(remote.path(), "docs/A.txt", b"upper");
    write(remote.path(), "docs/a.txt", b"lower");
    let local = tempfile::tempdir().unwrap();

    let mut cfg = config();
    cfg.case_insensitive_paths = true;
    let store: Arc<dyn RemoteStore> = Arc::new(LocalDirRemote::new(remote.path()).unwrap());

    let err = SyncEngine::with_config(store.clone(), cfg.clone())
        .sync("", local.path())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PathCollision { .. }));

    cfg.collision_policy = CollisionPolicy::KeepFirst;
    let report = SyncEngine::with_config(store, cfg)
        .sync("", local.path())
        .await
        .unwrap();
    assert_eq!(report.status, SyncStatus::PartiallyFailed);
    assert_eq!(report.files_transferred, 1);
    assert_eq!(report.failures[0].relative_path, "docs/a.txt");
    assert_eq!(std::fs::read(local.path().join("docs/A.txt")).unwrap(), b"upper");
}

#[tokio::test]
async fn cancellation_leaves_partial_file_for_next_run() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();

    let faulty = Arc::new(FaultyRemote::new(remote.path()));
    let engine = SyncEngine::with_config(faulty.clone(), config());
    *faulty.cancel_on_read.lock().unwrap() = Some(engine.cancel_flag());

    let report = engine.sync("", local.path()).await.unwrap();
    assert_eq!(report.status, SyncStatus::Cancelled);
    assert_eq!(report.files_transferred, 0);
    assert_eq!(report.files_failed, 1);
    // 第一块 4 字节已写入
    assert_eq!(std::fs::read(local.path().join("2023-05/a.pdf")).unwrap(), b"aaaa");
    assert!(!local.path().join("2023-06/b.pdf").exists());

    let next = local_engine(remote.path()).sync("", local.path()).await.unwrap();
    assert_eq!(next.status, SyncStatus::Completed);
    assert_eq!(next.files_transferred, 3);
    assert_eq!(next.bytes_transferred, 22);
}

#[tokio::test]
async fn concurrent_transfers_account_every_byte() {
    let remote = tempfile::tempdir().unwrap();
    let mut total = 0u64;
    for i in 0..20 {
        let data = vec![i as u8; 100 + i * 13];
        total += data.len() as u64;
        write(remote.path(), &format!("batch-{}/file-{:02}.bin", i % 3, i), &data);
    }
    let local = tempfile::tempdir().unwrap();

    let mut cfg = config();
    cfg.max_concurrent_transfers = 4;
    cfg.chunk_size = 64;
    let store = LocalDirRemote::new(remote.path()).unwrap();
    let report = SyncEngine::with_config(Arc::new(store), cfg)
        .sync("", local.path())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.files_transferred, 20);
    assert_eq!(report.bytes_transferred, total);
    assert_eq!(
        std::fs::read(local.path().join("batch-1/file-07.bin")).unwrap(),
        vec![7u8; 100 + 7 * 13]
    );
}

#[tokio::test]
async fn progress_and_history_are_reported() {
    let remote = scenario_tree();
    let local = tempfile::tempdir().unwrap();
    let history = SyncHistory::in_memory().await.unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<SyncProgress>(256);

    let engine = local_engine(remote.path())
        .with_history(history.clone())
        .with_progress(tx);
    let report = engine.sync("", local.path()).await.unwrap();
    drop(engine);

    let mut updates = Vec::new();
    while let Some(progress) = rx.recv().await {
        updates.push(progress);
    }
    assert_eq!(updates.first().unwrap().status, SyncStatus::Scanning);
    assert!(updates.iter().any(|p| p.status == SyncStatus::Comparing));
    let last = updates.last().unwrap();
    assert_eq!(last.status, SyncStatus::Completed);
    assert_eq!(last.bytes_transferred, 22);
    assert_eq!(last.bytes_total, 22);
    assert!(updates.iter().all(|p| p.run_id == report.run_id));

    let runs = history.recent(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
    assert_eq!(runs[0].files_transferred, 3);
}
