pub mod comparator;
pub mod engine;
pub mod hashing;
pub mod history;
pub mod lister;
pub mod metadata;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod tree;

pub use comparator::ChangeDetector;
pub use engine::{resolve_collisions, FileFailure, SyncConfig, SyncEngine, SyncPlan, SyncReport};
pub use hashing::{hash_bytes, hash_file};
pub use history::{SyncHistory, SyncRunRecord};
pub use lister::RemoteLister;
pub use metadata::MetadataFetcher;
pub use retry::RetryPolicy;
pub use session::SyncSession;
pub use transfer::{ChunkedDownload, DownloadStatus, TransferOutcome, Transferer};
pub use tree::{sanitize_component, ScanConfig, TreeFlattener};
