//! End-to-end workflows through a `ResourceSession`
//!
//! A mock storage backend stands in for the remote API; every component is
//! exercised through the session the way a file-manager client would use it.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use cirrus::{
    dispatch::{BatchRequest, BatchTransport, Method},
    performance::FixedMemory,
    prefetch::ResourceLoader,
    recovery::BulkOptions,
    ApiError, CirrusConfig, ConfigLoader, FetchError, Priority, ResourceEvent, ResourceSession,
};
use serde_json::{json, Value};

const MB: u64 = 1024 * 1024;

/// In-memory folder tree answering list requests
struct MockStorage {
    folders: HashMap<String, Vec<String>>,
    physical_calls: AtomicU64,
    requests: AtomicU64,
}

impl MockStorage {
    fn new() -> Self {
        let mut folders = HashMap::new();
        folders.insert("/".to_string(), vec!["docs".to_string(), "photos".to_string()]);
        folders.insert("/docs".to_string(), vec!["report.pdf".to_string()]);
        folders.insert("/photos".to_string(), vec!["cat.jpg".to_string(), "dog.jpg".to_string()]);
        Self {
            folders,
            physical_calls: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    fn list(&self, path: &str) -> Result<Value, ApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.folders.get(path) {
            Some(entries) => Ok(json!({ "path": path, "entries": entries })),
            None => Err(ApiError::status(404, format!("folder {} not found", path))),
        }
    }
}

#[async_trait]
impl BatchTransport for MockStorage {
    async fn send(&self, request: &BatchRequest) -> Result<Value, ApiError> {
        self.list(&request.path)
    }

    async fn send_batch(&self, requests: &[BatchRequest]) -> Vec<Result<Value, ApiError>> {
        self.physical_calls.fetch_add(1, Ordering::SeqCst);
        requests.iter().map(|request| self.list(&request.path)).collect()
    }
}

#[async_trait]
impl ResourceLoader<Value> for MockStorage {
    fn cache_key(&self, resource_id: &str) -> String {
        format!("list:{}", resource_id)
    }

    async fn load(&self, resource_id: &str) -> Result<Value, ApiError> {
        self.list(resource_id)
    }
}

fn build_session(storage: &Arc<MockStorage>, memory: Arc<FixedMemory>) -> ResourceSession<Value> {
    ResourceSession::builder()
        .transport(Arc::clone(storage) as Arc<dyn BatchTransport>)
        .loader(Arc::clone(storage) as Arc<dyn ResourceLoader<Value>>)
        .memory_source(memory)
        .build()
        .unwrap()
}

async fn list_folder(
    session: &ResourceSession<Value>,
    path: &str,
) -> Result<Value, FetchError<ApiError>> {
    let batch = session.batch().unwrap().clone();
    let folder = path.to_string();
    session
        .fetch(&format!("list:{}", path), format!("list:{}", path), Priority::High, move || {
            batch.enqueue(format!("list:{}", folder), Method::GET, folder.clone(), None)
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_browse_folders_hits_cache_on_return() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));

    session.track_access("/docs");
    let docs = list_folder(&session, "/docs").await.unwrap();
    assert_eq!(docs["entries"][0], "report.pdf");

    session.track_access("/photos");
    list_folder(&session, "/photos").await.unwrap();

    let before = storage.requests.load(Ordering::SeqCst);
    session.track_access("/docs");
    let again = list_folder(&session, "/docs").await.unwrap();
    assert_eq!(again, docs);
    assert_eq!(storage.requests.load(Ordering::SeqCst), before);

    let stats = session.cache().stats();
    assert!(stats.hits >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_warms_root_listing() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));

    session.track_access("/photos");
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(session.cache().has("list:/"));
    let prefetch = session.prefetch().unwrap();
    assert_eq!(prefetch.stats().loaded, 1);

    // The warmed entry serves the next fetch without touching the backend
    let before = storage.requests.load(Ordering::SeqCst);
    let root = list_folder(&session, "/").await.unwrap();
    assert_eq!(root["entries"][1], "photos");
    assert_eq!(storage.requests.load(Ordering::SeqCst), before);
}

#[tokio::test(start_paused = true)]
async fn test_identical_batch_requests_share_one_call() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));
    let batch = session.batch().unwrap();

    let tickets: Vec<_> = (0..3)
        .map(|i| batch.enqueue(format!("req-{}", i), Method::GET, "/docs", None))
        .collect();
    let missing = batch.enqueue("req-missing", Method::GET, "/nope", None);

    for ticket in tickets {
        assert_eq!(ticket.await.unwrap()["path"], "/docs");
    }
    let error = missing.await.unwrap_err();
    assert_eq!(error.status_code(), Some(404));

    assert_eq!(storage.physical_calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.requests.load(Ordering::SeqCst), 2);
    assert_eq!(batch.stats().deduplicated, 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_folder_fails_without_retry() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));

    let error = list_folder(&session, "/missing").await.unwrap_err();
    match error {
        FetchError::Failed { error, attempts, .. } => {
            assert_eq!(error.status_code(), Some(404));
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.cache().has("list:/missing"));
}

#[tokio::test(start_paused = true)]
async fn test_optimizer_retunes_components_under_memory_pressure() {
    let storage = Arc::new(MockStorage::new());
    let memory = Arc::new(FixedMemory::from_mb(100));
    let session = build_session(&storage, Arc::clone(&memory));
    let mut events = session.optimizer().subscribe();

    memory.set(450 * MB);
    let report = session.force_optimization();
    assert!(report.changed);
    assert!(report.cleanup_triggered);
    assert!(report.failed_components.is_empty());

    assert_eq!(session.cache().capacity(), 125);
    assert_eq!(session.queue().max_concurrent(), 3);
    assert_eq!(session.batch().unwrap().max_batch_size(), 5);

    match events.recv().await.unwrap() {
        ResourceEvent::StrategyChanged(strategy) => assert_eq!(strategy.cache_capacity, 125),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        ResourceEvent::FreeResources { .. }
    ));

    // Memory recovers and the user is idle: capacity returns, prefetching widens
    memory.set(100 * MB);
    let report = session.force_optimization();
    assert!(report.changed);
    assert_eq!(session.cache().capacity(), 500);
    assert_eq!(session.queue().max_concurrent(), 6);
    assert_eq!(session.prefetch().unwrap().max_concurrent(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_optimization_runs_until_shutdown() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));
    assert!(session.start());

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(session.optimizer().history().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(session.optimizer().history().len(), 2);

    session.shutdown().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(session.optimizer().history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_listing_reports_partial_failure() {
    let storage = Arc::new(MockStorage::new());
    let session = build_session(&storage, Arc::new(FixedMemory::from_mb(100)));
    let progress = Arc::new(AtomicU32::new(0));

    let folders = vec!["/", "/docs", "/missing", "/photos"];
    let seen = Arc::clone(&progress);
    let options = BulkOptions::new("bulk-list")
        .with_batch_size(2)
        .with_progress(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let backend = Arc::clone(&storage);
    let report = session
        .recovery()
        .execute_bulk_with_recovery(
            folders,
            move |folder: &str| {
                let backend = Arc::clone(&backend);
                let folder = folder.to_string();
                async move { backend.list(&folder) }
            },
            options,
        )
        .await;

    assert_eq!(report.total, 4);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert!(!report.all_succeeded());
    assert_eq!(progress.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_config_file_shapes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cirrus.toml");
    std::fs::write(
        &path,
        "[cache]\nmax_entries = 40\n\n[queue]\nmax_concurrent = 2\n\n[retry]\nmax_retries = 1\n",
    )
    .unwrap();

    let config: CirrusConfig = ConfigLoader::new()
        .with_env_prefix("CIRRUS_E2E_SESSION")
        .with_path(&path)
        .load()
        .unwrap();

    let session = ResourceSession::<Value>::builder()
        .config(config)
        .memory_source(Arc::new(FixedMemory::from_mb(100)))
        .build()
        .unwrap();

    assert_eq!(session.cache().capacity(), 40);
    assert_eq!(session.queue().max_concurrent(), 2);
    assert_eq!(session.recovery().retry_config().max_retries, 1);
    assert_eq!(session.optimizer().baseline().cache_capacity, 40);
    assert!(session.batch().is_none());
    assert!(session.prefetch().is_none());
}
