//! The versioned cache manager.
//!
//! One manager owns exactly one bucket, named by its version string. It
//! precaches the manifest on install, deletes every other bucket on
//! activate, and answers requests cache-first with a network fallback.
//! Successful same-origin network responses are written back in a
//! background task so the caller never waits on the cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::future::{join_all, try_join_all};
use reqwest::Url;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{cache_key, CacheBucket, CacheStorage};
use crate::error::{CacheError, Result};
use crate::models::{ClientMessage, Manifest, Request, Response};
use crate::network::Fetcher;

use super::{ActivationReport, Event, EventOutcome, FetchOutcome, ResponseSource, WorkerState};

pub struct CacheManager {
    version: String,
    origin: Url,
    manifest: Manifest,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: watch::Sender<WorkerState>,
    bucket: OnceLock<Arc<dyn CacheBucket>>,
    skip_waiting_on_install: bool,
    skip_waiting: AtomicBool,
    writes: Mutex<JoinSet<()>>,
}

impl CacheManager {
    pub fn new(
        version: impl Into<String>,
        origin: Url,
        manifest: Manifest,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Unregistered);
        Self {
            version: version.into(),
            origin,
            manifest,
            storage,
            fetcher,
            state,
            bucket: OnceLock::new(),
            skip_waiting_on_install: true,
            skip_waiting: AtomicBool::new(false),
            writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Whether a successful install requests activation without waiting for
    /// old clients to release. On by default.
    pub fn with_skip_waiting_on_install(mut self, enabled: bool) -> Self {
        self.skip_waiting_on_install = enabled;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Request activation without waiting for old clients to release.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            debug!(version = %self.version, "Skip waiting requested");
        }
    }

    pub(crate) fn mark_redundant(&self) {
        let previous = self.state.send_replace(WorkerState::Redundant);
        if previous != WorkerState::Redundant {
            info!(version = %self.version, from = %previous, "Cache manager is redundant");
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                result = Err(CacheError::InvalidState {
                    version: self.version.clone(),
                    expected: from,
                    actual: *state,
                });
                false
            }
        });
        result
    }

    /// Single entry point for host events.
    pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
        match event {
            Event::Install => {
                self.install().await?;
                Ok(EventOutcome::Installed)
            }
            Event::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            Event::Fetch(request) => Ok(EventOutcome::Responded(self.handle_fetch(request).await?)),
            Event::Message(message) => Ok(EventOutcome::MessageHandled {
                skip_waiting: self.handle_message(message),
            }),
        }
    }

    // ===== Install =====

    /// Precache every manifest entry into this version's bucket.
    ///
    /// All or nothing: if any entry cannot be fetched (or answers with a
    /// non-2xx status) nothing is stored, the manager becomes redundant and
    /// the error is returned.
    pub async fn install(&self) -> Result<()> {
        self.transition(WorkerState::Unregistered, WorkerState::Installing)?;
        info!(version = %self.version, entries = self.manifest.len(), "Installing cache");

        // Unknown counts as existing: cleanup must never remove a bucket
        // this install did not create
        let existed = match self.storage.has(&self.version).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(version = %self.version, error = %e, "Could not check for an existing cache");
                true
            }
        };
        match self.precache().await {
            Ok(bucket) => {
                let _ = self.bucket.set(bucket);
                self.state.send_replace(WorkerState::Installed);
                info!(version = %self.version, "Cache installed");
                if self.skip_waiting_on_install {
                    self.skip_waiting();
                }
                Ok(())
            }
            Err(e) => {
                error!(version = %self.version, error = %e, "Cache installation failed");
                if !existed {
                    if let Err(cleanup) = self.storage.delete(&self.version).await {
                        warn!(version = %self.version, error = %cleanup, "Failed to remove partial cache");
                    }
                }
                self.state.send_replace(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<Arc<dyn CacheBucket>> {
        let fetches = self.manifest.iter().map(|path| async move {
            let request = Request::new(path, &self.origin)?;
            let response = self.fetcher.fetch(&request).await.map_err(|e| {
                CacheError::PrecacheFetchFailure {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            })?;
            if !response.is_ok() {
                return Err(CacheError::PrecacheFetchFailure {
                    path: path.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok::<_, CacheError>((cache_key(&request), response))
        });
        let entries = try_join_all(fetches).await?;

        // The bucket only comes into existence once every entry is in hand
        let bucket = self.storage.open(&self.version).await?;
        let count = entries.len();
        bucket.put_all(entries).await?;
        debug!(version = %self.version, count, "Precached manifest");
        Ok(bucket)
    }

    // ===== Activate =====

    /// Delete every bucket not named by this version.
    ///
    /// Deletions run concurrently and independently; a failing deletion is
    /// logged and reported without blocking the others or the activation.
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;

        let report = self.evict_stale().await;

        self.state.send_replace(WorkerState::Active);
        info!(
            version = %self.version,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Cache activated"
        );
        Ok(report)
    }

    async fn evict_stale(&self) -> ActivationReport {
        let names = match self.storage.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!(version = %self.version, error = %e, "Could not enumerate caches");
                Vec::new()
            }
        };
        let stale: Vec<String> = names.into_iter().filter(|n| *n != self.version).collect();

        let deletions = stale.iter().map(|name| async move {
            info!(bucket = %name, "Deleting old cache");
            (name, self.storage.delete(name).await)
        });

        let mut report = ActivationReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(_) => report.deleted.push(name.clone()),
                Err(e) => {
                    let failure = CacheError::CacheDeletionFailure {
                        bucket: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %failure, "Stale cache not removed");
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    /// Resume a manager whose bucket already holds the whole manifest, as
    /// after a host restart. Buckets of other versions are evicted as on
    /// activation.
    ///
    /// Returns `None` (and stays unregistered) if the bucket is missing or
    /// any manifest entry is absent from it; the manager must then install.
    pub async fn restore(&self) -> Result<Option<ActivationReport>> {
        if self.state() != WorkerState::Unregistered {
            return Err(CacheError::InvalidState {
                version: self.version.clone(),
                expected: WorkerState::Unregistered,
                actual: self.state(),
            });
        }
        if !self.storage.has(&self.version).await? {
            return Ok(None);
        }
        let bucket = self.storage.open(&self.version).await?;
        let keys = bucket.keys().await?;
        for path in self.manifest.iter() {
            let key = cache_key(&Request::new(path, &self.origin)?);
            if !keys.contains(&key) {
                warn!(version = %self.version, missing = %key, "Cache is incomplete, reinstalling");
                return Ok(None);
            }
        }

        let _ = self.bucket.set(bucket);
        let report = self.evict_stale().await;
        self.state.send_replace(WorkerState::Active);
        info!(
            version = %self.version,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Restored active cache"
        );
        Ok(Some(report))
    }

    // ===== Fetch =====

    /// Answer one intercepted request.
    ///
    /// Requests that arrive while the manager is activating are held until
    /// activation completes.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome> {
        self.wait_until_active().await?;

        if !request.is_navigable() {
            let response = self.network(&request).await?;
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Passthrough,
            });
        }

        let key = cache_key(&request);
        let bucket = self.bucket().await?;
        match bucket.get(&key).await {
            Ok(Some(hit)) => {
                debug!(key = %key, "Cache hit");
                return Ok(FetchOutcome {
                    response: hit.data,
                    source: ResponseSource::Cache,
                });
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, using network"),
        }

        let response = self.network(&request).await?;
        if response.is_storable(&request) {
            self.store_in_background(bucket, key, response.clone()).await;
        }
        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network,
        })
    }

    async fn wait_until_active(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| *s != WorkerState::Activating).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        if state == WorkerState::Active {
            Ok(())
        } else {
            Err(CacheError::InvalidState {
                version: self.version.clone(),
                expected: WorkerState::Active,
                actual: state,
            })
        }
    }

    async fn bucket(&self) -> Result<Arc<dyn CacheBucket>> {
        if let Some(bucket) = self.bucket.get() {
            return Ok(bucket.clone());
        }
        let bucket = self.storage.open(&self.version).await?;
        Ok(self.bucket.get_or_init(|| bucket).clone())
    }

    async fn network(&self, request: &Request) -> Result<Response> {
        self.fetcher.fetch(request).await.map_err(|source| {
            let err = CacheError::NetworkFailure {
                url: request.url().to_string(),
                source,
            };
            error!(error = %err, "Fetch failed");
            err
        })
    }

    async fn store_in_background(&self, bucket: Arc<dyn CacheBucket>, key: String, response: Response) {
        let mut writes = self.writes.lock().await;
        // Reap writes that already finished
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            match bucket.put(&key, response).await {
                Ok(()) => debug!(key = %key, bucket = bucket.name(), "Cached network response"),
                Err(e) => {
                    let failure = CacheError::CacheWriteFailure {
                        key,
                        reason: e.to_string(),
                    };
                    error!(error = %failure, "Cache put failed");
                }
            }
        });
    }

    /// Wait for every background cache write started so far.
    pub async fn flush_writes(&self) {
        let mut pending = std::mem::take(&mut *self.writes.lock().await);
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(version = %self.version, error = %e, "Cache write task failed");
            }
        }
    }

    // ===== Message =====

    /// Returns true when the message requested forced activation.
    pub fn handle_message(&self, message: ClientMessage) -> bool {
        match message {
            ClientMessage::SkipWaiting => {
                self.skip_waiting();
                true
            }
            ClientMessage::Unknown => {
                debug!(version = %self.version, "Ignoring unknown client message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::models::ResponseOrigin;
    use crate::network::MemoryFetcher;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn origin() -> Url {
        Url::parse("https://plang.example").unwrap()
    }

    async fn site() -> Arc<MemoryFetcher> {
        let fetcher = Arc::new(MemoryFetcher::new(origin()));
        fetcher.serve("/", "<html>home</html>").await;
        fetcher.serve("/a.css", "body{}").await;
        fetcher
    }

    fn manager(
        version: &str,
        storage: &Arc<MemoryStorage>,
        fetcher: &Arc<MemoryFetcher>,
    ) -> CacheManager {
        CacheManager::new(
            version,
            origin(),
            Manifest::new(["/", "/a.css"]).unwrap(),
            storage.clone(),
            fetcher.clone(),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher);
        assert_eq!(mgr.state(), WorkerState::Unregistered);

        mgr.install().await.unwrap();
        assert_eq!(mgr.state(), WorkerState::Installed);
        assert!(mgr.skip_waiting_requested());

        mgr.activate().await.unwrap();
        assert_eq!(mgr.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_install_twice_is_invalid() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher);
        mgr.install().await.unwrap();
        let err = mgr.install().await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidState {
                actual: WorkerState::Installed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_before_activation_is_refused() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher);
        mgr.install().await.unwrap();

        let request = Request::new("/", &origin()).unwrap();
        let err = mgr.handle_fetch(request).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_skip_waiting_on_install_can_be_disabled() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher).with_skip_waiting_on_install(false);
        mgr.install().await.unwrap();
        assert!(!mgr.skip_waiting_requested());

        assert!(mgr.handle_message(ClientMessage::SkipWaiting));
        assert!(mgr.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_unknown_message_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher).with_skip_waiting_on_install(false);
        assert!(!mgr.handle_message(ClientMessage::Unknown));
        assert!(!mgr.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_precache_non_ok_status_fails_install() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MemoryFetcher::new(origin()));
        fetcher.serve("/", "<html>").await;
        fetcher
            .serve_response(
                "/a.css",
                Response::new("https://plang.example/a.css", 500, ResponseOrigin::SameOrigin),
            )
            .await;

        let mgr = manager("v1", &storage, &fetcher);
        let err = mgr.install().await.unwrap_err();
        assert!(matches!(err, CacheError::PrecacheFetchFailure { ref path, .. } if path == "/a.css"));
        assert_eq!(mgr.state(), WorkerState::Redundant);
        // Nothing is left behind for a version that never installed
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_requires_existing_bucket() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;

        let fresh = manager("v1", &storage, &fetcher);
        assert!(fresh.restore().await.unwrap().is_none());
        assert_eq!(fresh.state(), WorkerState::Unregistered);

        fresh.install().await.unwrap();
        fresh.activate().await.unwrap();

        let calls = fetcher.calls();
        let resumed = manager("v1", &storage, &fetcher);
        assert!(resumed.restore().await.unwrap().is_some());
        assert_eq!(resumed.state(), WorkerState::Active);

        let outcome = resumed
            .handle_fetch(Request::new("/a.css", &origin()).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_restore_rejects_incomplete_bucket() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;

        // Left behind by an install that died before storing anything
        storage.open("v1").await.unwrap();
        let mgr = manager("v1", &storage, &fetcher);
        assert!(mgr.restore().await.unwrap().is_none());
        assert_eq!(mgr.state(), WorkerState::Unregistered);

        mgr.install().await.unwrap();
        let bucket = storage.open("v1").await.unwrap();
        assert_eq!(bucket.keys().await.unwrap(), vec!["/", "/a.css"]);
    }

    #[tokio::test]
    async fn test_restore_evicts_other_versions() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;

        let v1 = manager("v1", &storage, &fetcher);
        v1.install().await.unwrap();
        v1.activate().await.unwrap();
        // Installed but never activated before the host went away
        manager("v2", &storage, &fetcher).install().await.unwrap();
        assert_eq!(storage.list().await.unwrap(), vec!["v1", "v2"]);

        let report = manager("v2", &storage, &fetcher)
            .restore()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.deleted, vec!["v1"]);
        assert!(report.is_clean());
        assert_eq!(storage.list().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_precache_opens_bucket_only_after_fetching() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        fetcher.set_offline(true);

        let mgr = manager("v1", &storage, &fetcher);
        assert!(mgr.install().await.is_err());
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_bucket_when_existence_unknown() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let existing = storage.open("v1").await.unwrap();
        existing
            .put("/", Response::new("https://plang.example/", 200, ResponseOrigin::SameOrigin))
            .await
            .unwrap();

        storage.inject_list_failure().await;
        fetcher.set_offline(true);
        let mgr = manager("v1", &storage, &fetcher);
        assert!(mgr.install().await.is_err());

        storage.clear_failures().await;
        assert_eq!(storage.list().await.unwrap(), vec!["v1"]);
        assert!(existing.get("/").await.unwrap().is_some());
    }

    /// Storage whose `delete` blocks until released.
    #[derive(Default)]
    struct GatedStorage {
        inner: MemoryStorage,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CacheStorage for GatedStorage {
        async fn open(&self, name: &str) -> Result<Arc<dyn CacheBucket>> {
            self.inner.open(name).await
        }

        async fn list(&self) -> Result<Vec<String>> {
            self.inner.list().await
        }

        async fn delete(&self, name: &str) -> Result<bool> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.delete(name).await
        }
    }

    #[tokio::test]
    async fn test_fetch_during_activation_waits() {
        let storage = Arc::new(GatedStorage::default());
        storage.inner.open("v0").await.unwrap();
        let fetcher = site().await;
        let mgr = Arc::new(CacheManager::new(
            "v1",
            origin(),
            Manifest::new(["/", "/a.css"]).unwrap(),
            storage.clone(),
            fetcher.clone(),
        ));
        mgr.install().await.unwrap();
        let calls = fetcher.calls();

        let activation = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.activate().await }
        });
        storage.entered.notified().await;
        assert_eq!(mgr.state(), WorkerState::Activating);

        let fetch = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.handle_fetch(Request::new("/?v=2", &origin()).unwrap()).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!fetch.is_finished());

        storage.release.notify_one();
        let report = activation.await.unwrap().unwrap();
        assert_eq!(report.deleted, vec!["v0"]);

        let outcome = fetch.await.unwrap().unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls(), calls);
    }

    #[tokio::test]
    async fn test_dispatch_routes_events() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher);

        assert!(matches!(mgr.dispatch(Event::Install).await.unwrap(), EventOutcome::Installed));
        assert!(matches!(
            mgr.dispatch(Event::Activate).await.unwrap(),
            EventOutcome::Activated(_)
        ));
        let request = Request::new("/?utm=x", &origin()).unwrap();
        match mgr.dispatch(Event::Fetch(request)).await.unwrap() {
            EventOutcome::Responded(outcome) => assert_eq!(outcome.source, ResponseSource::Cache),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            mgr.dispatch(Event::Message(ClientMessage::SkipWaiting)).await.unwrap(),
            EventOutcome::MessageHandled { skip_waiting: true }
        ));
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let storage = Arc::new(MemoryStorage::new());
        let fetcher = site().await;
        let mgr = manager("v1", &storage, &fetcher);
        let mut rx = mgr.subscribe();

        mgr.install().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), WorkerState::Installed);
    }
}
