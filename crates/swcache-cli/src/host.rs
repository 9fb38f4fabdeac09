//! Wires the core cache manager to disk storage and the live network.
//!
//! The host plays the part of the browser and the page: it owns the
//! registration for the configured origin, builds a manager for whatever
//! version the config names, and decides when a waiting update is allowed
//! to take over.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use swcache_core::cache::{CacheStorage, CachedData, DiskStorage};
use swcache_core::network::HttpFetcher;
use swcache_core::{CacheManager, ClientMessage, Config, Registration, Url, WorkerState};
use tracing::{info, warn};

/// Load the config from an explicit path or the default location, then
/// apply environment overrides.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();
    Ok(config)
}

pub struct Host {
    config_path: Option<PathBuf>,
    origin: Url,
    storage: Arc<DiskStorage>,
    fetcher: Arc<HttpFetcher>,
    registration: Registration,
}

impl Host {
    pub fn new(config: &Config, config_path: Option<PathBuf>) -> Result<Self> {
        let origin = config.origin_url()?;
        let cache_dir = config.cache_dir()?;
        let storage = Arc::new(
            DiskStorage::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?,
        );
        let fetcher = Arc::new(HttpFetcher::new(origin.clone(), config.request_timeout())?);
        let registration = Registration::new(origin.clone(), fetcher.clone());
        info!(origin = %origin, cache_dir = %cache_dir.display(), "Host ready");
        Ok(Self {
            config_path,
            origin,
            storage,
            fetcher,
            registration,
        })
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    fn manager(&self, config: &Config) -> Arc<CacheManager> {
        Arc::new(
            CacheManager::new(
                config.version.clone(),
                self.origin.clone(),
                config.manifest.clone(),
                self.storage.clone(),
                self.fetcher.clone(),
            )
            .with_skip_waiting_on_install(config.skip_waiting_on_install),
        )
    }

    /// Resume the configured version, installing it if its bucket is missing.
    pub async fn start(&self, config: &Config) -> Result<WorkerState> {
        let state = self.registration.resume(self.manager(config)).await?;
        Ok(state)
    }

    /// Install the configured version from scratch and place it.
    pub async fn precache(&self, config: &Config) -> Result<WorkerState> {
        let state = self.registration.register(self.manager(config)).await?;
        Ok(state)
    }

    /// One update check: reload the config and register its version if it
    /// is new. With `auto_update`, a waiting update is told to skip waiting,
    /// the way the page does once the user confirms.
    pub async fn check_for_update(&self, auto_update: bool) -> Result<()> {
        let config = load_config(self.config_path.as_ref())?;
        if config.origin_url()? != self.origin {
            warn!(origin = %config.origin, "Origin changed in config; restart to apply");
            return Ok(());
        }

        if let Some(state) = self.registration.update(self.manager(&config)).await? {
            info!(version = %config.version, state = %state, "Update installed");
        }

        if let Some(waiting) = self.registration.waiting_version().await {
            if auto_update {
                self.registration.post_message(ClientMessage::SkipWaiting).await?;
                info!(version = %waiting, "Activated waiting update");
            } else {
                eprintln!("New version {} available; rerun with --auto-update to apply.", waiting);
            }
        }
        Ok(())
    }

    /// Bucket names with entry counts and total body size.
    pub async fn bucket_summaries(&self) -> Result<Vec<BucketSummary>> {
        let mut summaries = Vec::new();
        for name in self.storage.list().await? {
            let bucket = self.storage.open(&name).await?;
            let mut summary = BucketSummary {
                name: name.clone(),
                entries: 0,
                bytes: 0,
                newest: None,
            };
            for key in bucket.keys().await? {
                if let Some(entry) = bucket.get(&key).await? {
                    summary.entries += 1;
                    summary.bytes += entry.data.body.len() as u64;
                    if summary.newest.as_ref().map_or(true, |n| entry.cached_at > n.cached_at) {
                        summary.newest = Some(CachedData {
                            data: (),
                            cached_at: entry.cached_at,
                        });
                    }
                }
            }
            summaries.push(summary);
        }
        Ok(summaries)
    }
}

pub struct BucketSummary {
    pub name: String,
    pub entries: usize,
    pub bytes: u64,
    /// Timestamp of the most recently cached entry.
    pub newest: Option<CachedData<()>>,
}
