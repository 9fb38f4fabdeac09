//! Host-side registration for one origin scope.
//!
//! Holds at most one active and one waiting cache manager. A freshly
//! installed manager takes over immediately when nothing is active, when it
//! asked to skip waiting, or once every page client has released the old
//! one. Page requests are routed to the active manager; with none active
//! they go straight to the network.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::models::{ClientMessage, Request};
use crate::network::Fetcher;

use super::{ActivationReport, CacheManager, FetchOutcome, ResponseSource, WorkerState};

#[derive(Default)]
struct Slots {
    active: Option<Arc<CacheManager>>,
    waiting: Option<Arc<CacheManager>>,
    clients: usize,
}

pub struct Registration {
    scope: Url,
    fetcher: Arc<dyn Fetcher>,
    slots: RwLock<Slots>,
    /// Serializes install/activate so only one lifecycle step runs at a time.
    lifecycle: Mutex<()>,
    controller: watch::Sender<Option<String>>,
}

impl Registration {
    pub fn new(scope: Url, fetcher: Arc<dyn Fetcher>) -> Self {
        let (controller, _) = watch::channel(None);
        Self {
            scope,
            fetcher,
            slots: RwLock::new(Slots::default()),
            lifecycle: Mutex::new(()),
            controller,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn active(&self) -> Option<Arc<CacheManager>> {
        self.slots.read().await.active.clone()
    }

    pub async fn active_version(&self) -> Option<String> {
        self.active().await.map(|m| m.version().to_string())
    }

    /// Version of the manager that is installed and waiting, if any.
    pub async fn waiting_version(&self) -> Option<String> {
        self.slots
            .read()
            .await
            .waiting
            .as_ref()
            .map(|m| m.version().to_string())
    }

    /// Version of the manager controlling page clients. Changes once per
    /// completed activation.
    pub fn subscribe_controller(&self) -> watch::Receiver<Option<String>> {
        self.controller.subscribe()
    }

    // ===== Lifecycle =====

    /// Install `manager` and place it as active or waiting.
    ///
    /// On install failure the current active manager keeps serving and the
    /// error is returned.
    pub async fn register(&self, manager: Arc<CacheManager>) -> Result<WorkerState> {
        let _lifecycle = self.lifecycle.lock().await;
        self.register_locked(manager).await
    }

    /// Periodic update check: a manager whose version is already active or
    /// waiting is ignored. Returns the new manager's state when it was
    /// registered.
    pub async fn update(&self, manager: Arc<CacheManager>) -> Result<Option<WorkerState>> {
        let _lifecycle = self.lifecycle.lock().await;
        let known = {
            let slots = self.slots.read().await;
            let known = slots
                .active
                .iter()
                .chain(slots.waiting.iter())
                .any(|m| m.version() == manager.version());
            known
        };
        if known {
            debug!(version = %manager.version(), "No update available");
            return Ok(None);
        }
        self.register_locked(manager).await.map(Some)
    }

    /// Restore a previously activated manager after a host restart, falling
    /// back to a full registration when its bucket is gone or incomplete.
    pub async fn resume(&self, manager: Arc<CacheManager>) -> Result<WorkerState> {
        let _lifecycle = self.lifecycle.lock().await;
        if manager.restore().await?.is_some() {
            let previous = self.slots.write().await.active.replace(manager.clone());
            if let Some(previous) = previous {
                previous.mark_redundant();
            }
            self.controller.send_replace(Some(manager.version().to_string()));
            return Ok(manager.state());
        }
        self.register_locked(manager).await
    }

    async fn register_locked(&self, manager: Arc<CacheManager>) -> Result<WorkerState> {
        manager.install().await?;

        let has_active = self.slots.read().await.active.is_some();
        if !has_active || manager.skip_waiting_requested() {
            self.promote(manager.clone()).await?;
        } else {
            let replaced = self.slots.write().await.waiting.replace(manager.clone());
            if let Some(replaced) = replaced {
                replaced.mark_redundant();
            }
            info!(version = %manager.version(), "New content is available; waiting for clients to release");
        }
        Ok(manager.state())
    }

    /// Make `manager` the active one and run its activation. Requests routed
    /// to it meanwhile are held until activation completes.
    async fn promote(&self, manager: Arc<CacheManager>) -> Result<ActivationReport> {
        let previous = {
            let mut slots = self.slots.write().await;
            if let Some(waiting) = slots.waiting.take() {
                if !Arc::ptr_eq(&waiting, &manager) {
                    waiting.mark_redundant();
                }
            }
            slots.active.replace(manager.clone())
        };
        if let Some(previous) = previous {
            previous.mark_redundant();
        }

        match manager.activate().await {
            Ok(report) => {
                self.controller.send_replace(Some(manager.version().to_string()));
                info!(version = %manager.version(), "New cache manager activated");
                Ok(report)
            }
            Err(e) => {
                warn!(version = %manager.version(), error = %e, "Activation failed");
                let mut slots = self.slots.write().await;
                if slots.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, &manager)) {
                    slots.active = None;
                }
                manager.mark_redundant();
                Err(e)
            }
        }
    }

    async fn promote_waiting(&self) -> Result<bool> {
        let waiting = self.slots.read().await.waiting.clone();
        match waiting {
            Some(waiting) => {
                self.promote(waiting).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ===== Clients =====

    /// A page client attached to this scope. Returns the client count.
    pub async fn connect_client(&self) -> usize {
        let mut slots = self.slots.write().await;
        slots.clients += 1;
        slots.clients
    }

    /// A page client went away. When the last one leaves, a waiting manager
    /// is activated. Returns true if that happened.
    pub async fn release_client(&self) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        let remaining = {
            let mut slots = self.slots.write().await;
            slots.clients = slots.clients.saturating_sub(1);
            slots.clients
        };
        if remaining > 0 {
            return Ok(false);
        }
        self.promote_waiting().await
    }

    /// Deliver a page message to the waiting manager. A skip-waiting request
    /// activates it right away. Returns true if activation happened.
    pub async fn post_message(&self, message: ClientMessage) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        let waiting = self.slots.read().await.waiting.clone();
        let Some(waiting) = waiting else {
            debug!(?message, "No waiting cache manager for message");
            return Ok(false);
        };
        if !waiting.handle_message(message) {
            return Ok(false);
        }
        self.promote_waiting().await
    }

    // ===== Fetch =====

    /// Resolve `target` against the scope and fetch it.
    pub async fn fetch_url(&self, target: &str) -> Result<FetchOutcome> {
        self.fetch(Request::new(target, &self.scope)?).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
        let Some(active) = self.active().await else {
            return self.fetch_uncontrolled(&request).await;
        };
        match active.handle_fetch(request.clone()).await {
            // Replaced between routing and handling; the successor answers
            Err(CacheError::InvalidState {
                actual: WorkerState::Redundant,
                ..
            }) => match self.active().await {
                Some(current) if !Arc::ptr_eq(&current, &active) => current.handle_fetch(request).await,
                _ => self.fetch_uncontrolled(&request).await,
            },
            other => other,
        }
    }

    async fn fetch_uncontrolled(&self, request: &Request) -> Result<FetchOutcome> {
        let response = self
            .fetcher
            .fetch(request)
            .await
            .map_err(|source| CacheError::NetworkFailure {
                url: request.url().to_string(),
                source,
            })?;
        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network,
        })
    }

    /// Wait for background cache writes of the active manager.
    pub async fn flush_writes(&self) {
        if let Some(active) = self.active().await {
            active.flush_writes().await;
        }
    }
}
