//! The offline cache worker: a versioned, install-once cache that
//! intercepts page requests, plus push display and click routing.
//!
//! Lifecycle: `Installing -> Waiting -> Active -> Redundant`. A failed
//! install goes straight to `Redundant` and never touches the cache.
//! [`WorkerRegistration`] hands control from one version to the next.
//!
//! Cache-first entries are never revalidated: a manifest resource stays as
//! installed until the version (and so the store name) changes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::capabilities::{
    BackgroundChannel, CacheEntry, CacheError, CacheKey, CacheName, CacheReader, CacheStorage,
    CachedResponse, ClientError, ClientWindows, Method, Network, NetworkError, NotificationError,
    NotificationSurface, PermissionProvider, Request, Response,
};
use crate::config::{ConfigError, NotificationConfig, WorkerConfig};
use crate::delivery::{NotificationData, PushMessage};
use crate::error::ErrorKind;
use crate::model::{ClientId, NotificationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl WorkerState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Redundant => "redundant",
        }
    }

    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::{Active, Installing, Redundant, Waiting};
        matches!(
            (self, next),
            (Installing, Waiting | Redundant) | (Waiting, Active | Redundant) | (Active, Redundant)
        )
    }

    fn transition(self, next: WorkerState) -> Result<WorkerState, WorkerError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WorkerError::InvalidTransition { from: self, to: next })
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("install failed on {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    #[error("worker is {state:?}, not active")]
    NotActive { state: WorkerState },

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WorkerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InstallFailed { .. } => ErrorKind::InstallFailure,
            Self::InvalidTransition { .. } | Self::NotActive { .. } | Self::Client(_) => {
                ErrorKind::InvalidState
            }
            Self::Cache(e) => e.kind(),
            Self::Network(e) => e.kind(),
            Self::Notification(e) => e.kind(),
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Platform services available to the worker's execution context.
#[derive(Clone)]
pub struct WorkerPlatform {
    pub cache: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn NotificationSurface>,
    /// Consent as seen by the worker's own execution context.
    pub permissions: Arc<dyn PermissionProvider>,
    pub clients: Arc<dyn ClientWindows>,
}

impl fmt::Debug for WorkerPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPlatform").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Cache(Response),
    Network(Response),
}

impl FetchOutcome {
    pub fn from_cache(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    pub fn response(&self) -> &Response {
        match self {
            Self::Cache(r) | Self::Network(r) => r,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            Self::Cache(r) | Self::Network(r) => r,
        }
    }
}

/// Activation of a displayed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClick {
    pub notification_id: NotificationId,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub target: String,
    pub client: ClientId,
    pub opened: bool,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Bytes),
    NotificationClick(NotificationClick),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Installed,
    Activated { purged: Vec<CacheName> },
    Fetched(FetchOutcome),
    Displayed(NotificationId),
    /// Push received without notification consent; nothing was shown.
    Dropped,
    Routed(ClickOutcome),
}

pub struct OfflineCacheWorker {
    config: WorkerConfig,
    notification_defaults: NotificationConfig,
    origin: Url,
    cache_name: CacheName,
    platform: WorkerPlatform,
    state: RwLock<WorkerState>,
}

impl fmt::Debug for OfflineCacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCacheWorker")
            .field("cache_name", &self.cache_name)
            .field("origin", &self.origin.as_str())
            .finish_non_exhaustive()
    }
}

impl OfflineCacheWorker {
    pub fn new(
        config: WorkerConfig,
        notification_defaults: NotificationConfig,
        platform: WorkerPlatform,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        notification_defaults.validate()?;
        let origin = config.origin_url()?;
        let cache_name = config.cache_name();
        Ok(Self {
            config,
            notification_defaults,
            origin,
            cache_name,
            platform,
            state: RwLock::new(WorkerState::Installing),
        })
    }

    pub fn cache_name(&self) -> &CacheName {
        &self.cache_name
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn skip_waiting(&self) -> bool {
        self.config.skip_waiting
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Read-only view of this version's store for page code.
    pub fn reader(&self) -> CacheReader {
        CacheReader::new(Arc::clone(&self.platform.cache), self.cache_name.clone())
    }

    pub fn notification_surface(&self) -> Arc<dyn NotificationSurface> {
        Arc::clone(&self.platform.notifications)
    }

    async fn transition(&self, next: WorkerState) -> Result<(), WorkerError> {
        let mut state = self.state.write().await;
        *state = state.transition(next)?;
        Ok(())
    }

    /// Fetches the whole manifest and commits it in one write. Any failure
    /// leaves the cache untouched and retires this worker.
    #[instrument(skip(self), fields(cache = %self.cache_name))]
    pub async fn install(&self) -> Result<(), WorkerError> {
        let current = self.state().await;
        if current != WorkerState::Installing {
            return Err(WorkerError::InvalidTransition {
                from: current,
                to: WorkerState::Waiting,
            });
        }

        info!(resources = self.config.manifest.len(), "install started");

        match self.stage_manifest().await {
            Ok(staged) => {
                if let Err(e) = self.platform.cache.put_all(&self.cache_name, staged).await {
                    error!(error = %e, "install failed committing cache");
                    self.transition(WorkerState::Redundant).await?;
                    return Err(WorkerError::InstallFailed {
                        url: self.origin.to_string(),
                        reason: format!("committing {}: {e}", self.cache_name),
                    });
                }
            }
            Err(e) => {
                error!(error = %e, code = e.kind().code(), "install failed");
                self.transition(WorkerState::Redundant).await?;
                return Err(e);
            }
        }

        self.transition(WorkerState::Waiting).await?;
        info!("install complete");
        Ok(())
    }

    async fn stage_manifest(&self) -> Result<Vec<CacheEntry>, WorkerError> {
        let mut staged = Vec::with_capacity(self.config.manifest.len());

        for path in &self.config.manifest {
            let key = CacheKey::resolve(&self.origin, path)?;
            let request = Request::new(Method::Get, key.to_url()?);

            let response = self.platform.network.fetch(&request).await.map_err(|e| {
                WorkerError::InstallFailed {
                    url: key.to_string(),
                    reason: e.to_string(),
                }
            })?;

            if !response.is_success() {
                let status = NetworkError::HttpStatus {
                    url: key.to_string(),
                    status: response.status,
                };
                return Err(WorkerError::InstallFailed {
                    url: key.to_string(),
                    reason: status.to_string(),
                });
            }

            debug!(url = %key, bytes = response.body.len(), "staged");
            staged.push(CacheEntry::new(key, response));
        }

        Ok(staged)
    }

    /// Deletes every store except this version's and starts serving.
    /// Fetches on this worker wait until the purge is done.
    #[instrument(skip(self), fields(cache = %self.cache_name))]
    pub async fn activate(&self) -> Result<Vec<CacheName>, WorkerError> {
        let mut state = self.state.write().await;
        let next = state.transition(WorkerState::Active)?;

        let mut purged = Vec::new();
        for name in self.platform.cache.names().await? {
            if name == self.cache_name {
                continue;
            }
            if self.platform.cache.delete(&name).await? {
                info!(store = %name, "purged stale cache store");
                purged.push(name);
            }
        }

        *state = next;
        info!(purged = purged.len(), "worker active");
        Ok(purged)
    }

    /// Marks this worker as superseded or abandoned.
    pub async fn retire(&self) {
        let mut state = self.state.write().await;
        match state.transition(WorkerState::Redundant) {
            Ok(next) => {
                info!(cache = %self.cache_name, from = state.state_name(), "worker redundant");
                *state = next;
            }
            Err(_) => debug!(cache = %self.cache_name, "worker already redundant"),
        }
    }

    /// Cache lookup only. `Ok(None)` for misses and non-GET requests.
    pub async fn match_cached(&self, request: &Request) -> Result<Option<CachedResponse>, WorkerError> {
        let state = self.state.read().await;
        if *state != WorkerState::Active {
            return Err(WorkerError::NotActive { state: *state });
        }
        if !request.method.is_cacheable() {
            return Ok(None);
        }
        let key = CacheKey::from_url(&request.url);
        Ok(self.platform.cache.lookup(&self.cache_name, &key).await?)
    }

    /// Cache first, then network. Network responses are returned as-is and
    /// not stored.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        if let Some(hit) = self.match_cached(request).await? {
            debug!("served from cache");
            return Ok(FetchOutcome::Cache(hit.to_response()));
        }
        debug!("cache miss, going to network");
        let response = self.platform.network.fetch(request).await?;
        Ok(FetchOutcome::Network(response))
    }

    async fn ensure_active(&self) -> Result<(), WorkerError> {
        let state = self.state().await;
        if state == WorkerState::Active {
            Ok(())
        } else {
            Err(WorkerError::NotActive { state })
        }
    }

    /// Displays a push payload. `Ok(None)` when consent is not granted.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn handle_push(&self, payload: &[u8]) -> Result<Option<NotificationId>, WorkerError> {
        self.ensure_active().await?;
        let permission = self.platform.permissions.query().await;
        if !permission.is_granted() {
            debug!(permission = ?permission, "push dropped, no consent");
            return Ok(None);
        }

        let message = PushMessage::parse(payload, &self.notification_defaults);
        let tag = message.tag.clone();
        match self.platform.notifications.show(message.into_request()).await {
            Ok(id) => {
                info!(%tag, notification = %id, "push displayed");
                Ok(Some(id))
            }
            Err(e) => {
                warn!(%tag, error = %e, "push display failed");
                Err(e.into())
            }
        }
    }

    /// Closes the notification and brings exactly one window to its target.
    #[instrument(skip(self, click), fields(notification = %click.notification_id))]
    pub async fn handle_notification_click(&self, click: &NotificationClick) -> Result<ClickOutcome, WorkerError> {
        if let Err(e) = self.platform.notifications.close(&click.notification_id).await {
            debug!(error = %e, "notification already closed");
        }

        let route = NotificationData::from_payload(&click.payload).resolve_route(&self.config.routes);
        let target = self.click_target(&route)?;

        let clients = self.platform.clients.list().await;
        if let Some(existing) = clients.iter().find(|c| c.url == target) {
            match self.platform.clients.focus(&existing.id).await {
                Ok(()) => {
                    info!(%target, client = %existing.id, "focused existing window");
                    return Ok(ClickOutcome {
                        target,
                        client: existing.id.clone(),
                        opened: false,
                    });
                }
                Err(e) => warn!(client = %existing.id, error = %e, "focus failed, opening a new window"),
            }
        }

        let client = self.platform.clients.open(&target).await?;
        info!(%target, %client, "opened window");
        Ok(ClickOutcome {
            target,
            client,
            opened: true,
        })
    }

    /// Absolute same-origin URL for `route`. Anything else (other sites,
    /// non-http schemes) falls back to the dashboard.
    fn click_target(&self, route: &str) -> Result<String, WorkerError> {
        match self.origin.join(route) {
            Ok(url) if url.origin() == self.origin.origin() => return Ok(url.to_string()),
            Ok(url) => warn!(url = %url, "click target is not same-origin, using dashboard"),
            Err(e) => warn!(route, error = %e, "click target is not a URL, using dashboard"),
        }
        let dashboard = self.origin.join(&self.config.routes.dashboard).map_err(|e| {
            ConfigError::InvalidUrl {
                url: self.config.routes.dashboard.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(dashboard.to_string())
    }

    /// Processes one event to completion.
    pub async fn handle(&self, event: WorkerEvent) -> Result<WorkerOutcome, WorkerError> {
        match event {
            WorkerEvent::Install => self.install().await.map(|()| WorkerOutcome::Installed),
            WorkerEvent::Activate => self
                .activate()
                .await
                .map(|purged| WorkerOutcome::Activated { purged }),
            WorkerEvent::Fetch(request) => self.fetch(&request).await.map(WorkerOutcome::Fetched),
            WorkerEvent::Push(payload) => self
                .handle_push(&payload)
                .await
                .map(|shown| shown.map_or(WorkerOutcome::Dropped, WorkerOutcome::Displayed)),
            WorkerEvent::NotificationClick(click) => self
                .handle_notification_click(&click)
                .await
                .map(WorkerOutcome::Routed),
        }
    }
}

#[derive(Default)]
struct Slots {
    active: Option<Arc<OfflineCacheWorker>>,
    waiting: Option<Arc<OfflineCacheWorker>>,
}

/// Owns the hand-over between worker versions for one origin.
pub struct WorkerRegistration {
    network: Arc<dyn Network>,
    slots: RwLock<Slots>,
}

impl fmt::Debug for WorkerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistration").finish_non_exhaustive()
    }
}

impl WorkerRegistration {
    /// `network` serves pages while no worker is active.
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            slots: RwLock::new(Slots::default()),
        }
    }

    pub async fn active(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.slots.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn cache_reader(&self) -> Option<CacheReader> {
        self.slots.read().await.active.as_ref().map(|w| w.reader())
    }

    /// Installs `worker`. On failure the current active version keeps
    /// serving. Returns the new worker's state.
    #[instrument(skip(self, worker), fields(version = worker.version()))]
    pub async fn register(&self, worker: OfflineCacheWorker) -> Result<WorkerState, WorkerError> {
        let worker = Arc::new(worker);
        worker.install().await?;

        let mut slots = self.slots.write().await;
        if let Some(previous) = slots.waiting.replace(Arc::clone(&worker)) {
            previous.retire().await;
        }
        if worker.skip_waiting() {
            Self::promote(&mut slots).await?;
        }
        drop(slots);

        Ok(worker.state().await)
    }

    /// Activates the waiting worker, if any.
    pub async fn activate_waiting(&self) -> Result<bool, WorkerError> {
        let mut slots = self.slots.write().await;
        if slots.waiting.is_none() {
            return Ok(false);
        }
        Self::promote(&mut slots).await?;
        Ok(true)
    }

    async fn promote(slots: &mut Slots) -> Result<(), WorkerError> {
        let Some(next) = slots.waiting.take() else {
            return Ok(());
        };
        if let Err(e) = next.activate().await {
            slots.waiting = Some(next);
            return Err(e);
        }
        if let Some(previous) = slots.active.replace(next) {
            previous.retire().await;
        }
        Ok(())
    }

    /// Routes a page request through the active worker, or straight to the
    /// network when no worker controls the page.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        {
            // Held across the lookup so activation cannot purge the store
            // being read.
            let slots = self.slots.read().await;
            if let Some(active) = &slots.active {
                if let Some(hit) = active.match_cached(request).await? {
                    debug!(cache = %active.cache_name(), "served from cache");
                    return Ok(FetchOutcome::Cache(hit.to_response()));
                }
                debug!("cache miss, going to network");
            } else {
                debug!("no active worker, going to network");
            }
        }
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome::Network(response))
    }
}

#[async_trait::async_trait]
impl BackgroundChannel for WorkerRegistration {
    async fn register(&self) -> Result<Arc<dyn NotificationSurface>, NotificationError> {
        self.active()
            .await
            .map(|worker| worker.notification_surface())
            .ok_or_else(|| NotificationError::registration_failed("no active worker"))
    }
}
