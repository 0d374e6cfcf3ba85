// src/pipeline/session.rs

//! One update session: resolve watermark, pick tier, fetch with retry and
//! fallback, persist, release the store.
//!
//! A session never fails outward. Every path ends in an [`UpdateOutcome`]
//! and the item store handle is closed before [`Session::run`] returns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::models::{Post, UpdaterConfig};
use crate::network::Connectivity;
use crate::pipeline::policy::{
    self, FallbackDecision, fallback_decision, merge_watermark, needs_latest_post,
};
use crate::services::{FetchChannel, FetchRequest};
use crate::storage::{ItemStore, ItemStoreHandle, StoreResult, WatermarkStore};
use crate::utils::clock::Clock;

/// How a session ended. Passed to the completion listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A fetch result was stored; the count of new posts may be zero.
    Inserted(usize),
    /// Neither channel produced a result. The watermark is unchanged.
    NoUpdate,
    /// Too little time has passed since the watermark.
    NotDue,
    /// Cancelled before anything was persisted.
    Cancelled,
    /// The item store could not be opened or written.
    StoreFailed,
}

/// Marker for the session currently allowed to run.
#[derive(Debug)]
struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
}

/// State shared between the control side and the background session: the
/// cached watermark and the active-session marker.
#[derive(Debug, Default)]
pub struct SessionContext {
    watermark: RwLock<Option<DateTime<Utc>>>,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionContext {
    /// Cached watermark.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        *self.watermark.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill the cache if it is still empty. A value already loaded wins.
    pub fn load_watermark(&self, value: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let mut guard = self
            .watermark
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = value;
        }
        *guard
    }

    /// Move the watermark to `to` unless that would move it backward.
    /// Returns the resulting watermark.
    pub fn advance_watermark(&self, to: DateTime<Utc>) -> DateTime<Utc> {
        let mut guard = self
            .watermark
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next = guard.map_or(to, |current| current.max(to));
        *guard = Some(next);
        next
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    /// Claim the active marker for session `id`. Fails if one is held.
    pub(crate) fn try_begin(&self, id: u64, cancel: CancellationToken) -> bool {
        let mut active = self.active();
        if active.is_some() {
            return false;
        }
        *active = Some(ActiveSession { id, cancel });
        true
    }

    /// Clear the marker if it still belongs to session `id`.
    pub(crate) fn end(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    /// Cancel the active session, if any, and clear the marker.
    pub(crate) fn cancel(&self) -> bool {
        match self.active().take() {
            Some(session) => {
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the active marker when dropped, so a panicking session cannot
/// leave the scheduler stuck in "updating".
pub(crate) struct ActiveGuard {
    context: Arc<SessionContext>,
    id: u64,
}

impl ActiveGuard {
    pub(crate) fn new(context: Arc<SessionContext>, id: u64) -> Self {
        Self { context, id }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.context.end(self.id);
    }
}

/// Collaborators a session works with.
pub(crate) struct SessionDeps {
    pub config: UpdaterConfig,
    pub remote: Arc<dyn FetchChannel>,
    pub fallback: Option<Arc<dyn FetchChannel>>,
    pub items: Arc<dyn ItemStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub network: Arc<dyn Connectivity>,
    pub clock: Arc<dyn Clock>,
}

/// Result of the fetch phase.
enum FetchOutcome {
    Posts(Vec<Post>),
    NoResult,
    Cancelled,
}

/// A single update session.
pub(crate) struct Session<'a> {
    id: u64,
    deps: &'a SessionDeps,
    context: &'a SessionContext,
    cancel: CancellationToken,
    store: Option<Box<dyn ItemStoreHandle>>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        id: u64,
        deps: &'a SessionDeps,
        context: &'a SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            deps,
            context,
            cancel,
            store: None,
        }
    }

    /// Run the session to completion and release the item store.
    pub(crate) async fn run(mut self) -> UpdateOutcome {
        let outcome = self.execute().await;
        if let Some(mut store) = self.store.take() {
            store.close().await;
        }
        log::debug!("Session {} finished: {:?}", self.id, outcome);
        outcome
    }

    async fn execute(&mut self) -> UpdateOutcome {
        self.resolve_watermark().await;

        let since = self.context.watermark();
        let now = self.deps.clock.now();
        let Some(tier) = policy::select_tier(now, since, self.deps.config.base_interval()) else {
            log::info!("Posts are up to date (last update {:?})", since);
            return UpdateOutcome::NotDue;
        };

        if since.is_none() {
            log::warn!("First update: running a full update, this may use a lot of traffic");
        }
        log::info!("Starting {} update since {:?}", tier.as_str(), since);

        let posts = match self.fetch(&FetchRequest::new(since, tier)).await {
            FetchOutcome::Posts(posts) => posts,
            FetchOutcome::NoResult => {
                log::info!("No posts fetched; watermark left at {:?}", since);
                return UpdateOutcome::NoUpdate;
            }
            FetchOutcome::Cancelled => return UpdateOutcome::Cancelled,
        };

        if self.cancel.is_cancelled() {
            log::info!("Update cancelled; discarding {} fetched posts", posts.len());
            return UpdateOutcome::Cancelled;
        }

        self.persist(&posts).await
    }

    /// Fill the cached watermark from durable storage, consulting the newest
    /// stored post when the stored value is missing or stale.
    async fn resolve_watermark(&mut self) {
        if self.context.watermark().is_some() {
            return;
        }

        let now = self.deps.clock.now();
        let stored = self.deps.watermarks.get().await;
        let resolved = if needs_latest_post(now, stored, self.deps.config.base_interval()) {
            merge_watermark(stored, self.latest_post_time().await)
        } else {
            stored
        };

        let watermark = self.context.load_watermark(resolved);
        log::debug!("Resolved watermark: {:?}", watermark);
    }

    async fn latest_post_time(&mut self) -> Option<DateTime<Utc>> {
        let handle = match self.open_store().await {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Cannot read latest post: {}", e);
                return None;
            }
        };
        match handle.query_latest(1).await {
            Ok(posts) => posts.first().map(|p| p.published_at),
            Err(e) => {
                log::error!("Cannot read latest post: {}", e);
                None
            }
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        match self.fetch_primary(request).await {
            FetchOutcome::NoResult => {}
            done => return done,
        }

        if self.cancel.is_cancelled() {
            log::info!("Update cancelled before fallback");
            return FetchOutcome::Cancelled;
        }

        let Some(fallback) = self.deps.fallback.as_ref() else {
            log::debug!("No fallback channel configured");
            return FetchOutcome::NoResult;
        };

        let decision = fallback_decision(
            self.deps.config.allow_fallback_on_metered,
            self.deps.network.is_metered(),
        );
        if decision == FallbackDecision::Gated {
            log::info!("Skipping {} fallback on metered connection", fallback.name());
            return FetchOutcome::NoResult;
        }

        match fallback.fetch(request).await {
            Ok(posts) => {
                log::info!("{} fallback returned {} posts", fallback.name(), posts.len());
                FetchOutcome::Posts(posts)
            }
            Err(e) => {
                log::warn!("{} fallback failed: {}", fallback.name(), e);
                FetchOutcome::NoResult
            }
        }
    }

    /// Retry the remote channel on timeouts only, up to `max_attempts`.
    async fn fetch_primary(&self, request: &FetchRequest) -> FetchOutcome {
        let remote = &self.deps.remote;
        let max_attempts = self.deps.config.max_attempts;

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                log::info!("Update cancelled after {} attempts", attempt - 1);
                return FetchOutcome::Cancelled;
            }

            match remote.fetch(request).await {
                Ok(posts) => {
                    log::info!(
                        "{} returned {} posts (attempt {}/{})",
                        remote.name(),
                        posts.len(),
                        attempt,
                        max_attempts
                    );
                    return FetchOutcome::Posts(posts);
                }
                Err(e) if e.is_transient() => {
                    log::info!(
                        "{} attempt {}/{} timed out: {}",
                        remote.name(),
                        attempt,
                        max_attempts,
                        e
                    );
                }
                Err(e) => {
                    log::warn!("{} failed, not retrying: {}", remote.name(), e);
                    return FetchOutcome::NoResult;
                }
            }
        }

        log::warn!("{} gave up after {} attempts", remote.name(), max_attempts);
        FetchOutcome::NoResult
    }

    async fn persist(&mut self, posts: &[Post]) -> UpdateOutcome {
        let inserted = match self.insert(posts).await {
            Ok(n) => n,
            Err(e) => {
                match &e {
                    StoreError::Open(_) => log::error!("Cannot open item store: {}", e),
                    StoreError::Write(_) => log::error!("Cannot store posts: {}", e),
                }
                return UpdateOutcome::StoreFailed;
            }
        };

        let watermark = self.context.advance_watermark(self.deps.clock.now());
        if !self.deps.watermarks.set(watermark).await {
            log::warn!("Watermark {} kept in memory only", watermark);
        }

        log::info!(
            "Stored {} new of {} fetched posts; watermark now {}",
            inserted,
            posts.len(),
            watermark
        );
        UpdateOutcome::Inserted(inserted)
    }

    async fn insert(&mut self, posts: &[Post]) -> StoreResult<usize> {
        self.open_store().await?.insert_all(posts).await
    }

    /// Open the item store on first use; later calls reuse the handle.
    async fn open_store(&mut self) -> StoreResult<&mut Box<dyn ItemStoreHandle>> {
        let handle = match self.store.take() {
            Some(handle) => handle,
            None => self.deps.items.open().await?,
        };
        Ok(self.store.insert(handle))
    }
}
