// src/pipeline/scheduler.rs

//! Update scheduler.
//!
//! The control side calls [`UpdateScheduler::request_update`], which decides
//! synchronously whether to start a session and, if so, spawns it on the
//! scheduler's runtime and returns at once. At most one session runs at a
//! time. When a session ends its store handle is closed, the active marker is
//! cleared, and then the completion listener is called with the outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::UpdaterConfig;
use crate::network::Connectivity;
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::policy;
use crate::pipeline::session::{ActiveGuard, Session, SessionContext, SessionDeps, UpdateOutcome};
use crate::services::FetchChannel;
use crate::storage::{ItemStore, WatermarkStore};
use crate::utils::clock::{Clock, SystemClock};

/// Callback run once per session with its outcome.
pub type CompletionListener = Arc<dyn Fn(UpdateOutcome) + Send + Sync>;

/// Synchronous answer to an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// A new session was spawned.
    Started,
    /// A session is already running; nothing new was started.
    AlreadyRunning,
    /// Automatic updating is switched off.
    Disabled,
    /// The base interval has not passed since the last update.
    TooSoon,
    /// The connectivity probe reports no network.
    NoConnectivity,
}

impl RequestDecision {
    /// `true` when an update is (now) in progress.
    pub fn proceeds(&self) -> bool {
        matches!(self, Self::Started | Self::AlreadyRunning)
    }
}

struct Inner {
    deps: SessionDeps,
    context: Arc<SessionContext>,
    notifier: Arc<dyn Notifier>,
    listener: Mutex<Option<CompletionListener>>,
    // Serializes listener calls across sessions.
    callback_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
    runtime: Handle,
}

impl Inner {
    async fn run_session(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        let guard = ActiveGuard::new(Arc::clone(&self.context), id);
        let outcome = Session::new(id, &self.deps, &self.context, cancel)
            .run()
            .await;
        drop(guard);

        if let UpdateOutcome::Inserted(n) = outcome
            && n > 0
        {
            self.notifier.posts_inserted(n);
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            let _serial = self.callback_lock.lock().await;
            listener(outcome);
        }
    }
}

/// Decides when to update and runs one update session at a time.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<Inner>,
}

impl UpdateScheduler {
    /// Start building a scheduler.
    pub fn builder(config: UpdaterConfig) -> SchedulerBuilder {
        SchedulerBuilder::new(config)
    }

    /// Set the completion listener, replacing any previous one.
    pub fn set_listener(&self, listener: impl Fn(UpdateOutcome) + Send + Sync + 'static) {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    /// Request an update. Returns `true` if a session is now running.
    pub fn request_update(&self) -> bool {
        self.request().proceeds()
    }

    /// Request an update and report why it did or did not start.
    pub fn request(&self) -> RequestDecision {
        let inner = &self.inner;
        if inner.context.is_active() {
            return RequestDecision::AlreadyRunning;
        }
        if !inner.deps.config.auto_update_enabled {
            log::debug!("Automatic update disabled");
            return RequestDecision::Disabled;
        }

        // An unknown watermark never throttles, so the first session can set one.
        let now = inner.deps.clock.now();
        let watermark = inner.context.watermark();
        if policy::is_throttled(now, watermark, inner.deps.config.base_interval()) {
            log::debug!("Last update at {:?} is too recent", watermark);
            return RequestDecision::TooSoon;
        }

        if !inner.deps.network.is_connected() {
            inner.notifier.no_network();
            return RequestDecision::NoConnectivity;
        }

        self.start()
    }

    fn start(&self) -> RequestDecision {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        if !self.inner.context.try_begin(id, cancel.clone()) {
            return RequestDecision::AlreadyRunning;
        }

        log::debug!("Spawning update session {}", id);
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(inner.run_session(id, cancel));
        RequestDecision::Started
    }

    /// Whether a session is running.
    pub fn is_updating(&self) -> bool {
        self.inner.context.is_active()
    }

    /// Ask the running session to stop and forget it. Already persisted
    /// posts stay. The session still closes its store and calls the listener.
    pub fn cancel(&self) {
        if self.inner.context.cancel() {
            log::info!("Update cancelled");
        }
    }

    /// Time of the last successful update, if known.
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.inner.context.watermark()
    }
}

/// Builder for [`UpdateScheduler`].
pub struct SchedulerBuilder {
    config: UpdaterConfig,
    remote: Option<Arc<dyn FetchChannel>>,
    fallback: Option<Arc<dyn FetchChannel>>,
    items: Option<Arc<dyn ItemStore>>,
    watermarks: Option<Arc<dyn WatermarkStore>>,
    network: Option<Arc<dyn Connectivity>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
}

impl SchedulerBuilder {
    fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            remote: None,
            fallback: None,
            items: None,
            watermarks: None,
            network: None,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            runtime: None,
        }
    }

    /// Primary channel (required).
    pub fn remote(mut self, channel: Arc<dyn FetchChannel>) -> Self {
        self.remote = Some(channel);
        self
    }

    /// Fallback channel; without one a failed remote fetch ends the session.
    pub fn fallback(mut self, channel: Arc<dyn FetchChannel>) -> Self {
        self.fallback = Some(channel);
        self
    }

    /// Item store (required).
    pub fn items(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.items = Some(store);
        self
    }

    /// Watermark store (required).
    pub fn watermarks(mut self, store: Arc<dyn WatermarkStore>) -> Self {
        self.watermarks = Some(store);
        self
    }

    /// Connectivity probe (required).
    pub fn network(mut self, network: Arc<dyn Connectivity>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runtime sessions are spawned on; defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<UpdateScheduler> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| AppError::config(format!("no tokio runtime: {e}")))?,
        };

        let deps = SessionDeps {
            config: self.config,
            remote: self
                .remote
                .ok_or_else(|| AppError::config("scheduler needs a remote channel"))?,
            fallback: self.fallback,
            items: self
                .items
                .ok_or_else(|| AppError::config("scheduler needs an item store"))?,
            watermarks: self
                .watermarks
                .ok_or_else(|| AppError::config("scheduler needs a watermark store"))?,
            network: self
                .network
                .ok_or_else(|| AppError::config("scheduler needs a connectivity probe"))?,
            clock: self.clock,
        };

        Ok(UpdateScheduler {
            inner: Arc::new(Inner {
                deps,
                context: Arc::new(SessionContext::default()),
                notifier: self.notifier,
                listener: Mutex::new(None),
                callback_lock: tokio::sync::Mutex::new(()),
                next_id: AtomicU64::new(1),
                runtime,
            }),
        })
    }
}
