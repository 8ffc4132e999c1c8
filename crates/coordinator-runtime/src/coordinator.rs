//! # Session Coordinator
//!
//! Explicitly constructed per tab. Owns the bus, elector, refresh
//! coordinator, fallback poller and heartbeat, wires them to one
//! breaker-guarded shared store, and exposes the surface the UI consumes.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start()──→ Running ──stop()──→ Stopped
//!                         │
//!                         └── poller exhausted + refresh failed ──→ Halted
//! ```
//!
//! `stop` is terminal; build a new coordinator to run the tab again.

use parking_lot::Mutex;
use serde_json::json;
use shared_bus::{
    BrokerConnector, ChannelConnector, ChannelHub, MessageBus, MessageReceiver, EventFilter,
    StorageConnector, Subscription, TransportKind,
};
use shared_store::keys::SESSION_SNAPSHOT_KEY;
use shared_store::{InMemorySharedStore, SharedStore, SharedStoreExt, StoreError};
use shared_types::{
    Clock, CoordinationMessage, MessageType, SessionApi, SessionApiError, SessionSnapshot,
    SystemClock, TabId,
};
use std::sync::Arc;
use tc_01_circuit_breaker::{CircuitBreaker, CircuitStatus, GuardedStore};
use tc_02_event_journal::JournalEntry;
use tc_02_event_journal::SharedJournal;
use tc_03_leader_election::{ElectionRole, LeaderElector, LeadershipView};
use tc_04_token_refresh::{
    CredentialStore, InMemoryCredentialStore, RefreshCoordinator, RefreshDeps, RefreshTrigger,
};
use tc_05_fallback_poller::{FallbackPoller, PollerDeps, SessionHeartbeat};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{load_or_create_device_id, load_or_create_tab_id, HttpSessionApi};
use crate::config::{ConfigError, CoordinatorConfig};

/// Errors raised while assembling a coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session API error: {0}")]
    Api(#[from] SessionApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
    /// No transport or refresh capability is left.
    Halted,
}

/// Builder for `SessionCoordinator`. Unset collaborators default to
/// in-memory stores, an in-memory credential store and the system clock.
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    api: Arc<dyn SessionApi>,
    shared_store: Option<Arc<dyn SharedStore>>,
    local_store: Option<Arc<dyn SharedStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    clock: Option<Arc<dyn Clock>>,
    channel_hub: Option<Arc<ChannelHub>>,
    tab_id: Option<TabId>,
}

impl CoordinatorBuilder {
    #[must_use]
    pub fn shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared_store = Some(store);
        self
    }

    /// Context-local store holding the tab id.
    #[must_use]
    pub fn local_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Offer the in-process channel transport over `hub`.
    #[must_use]
    pub fn channel_hub(mut self, hub: Arc<ChannelHub>) -> Self {
        self.channel_hub = Some(hub);
        self
    }

    /// Use a fixed tab id instead of the persisted one.
    #[must_use]
    pub fn tab_id(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// # Errors
    ///
    /// Returns `CoordinatorError::Config` when the configuration is invalid.
    pub fn build(self) -> Result<SessionCoordinator, CoordinatorError> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let shared: Arc<dyn SharedStore> = self
            .shared_store
            .unwrap_or_else(|| Arc::new(InMemorySharedStore::new("shared")));
        let local: Arc<dyn SharedStore> = self
            .local_store
            .unwrap_or_else(|| Arc::new(InMemorySharedStore::new("local")));
        let credentials: Arc<dyn CredentialStore> = self
            .credentials
            .unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new()));

        let tab_id = self
            .tab_id
            .unwrap_or_else(|| load_or_create_tab_id(local.as_ref()));
        let device_id = config
            .api
            .device_id
            .clone()
            .unwrap_or_else(|| load_or_create_device_id(shared.as_ref()));

        let breaker = Arc::new(CircuitBreaker::with_persistence(
            shared.name().to_string(),
            config.breaker.clone(),
            clock.clone(),
            shared.clone(),
        ));
        let store: Arc<dyn SharedStore> = Arc::new(GuardedStore::new(shared, breaker.clone()));

        let mut bus = MessageBus::builder(tab_id.clone(), clock.clone())
            .config(config.bus.clone())
            .journal(SharedJournal::with_capacity(config.journal_capacity));
        if let Some(addr) = &config.transport.broker_addr {
            bus = bus.connector(Arc::new(
                BrokerConnector::new(addr.clone())
                    .with_connect_timeout(config.transport.broker_connect_timeout),
            ));
        }
        if let Some(hub) = self.channel_hub {
            bus = bus.connector(Arc::new(ChannelConnector::new(hub)));
        }
        let bus = bus
            .connector(Arc::new(StorageConnector::new(
                store.clone(),
                tab_id.clone(),
                clock.clone(),
                config.bus.storage_poll_interval,
                config.bus.max_fallback_entries,
            )))
            .build();

        let elector = LeaderElector::new(
            config.elector.clone(),
            store.clone(),
            bus.clone(),
            clock.clone(),
        );
        let leadership: Arc<dyn LeadershipView> = Arc::new(elector.clone());

        let refresh = RefreshCoordinator::new(
            config.refresh.clone(),
            device_id.clone(),
            RefreshDeps {
                api: self.api.clone(),
                credentials: credentials.clone(),
                leadership: leadership.clone(),
                store: store.clone(),
                bus: bus.clone(),
                clock: clock.clone(),
            },
        );
        let trigger: Arc<dyn RefreshTrigger> = Arc::new(refresh.clone());

        let poller = FallbackPoller::new(
            config.poller.clone(),
            PollerDeps {
                api: self.api.clone(),
                refresh: trigger.clone(),
                leadership: leadership.clone(),
                bus: bus.clone(),
                clock: clock.clone(),
            },
        );
        let heartbeat =
            SessionHeartbeat::new(config.heartbeat.clone(), self.api.clone(), trigger, leadership);

        let (state_tx, _) = watch::channel(LifecycleState::Created);
        info!(tab_id = %tab_id, device_id = %device_id, "Session coordinator assembled");

        Ok(SessionCoordinator {
            inner: Arc::new(CoordinatorInner {
                tab_id,
                device_id,
                clock,
                api: self.api,
                store,
                breaker,
                credentials,
                bus,
                elector,
                refresh,
                poller,
                heartbeat,
                state_tx,
                watcher: Mutex::new(None),
            }),
        })
    }
}

/// Cross-tab session coordinator for one tab. Cheap to clone.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    tab_id: TabId,
    device_id: String,
    clock: Arc<dyn Clock>,
    api: Arc<dyn SessionApi>,
    store: Arc<dyn SharedStore>,
    breaker: Arc<CircuitBreaker>,
    credentials: Arc<dyn CredentialStore>,
    bus: MessageBus,
    elector: LeaderElector,
    refresh: RefreshCoordinator,
    poller: FallbackPoller,
    heartbeat: SessionHeartbeat,
    state_tx: watch::Sender<LifecycleState>,
    /// Watches for poller exhaustion.
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    #[must_use]
    pub fn builder(config: CoordinatorConfig, api: Arc<dyn SessionApi>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            api,
            shared_store: None,
            local_store: None,
            credentials: None,
            clock: None,
            channel_hub: None,
            tab_id: None,
        }
    }

    /// Production assembly: HTTP session API, file stores where configured.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an unusable store directory, or an
    /// HTTP client that cannot be built.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(&config.api)?);
        let mut builder = Self::builder(config.clone(), api);
        if let Some(dir) = &config.storage.shared_dir {
            builder = builder.shared_store(Arc::new(shared_store::FileSharedStore::open(
                "shared",
                dir.clone(),
            )?));
        }
        if let Some(dir) = &config.storage.local_dir {
            builder = builder.local_store(Arc::new(shared_store::FileSharedStore::open(
                "local",
                dir.clone(),
            )?));
        }
        builder.build()
    }

    /// Connect transports, validate the session, elect, and start every
    /// background loop. Only the first call has an effect.
    pub async fn start(&self) {
        let inner = &self.inner;
        if *inner.state_tx.borrow() != LifecycleState::Created {
            return;
        }
        inner.state_tx.send_replace(LifecycleState::Running);

        inner.bus.start().await;
        inner.validate_session().await;
        inner.elector.start().await;
        inner.refresh.start();
        inner.poller.start();
        inner.heartbeat.start();

        let watcher = tokio::spawn(watch_exhaustion(
            Arc::downgrade(inner),
            inner.poller.watch_exhausted(),
        ));
        if let Some(previous) = inner.watcher.lock().replace(watcher) {
            previous.abort();
        }

        info!(
            tab_id = %inner.tab_id,
            role = %inner.elector.role(),
            transport = ?inner.bus.active_transport(),
            "Session coordinator started"
        );
    }

    /// Stop every background loop and close the transport.
    pub async fn stop(&self) {
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.abort();
        }
        if self.inner.shutdown().await {
            self.inner.state_tx.send_replace(LifecycleState::Stopped);
            info!(tab_id = %self.inner.tab_id, "Session coordinator stopped");
        }
    }

    /// Subscribe to one message type. Drop the handle to unsubscribe.
    pub fn subscribe<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&CoordinationMessage) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(message_type, handler)
    }

    /// Subscribe, replaying journaled messages of the type first.
    pub fn subscribe_with_replay<F>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(&CoordinationMessage) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_with_replay(message_type, handler)
    }

    /// Async stream of messages matching `filter`.
    pub fn listen(&self, filter: impl Into<EventFilter>) -> MessageReceiver {
        self.inner.bus.listen(filter)
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.inner.elector.is_leader()
    }

    #[must_use]
    pub fn role(&self) -> ElectionRole {
        self.inner.elector.role()
    }

    #[must_use]
    pub fn leader_id(&self) -> Option<TabId> {
        self.inner.elector.leader_id()
    }

    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.inner.tab_id
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Single-flight credential refresh shared by every tab.
    pub async fn refresh(&self) -> bool {
        self.inner.refresh.refresh().await
    }

    /// End the session in every tab.
    pub async fn logout(&self) {
        let inner = &self.inner;
        info!(tab_id = %inner.tab_id, "Logging out");
        inner.write_snapshot(&SessionSnapshot {
            authenticated: false,
            expires_at: None,
            user_id: None,
            updated_at: inner.clock.now_ms(),
        });
        inner
            .bus
            .publish(MessageType::Logout, json!({ "tabId": inner.tab_id }))
            .await;
        // Covers a coordinator that was never started and so has no
        // subscription clearing credentials on the echo.
        inner.credentials.clear();
    }

    /// Recent coordination events, newest first.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.inner.bus.journal().snapshot()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.inner.state_tx.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn active_transport(&self) -> Option<TransportKind> {
        self.inner.bus.active_transport()
    }

    #[must_use]
    pub fn store_status(&self) -> CircuitStatus {
        self.inner.breaker.status()
    }

    #[must_use]
    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    #[must_use]
    pub fn elector(&self) -> &LeaderElector {
        &self.inner.elector
    }

    #[must_use]
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    #[must_use]
    pub fn poller(&self) -> &FallbackPoller {
        &self.inner.poller
    }

    #[must_use]
    pub fn heartbeat(&self) -> &SessionHeartbeat {
        &self.inner.heartbeat
    }
}

impl CoordinatorInner {
    async fn validate_session(&self) {
        let ctx = self.refresh.request_context();
        let status = match self.api.validate_session(&ctx).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Session validation failed; continuing with local state");
                return;
            }
        };

        let snapshot = SessionSnapshot {
            authenticated: status.valid,
            expires_at: status.expires_at,
            user_id: status.user_id,
            updated_at: self.clock.now_ms(),
        };
        self.write_snapshot(&snapshot);

        if snapshot.authenticated {
            if let Some(expires_at) = snapshot.expires_at {
                self.credentials.update_expiry(expires_at);
            }
            let payload = serde_json::to_value(&snapshot).unwrap_or_default();
            self.bus.publish(MessageType::SessionUpdated, payload).await;
        } else {
            info!("Server reports the session invalid");
            self.credentials.clear();
            self.bus
                .publish(MessageType::SessionExpired, json!({ "reason": "invalid_session" }))
                .await;
        }
    }

    fn write_snapshot(&self, snapshot: &SessionSnapshot) {
        if let Err(e) = self.store.set_json(SESSION_SNAPSHOT_KEY, snapshot) {
            warn!(error = %e, "Could not write session snapshot");
        }
    }

    /// Stop background work. Returns false if it was not running.
    async fn shutdown(&self) -> bool {
        if *self.state_tx.borrow() != LifecycleState::Running {
            return false;
        }
        self.heartbeat.stop();
        self.poller.stop();
        self.refresh.stop();
        self.elector.stop();
        self.bus.stop().await;
        true
    }

    async fn halt(&self) {
        error!(tab_id = %self.tab_id, "Fallback polling and refresh both failed; halting");
        self.bus
            .publish(
                MessageType::SessionExpired,
                json!({ "reason": "fallback_exhausted" }),
            )
            .await;
        self.credentials.clear();
        if self.shutdown().await {
            self.state_tx.send_replace(LifecycleState::Halted);
        }
    }
}

async fn watch_exhaustion(
    inner: std::sync::Weak<CoordinatorInner>,
    mut exhausted: watch::Receiver<bool>,
) {
    while exhausted.changed().await.is_ok() {
        if !*exhausted.borrow_and_update() {
            continue;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.refresh.refresh().await {
            info!("Refresh succeeded after poller exhaustion; re-arming poller");
            inner.poller.reset();
            continue;
        }
        inner.halt().await;
        return;
    }
}
