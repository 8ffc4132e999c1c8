//! # Tab Harness
//!
//! Simulated tabs sharing one `InMemorySharedStore`, one `ChannelHub` and
//! one `ManualClock`. Every tab talks to the same `MockSessionApi`, so the
//! API's counters show how many network calls the whole "browser" made.

use async_trait::async_trait;
use coordinator_runtime::{CoordinatorConfig, SessionCoordinator};
use parking_lot::Mutex;
use shared_bus::ChannelHub;
use shared_store::InMemorySharedStore;
use shared_types::{
    Clock, ManualClock, RequestContext, ServerEvent, SessionApi, SessionApiError, SessionStatus, TabId,
    Timestamp, TokenGrant,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tc_04_token_refresh::InMemoryCredentialStore;

// =============================================================================
// MOCK SESSION API
// =============================================================================

/// Canned answer for the events and heartbeat endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiReply {
    Ok,
    Unauthorized,
    ServerError,
}

impl ApiReply {
    fn error(self) -> Option<SessionApiError> {
        match self {
            ApiReply::Ok => None,
            ApiReply::Unauthorized => Some(SessionApiError::Unauthorized),
            ApiReply::ServerError => Some(SessionApiError::Status { status: 503 }),
        }
    }
}

pub struct MockSessionApi {
    refresh_delay: Mutex<Duration>,
    refresh_fails: AtomicBool,
    /// Expiry handed out by the next refresh.
    granted_expiry: AtomicU64,
    /// Expiry reported by session validation.
    session_expiry: AtomicU64,
    session_valid: AtomicBool,
    events_reply: Mutex<ApiReply>,
    events: Mutex<Vec<ServerEvent>>,
    pub refresh_calls: AtomicU64,
    pub event_calls: AtomicU64,
    pub heartbeat_calls: AtomicU64,
    pub validate_calls: AtomicU64,
}

impl MockSessionApi {
    #[must_use]
    pub fn new(session_expiry: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_fails: AtomicBool::new(false),
            granted_expiry: AtomicU64::new(session_expiry + 3_600_000),
            session_expiry: AtomicU64::new(session_expiry),
            session_valid: AtomicBool::new(true),
            events_reply: Mutex::new(ApiReply::Ok),
            events: Mutex::new(Vec::new()),
            refresh_calls: AtomicU64::new(0),
            event_calls: AtomicU64::new(0),
            heartbeat_calls: AtomicU64::new(0),
            validate_calls: AtomicU64::new(0),
        })
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn set_refresh_fails(&self, fails: bool) {
        self.refresh_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_granted_expiry(&self, expires_at: Timestamp) {
        self.granted_expiry.store(expires_at, Ordering::SeqCst);
    }

    pub fn set_events_reply(&self, reply: ApiReply) {
        *self.events_reply.lock() = reply;
    }

    pub fn push_event(&self, event: ServerEvent) {
        self.events.lock().push(event);
    }

    #[must_use]
    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn event_calls(&self) -> u64 {
        self.event_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn events_since(
        &self,
        _ctx: &RequestContext,
        _since: Timestamp,
    ) -> Result<Vec<ServerEvent>, SessionApiError> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.events_reply.lock().error() {
            return Err(err);
        }
        Ok(std::mem::take(&mut *self.events.lock()))
    }

    async fn heartbeat(&self, _ctx: &RequestContext) -> Result<(), SessionApiError> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        match self.events_reply.lock().error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn refresh_tokens(&self, _ctx: &RequestContext) -> Result<TokenGrant, SessionApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(SessionApiError::Unauthorized);
        }
        Ok(TokenGrant {
            expires_at: self.granted_expiry.load(Ordering::SeqCst),
            csrf_token: Some("csrf-rotated".to_string()),
        })
    }

    async fn validate_session(
        &self,
        _ctx: &RequestContext,
    ) -> Result<SessionStatus, SessionApiError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SessionStatus {
            valid: self.session_valid.load(Ordering::SeqCst),
            expires_at: Some(self.session_expiry.load(Ordering::SeqCst)),
            user_id: Some("user-1".to_string()),
        })
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// Harness options.
#[derive(Clone)]
pub struct HarnessOptions {
    pub tabs: usize,
    /// Offer the channel transport. `false` leaves the store as the only
    /// transport.
    pub channel: bool,
    /// Remaining credential lifetime reported at start.
    pub session_ttl: Duration,
    pub config: CoordinatorConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            tabs: 2,
            channel: true,
            session_ttl: Duration::from_secs(900),
            config: fast_config(),
        }
    }
}

/// Defaults with the sub-second delays shortened so real-time waits in
/// tests stay small. Protocol constants are untouched.
#[must_use]
pub fn fast_config() -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.api.device_id = Some("device-test".to_string());
    config.elector.claim_settle_delay = Duration::from_millis(10);
    config.bus.storage_poll_interval = Duration::from_millis(10);
    config
}

pub struct HarnessTab {
    pub coordinator: SessionCoordinator,
    pub credentials: Arc<InMemoryCredentialStore>,
}

pub struct TabHarness {
    pub clock: Arc<ManualClock>,
    pub store: InMemorySharedStore,
    pub hub: Option<Arc<ChannelHub>>,
    pub api: Arc<MockSessionApi>,
    pub tabs: Vec<HarnessTab>,
}

impl TabHarness {
    /// Tabs on the channel transport.
    #[must_use]
    pub fn with_channel(tabs: usize) -> Self {
        Self::new(HarnessOptions {
            tabs,
            ..HarnessOptions::default()
        })
    }

    /// Tabs whose only transport is the shared store.
    #[must_use]
    pub fn store_only(tabs: usize) -> Self {
        Self::new(HarnessOptions {
            tabs,
            channel: false,
            ..HarnessOptions::default()
        })
    }

    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    #[must_use]
    pub fn new(options: HarnessOptions) -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = InMemorySharedStore::new("shared");
        let hub = options.channel.then(|| ChannelHub::new("harness"));
        let session_expiry = clock.now_ms() + options.session_ttl.as_millis() as u64;
        let api = MockSessionApi::new(session_expiry);

        let tabs = (0..options.tabs)
            .map(|i| {
                let credentials = Arc::new(InMemoryCredentialStore::new());
                let mut builder =
                    SessionCoordinator::builder(options.config.clone(), api.clone())
                        .shared_store(Arc::new(store.clone()))
                        .local_store(Arc::new(InMemorySharedStore::new(format!("local-{i}"))))
                        .credentials(credentials.clone())
                        .clock(clock.clone())
                        .tab_id(TabId::from(format!("tab-{i}")));
                if let Some(hub) = &hub {
                    builder = builder.channel_hub(Arc::clone(hub));
                }
                HarnessTab {
                    coordinator: builder.build().expect("harness config is valid"),
                    credentials,
                }
            })
            .collect();

        Self {
            clock,
            store,
            hub,
            api,
            tabs,
        }
    }

    #[must_use]
    pub fn tab(&self, index: usize) -> &SessionCoordinator {
        &self.tabs[index].coordinator
    }

    #[must_use]
    pub fn credentials(&self, index: usize) -> &InMemoryCredentialStore {
        &self.tabs[index].credentials
    }

    /// Start tabs one after another, in index order.
    pub async fn start_all(&self) {
        for tab in &self.tabs {
            tab.coordinator.start().await;
        }
        settle().await;
    }

    pub async fn stop_all(&self) {
        for tab in &self.tabs {
            tab.coordinator.stop().await;
        }
    }

    /// Tabs currently claiming leadership.
    #[must_use]
    pub fn leaders(&self) -> Vec<TabId> {
        self.tabs
            .iter()
            .filter(|t| t.coordinator.is_leader())
            .map(|t| t.coordinator.tab_id().clone())
            .collect()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    #[must_use]
    pub fn now_ms(&self) -> Timestamp {
        self.clock.now_ms()
    }
}

/// Let spawned dispatch and transport tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
