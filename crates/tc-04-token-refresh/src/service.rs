//! Token Refresh Coordinator service.

use crate::domain::InFlightMarker;
use crate::error::RefreshError;
use crate::ports::{CredentialStore, RefreshTrigger};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use shared_bus::{EventFilter, MessageBus, Subscription};
use shared_store::keys::REFRESH_IN_FLIGHT_KEY;
use shared_store::{SharedStore, SharedStoreExt};
use shared_types::{
    Clock, CoordinationMessage, MessageType, RequestContext, SessionApi, TabId, Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tc_03_leader_election::{ElectionRole, LeadershipView};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest scheduler sleep.
const MIN_SCHEDULER_SLEEP: Duration = Duration::from_secs(1);

/// Refresh coordinator configuration.
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Proactive refresh this long before expiry.
    pub refresh_skew: Duration,
    /// How long a follower waits for the leader's broadcast.
    pub follower_wait: Duration,
    /// A shared in-flight flag older than this is ignored.
    pub in_flight_ttl: Duration,
    /// Minimum gap between two proactive refreshes.
    pub min_interval: Duration,
    /// Longest scheduler sleep when nothing is due.
    pub max_idle: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(60),
            follower_wait: Duration::from_secs(10),
            in_flight_ttl: Duration::from_secs(30),
            min_interval: Duration::from_secs(5),
            max_idle: Duration::from_secs(30),
        }
    }
}

/// Collaborators of the refresh coordinator.
pub struct RefreshDeps {
    pub api: Arc<dyn SessionApi>,
    pub credentials: Arc<dyn CredentialStore>,
    pub leadership: Arc<dyn LeadershipView>,
    /// Shared store for the in-flight flag. Should be breaker-guarded.
    pub store: Arc<dyn SharedStore>,
    pub bus: MessageBus,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct RefreshState {
    /// Current local flight.
    in_flight: Option<u64>,
    /// Refresh waiter queue of the current flight.
    waiters: Vec<oneshot::Sender<bool>>,
    /// Last refresh completed by any tab, as far as this tab knows.
    last_refreshed_at: Option<Timestamp>,
}

/// Single-flight refresh coordinator for one tab. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<RefreshInner>,
}

struct RefreshInner {
    tab_id: TabId,
    device_id: String,
    config: RefreshConfig,
    api: Arc<dyn SessionApi>,
    credentials: Arc<dyn CredentialStore>,
    leadership: Arc<dyn LeadershipView>,
    store: Arc<dyn SharedStore>,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
    state: Mutex<RefreshState>,
    next_flight: AtomicU64,
    network_calls: AtomicU64,
    reschedule: Notify,
    subscriptions: Mutex<Vec<Subscription>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(config: RefreshConfig, device_id: impl Into<String>, deps: RefreshDeps) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                tab_id: deps.bus.tab_id().clone(),
                device_id: device_id.into(),
                config,
                api: deps.api,
                credentials: deps.credentials,
                leadership: deps.leadership,
                store: deps.store,
                bus: deps.bus,
                clock: deps.clock,
                state: Mutex::new(RefreshState::default()),
                next_flight: AtomicU64::new(1),
                network_calls: AtomicU64::new(0),
                reschedule: Notify::new(),
                subscriptions: Mutex::new(Vec::new()),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to token traffic and start the proactive scheduler.
    pub fn start(&self) {
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            if subscriptions.is_empty() {
                let weak = Arc::downgrade(&self.inner);
                subscriptions.push(self.inner.bus.subscribe(
                    EventFilter::types(vec![
                        MessageType::TokensRefreshed,
                        MessageType::TokensUpdated,
                        MessageType::RefreshRequested,
                        MessageType::SessionExpired,
                        MessageType::Logout,
                    ]),
                    move |message| on_refresh_message(&weak, message),
                ));
            }
        }

        let role = self.inner.leadership.watch_role();
        let task = tokio::spawn(run_scheduler(self.clone(), role));
        if let Some(previous) = self.inner.scheduler.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.scheduler.lock().take() {
            task.abort();
        }
        self.inner.subscriptions.lock().clear();
    }

    /// Refresh credentials; concurrent callers share one flight.
    pub async fn refresh(&self) -> bool {
        let (receiver, lead) = {
            let mut state = self.inner.state.lock();
            let (sender, receiver) = oneshot::channel();
            state.waiters.push(sender);
            if state.in_flight.is_some() {
                (receiver, None)
            } else {
                let flight = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                state.in_flight = Some(flight);
                (receiver, Some(flight))
            }
        };

        if let Some(flight) = lead {
            // Detached so a dropped caller cannot cancel the shared flight.
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let outcome = inner.run_flight(flight).await;
                inner.settle(flight, outcome);
            });
        }

        receiver.await.unwrap_or(false)
    }

    /// Refresh if this tab leads and the credential is within the skew of
    /// its expiry. `None` when nothing was due.
    pub async fn refresh_if_due(&self) -> Option<bool> {
        if !self.inner.leadership.is_leader() {
            return None;
        }
        let due = self.next_refresh_due()?;
        let now = self.inner.clock.now_ms();
        if now < due {
            return None;
        }
        let min_gap = self.inner.config.min_interval.as_millis() as u64;
        if let Some(last) = self.inner.state.lock().last_refreshed_at {
            if now.saturating_sub(last) < min_gap {
                return None;
            }
        }
        info!(tab_id = %self.inner.tab_id, due, "Proactive refresh due");
        Some(self.refresh().await)
    }

    /// When the next proactive refresh is due.
    #[must_use]
    pub fn next_refresh_due(&self) -> Option<Timestamp> {
        let skew = self.inner.config.refresh_skew.as_millis() as u64;
        self.inner
            .credentials
            .expires_at()
            .map(|expires_at| expires_at.saturating_sub(skew))
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Network refresh calls made by this tab.
    #[must_use]
    pub fn network_calls(&self) -> u64 {
        self.inner.network_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_refreshed_at(&self) -> Option<Timestamp> {
        self.inner.state.lock().last_refreshed_at
    }

    /// Identity headers for a remote call made by this tab.
    #[must_use]
    pub fn request_context(&self) -> RequestContext {
        self.inner.request_context()
    }

    fn until_due(&self) -> Option<Duration> {
        if !self.inner.leadership.is_leader() {
            return None;
        }
        let due = self.next_refresh_due()?;
        let now = self.inner.clock.now_ms();
        Some(Duration::from_millis(due.saturating_sub(now)))
    }
}

#[async_trait]
impl RefreshTrigger for RefreshCoordinator {
    async fn refresh(&self) -> bool {
        RefreshCoordinator::refresh(self).await
    }

    fn request_context(&self) -> RequestContext {
        self.inner.request_context()
    }
}

impl RefreshInner {
    fn request_context(&self) -> RequestContext {
        RequestContext {
            device_id: self.device_id.clone(),
            tab_id: self.tab_id.clone(),
            is_leader: self.leadership.is_leader(),
            csrf_token: self.credentials.csrf_token(),
        }
    }

    async fn run_flight(&self, flight: u64) -> bool {
        let result = if self.leadership.is_leader() {
            self.refresh_network(flight).await
        } else {
            match self.await_answer(Some(flight)).await {
                Err(RefreshError::NoAnswer { waited_ms }) => {
                    warn!(
                        tab_id = %self.tab_id,
                        waited_ms,
                        "No refresh broadcast from leader; refreshing directly"
                    );
                    self.refresh_network(flight).await
                }
                other => other,
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(tab_id = %self.tab_id, error = %e, "Refresh flight failed");
                false
            }
        }
    }

    /// Wait for another tab's refresh broadcast. With `request`, ask the
    /// leader first; the flight id keeps repeated requests distinct.
    async fn await_answer(&self, request: Option<u64>) -> Result<(), RefreshError> {
        let mut answers = self.bus.listen(EventFilter::types(vec![
            MessageType::TokensRefreshed,
            MessageType::TokensUpdated,
            MessageType::SessionExpired,
            MessageType::Logout,
        ]));
        if let Some(flight) = request {
            self.bus
                .publish(MessageType::RefreshRequested, json!({ "flight": flight }))
                .await;
        }

        let wait = self.config.follower_wait;
        let answer = tokio::time::timeout(wait, async {
            while let Some(message) = answers.recv().await {
                if message.message_type.is_session_ending() {
                    return Err(RefreshError::SessionEnded);
                }
                if !message.is_from(&self.tab_id) {
                    return Ok(());
                }
            }
            Err(RefreshError::SessionEnded)
        })
        .await;

        answer.unwrap_or(Err(RefreshError::NoAnswer {
            waited_ms: wait.as_millis() as u64,
        }))
    }

    async fn refresh_network(&self, flight: u64) -> Result<(), RefreshError> {
        let now = self.clock.now_ms();
        let ttl_ms = self.config.in_flight_ttl.as_millis() as u64;

        if let Ok(Some(marker)) = self.store.get_json::<InFlightMarker>(REFRESH_IN_FLIGHT_KEY) {
            if marker.is_foreign_and_fresh(&self.tab_id, now, ttl_ms) {
                debug!(holder = %marker.tab_id, "Refresh in flight elsewhere; awaiting its broadcast");
                match self.await_answer(None).await {
                    Err(RefreshError::NoAnswer { .. }) => {}
                    other => return other,
                }
            }
        }

        let marker = InFlightMarker {
            tab_id: self.tab_id.clone(),
            started_at: self.clock.now_ms(),
            flight,
        };
        if let Err(e) = self.store.set_json(REFRESH_IN_FLIGHT_KEY, &marker) {
            debug!(error = %e, "In-flight flag not persisted");
        }

        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let result = self.api.refresh_tokens(&self.request_context()).await;
        self.clear_marker(&marker);

        if self.state.lock().in_flight != Some(flight) {
            debug!(flight, "Discarding refresh response of a cancelled flight");
            return Err(RefreshError::SessionEnded);
        }

        match result {
            Ok(grant) => {
                self.credentials.store_grant(&grant);
                self.state.lock().last_refreshed_at = Some(self.clock.now_ms());
                self.reschedule.notify_one();
                info!(
                    tab_id = %self.tab_id,
                    expires_at = grant.expires_at,
                    "Credentials refreshed"
                );
                self.bus
                    .publish(
                        MessageType::TokensRefreshed,
                        json!({ "expiresAt": grant.expires_at }),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!(tab_id = %self.tab_id, error = %e, "Credential refresh failed; expiring session");
                self.end_session();
                self.bus
                    .publish(
                        MessageType::SessionExpired,
                        json!({ "reason": "refresh_failed" }),
                    )
                    .await;
                Err(RefreshError::Rejected(e))
            }
        }
    }

    fn clear_marker(&self, ours: &InFlightMarker) {
        match self.store.get_json::<InFlightMarker>(REFRESH_IN_FLIGHT_KEY) {
            Ok(Some(current)) if &current == ours => {
                if let Err(e) = self.store.remove(REFRESH_IN_FLIGHT_KEY) {
                    debug!(error = %e, "In-flight flag not cleared");
                }
            }
            _ => {}
        }
    }

    /// Resolve the waiter queue, unless the flight was already cancelled.
    fn settle(&self, flight: u64, outcome: bool) {
        let waiters = {
            let mut state = self.state.lock();
            if state.in_flight != Some(flight) {
                return;
            }
            state.in_flight = None;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome);
        }
    }

    /// Clear credentials and fail every waiter.
    fn end_session(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = None;
            std::mem::take(&mut state.waiters)
        };
        self.credentials.clear();
        for waiter in waiters {
            let _ = waiter.send(false);
        }
        self.reschedule.notify_one();
    }

    /// Answer `requester` with the current expiry. The requester is part of
    /// the payload so repeated answers are not dropped as duplicates.
    async fn rebroadcast_expiry(&self, requester: &TabId) -> bool {
        match self.credentials.expires_at() {
            Some(expires_at) => {
                debug!(
                    expires_at,
                    requester = %requester,
                    "Refresh already completed; rebroadcasting expiry"
                );
                self.bus
                    .publish(
                        MessageType::TokensRefreshed,
                        json!({ "expiresAt": expires_at, "requestedBy": requester }),
                    )
                    .await;
                true
            }
            None => false,
        }
    }
}

fn on_refresh_message(weak: &Weak<RefreshInner>, message: &CoordinationMessage) {
    let Some(inner) = weak.upgrade() else { return };

    match message.message_type {
        MessageType::TokensRefreshed | MessageType::TokensUpdated => {
            if message.is_from(&inner.tab_id) {
                return;
            }
            let Some(expires_at) = message.payload.get("expiresAt").and_then(|v| v.as_u64()) else {
                return;
            };
            inner.credentials.update_expiry(expires_at);
            {
                let mut state = inner.state.lock();
                let last = state.last_refreshed_at.unwrap_or(0).max(message.timestamp);
                state.last_refreshed_at = Some(last);
            }
            inner.reschedule.notify_one();
            debug!(
                expires_at,
                source = %message.source_tab_id,
                "Applied credential expiry from another tab"
            );
        }
        MessageType::SessionExpired | MessageType::Logout => {
            debug!(reason = %message.message_type, "Session ended; clearing credentials");
            inner.end_session();
        }
        MessageType::RefreshRequested => {
            if message.is_from(&inner.tab_id) || !inner.leadership.is_leader() {
                return;
            }
            let already_refreshed = inner
                .state
                .lock()
                .last_refreshed_at
                .is_some_and(|last| message.timestamp <= last);
            let requester = message.source_tab_id.clone();
            let coordinator = RefreshCoordinator { inner };
            tokio::spawn(async move {
                let answered =
                    already_refreshed && coordinator.inner.rebroadcast_expiry(&requester).await;
                if !answered {
                    coordinator.refresh().await;
                }
            });
        }
        _ => {}
    }
}

async fn run_scheduler(coordinator: RefreshCoordinator, mut role: watch::Receiver<ElectionRole>) {
    let max_idle = coordinator.inner.config.max_idle;
    loop {
        let wait = coordinator
            .until_due()
            .unwrap_or(max_idle)
            .clamp(MIN_SCHEDULER_SLEEP, max_idle.max(MIN_SCHEDULER_SLEEP));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                coordinator.refresh_if_due().await;
            }
            changed = role.changed() => {
                if changed.is_err() {
                    break;
                }
                if *role.borrow_and_update() == ElectionRole::Leader {
                    if let Some(due) = coordinator.next_refresh_due() {
                        info!(tab_id = %coordinator.inner.tab_id, due, "Scheduled proactive refresh");
                    }
                    coordinator.refresh_if_due().await;
                }
            }
            _ = coordinator.inner.reschedule.notified() => {}
        }
    }
}
