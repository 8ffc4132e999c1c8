//! Fallback Poller.

use parking_lot::Mutex;
use serde_json::json;
use shared_bus::{MessageBus, TransportKind};
use shared_types::{Clock, MessageType, SessionApi, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tc_03_leader_election::LeadershipView;
use tc_04_token_refresh::RefreshTrigger;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poller configuration.
#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Consecutive failures before the poller stops.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

/// Collaborators of the poller.
pub struct PollerDeps {
    pub api: Arc<dyn SessionApi>,
    pub refresh: Arc<dyn RefreshTrigger>,
    pub leadership: Arc<dyn LeadershipView>,
    pub bus: MessageBus,
    pub clock: Arc<dyn Clock>,
}

/// Result of one poll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// This tab does not lead.
    NotLeader,
    /// A push transport is active; polling is not needed.
    PushAvailable,
    /// The poller has given up.
    Stopped,
    /// Events fetched and rebroadcast.
    Delivered(usize),
    /// 401; a refresh was attempted.
    Unauthorized { refreshed: bool, attempts: u32 },
    /// Any other failure.
    Failed { attempts: u32 },
    /// This failure used up the budget; `fallback:failed` was published.
    Exhausted,
}

#[derive(Debug, Default)]
struct PollerState {
    attempts: u32,
    /// Timestamp of the newest server event already observed.
    last_event_at: Option<Timestamp>,
    exhausted: bool,
}

/// Leader-only poller of the session events endpoint.
#[derive(Clone)]
pub struct FallbackPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    config: PollerConfig,
    api: Arc<dyn SessionApi>,
    refresh: Arc<dyn RefreshTrigger>,
    leadership: Arc<dyn LeadershipView>,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
    state: Mutex<PollerState>,
    exhausted_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackPoller {
    #[must_use]
    pub fn new(config: PollerConfig, deps: PollerDeps) -> Self {
        let (exhausted_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(PollerInner {
                config,
                api: deps.api,
                refresh: deps.refresh,
                leadership: deps.leadership,
                bus: deps.bus,
                clock: deps.clock,
                state: Mutex::new(PollerState::default()),
                exhausted_tx,
                task: Mutex::new(None),
            }),
        }
    }

    /// One poll step.
    pub async fn poll_once(&self) -> PollOutcome {
        let inner = &self.inner;
        if inner.state.lock().exhausted {
            return PollOutcome::Stopped;
        }
        if !inner.leadership.is_leader() {
            return PollOutcome::NotLeader;
        }
        if inner.bus.active_transport() != Some(TransportKind::Storage) {
            return PollOutcome::PushAvailable;
        }

        let since = {
            let mut state = inner.state.lock();
            *state.last_event_at.get_or_insert_with(|| inner.clock.now_ms())
        };
        let ctx = inner.refresh.request_context();

        match inner.api.events_since(&ctx, since).await {
            Ok(mut events) => {
                // Servers that treat `since` as inclusive resend the newest event.
                events.retain(|event| event.timestamp > since);
                events.sort_by_key(|event| event.timestamp);
                {
                    let mut state = inner.state.lock();
                    state.attempts = 0;
                    if let Some(newest) = events.last() {
                        let last = state.last_event_at.unwrap_or(0).max(newest.timestamp);
                        state.last_event_at = Some(last);
                    }
                }

                let mut delivered = 0;
                for event in events {
                    match MessageType::parse(&event.event_type) {
                        Some(message_type) => {
                            inner.bus.publish(message_type, event.payload).await;
                            delivered += 1;
                        }
                        None => debug!(event_type = %event.event_type, "Ignoring unknown server event"),
                    }
                }
                if delivered > 0 {
                    debug!(delivered, since, "Rebroadcast server events");
                }
                PollOutcome::Delivered(delivered)
            }
            Err(e) if e.is_unauthorized() => {
                let attempts = inner.record_failure();
                info!(attempts, "Poll unauthorized; refreshing immediately");
                let refreshed = inner.refresh.refresh().await;
                if !refreshed && attempts >= inner.config.max_attempts {
                    return inner.exhaust(attempts).await;
                }
                if refreshed {
                    inner.state.lock().attempts = 0;
                }
                PollOutcome::Unauthorized {
                    refreshed,
                    attempts,
                }
            }
            Err(e) => {
                let attempts = inner.record_failure();
                warn!(attempts, max = inner.config.max_attempts, error = %e, "Fallback poll failed");
                if attempts >= inner.config.max_attempts {
                    return inner.exhaust(attempts).await;
                }
                PollOutcome::Failed { attempts }
            }
        }
    }

    /// Re-arm after exhaustion.
    pub fn reset(&self) {
        {
            let mut state = self.inner.state.lock();
            state.attempts = 0;
            state.exhausted = false;
        }
        self.inner.exhausted_tx.send_replace(false);
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().attempts
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.inner.state.lock().exhausted
    }

    /// Flips to `true` when the poller gives up.
    #[must_use]
    pub fn watch_exhausted(&self) -> watch::Receiver<bool> {
        self.inner.exhausted_tx.subscribe()
    }

    /// Poll every interval. Leaving store-only mode re-arms the poller.
    pub fn start(&self) {
        let poller = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.inner.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut transport = poller.inner.bus.transport_watch();
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        poller.poll_once().await;
                    }
                    changed = transport.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let kind = *transport.borrow_and_update();
                        if kind != Some(TransportKind::Storage) && poller.is_exhausted() {
                            info!(transport = ?kind, "Push transport restored; re-arming poller");
                            poller.reset();
                        }
                    }
                }
            }
        });
        if let Some(previous) = self.inner.task.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }
}

impl PollerInner {
    fn record_failure(&self) -> u32 {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.attempts
    }

    async fn exhaust(&self, attempts: u32) -> PollOutcome {
        self.state.lock().exhausted = true;
        warn!(attempts, "Fallback polling exhausted; stopping");
        self.bus
            .publish(MessageType::FallbackFailed, json!({ "attempts": attempts }))
            .await;
        self.exhausted_tx.send_replace(true);
        PollOutcome::Exhausted
    }
}
