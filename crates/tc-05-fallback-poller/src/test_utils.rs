//! Test doubles shared by poller and heartbeat tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{BusConfig, MessageBus, StorageConnector};
use shared_store::InMemorySharedStore;
use shared_types::{
    Clock, RequestContext, ServerEvent, SessionApiError, SessionApi, SessionStatus, TabId,
    Timestamp, TokenGrant,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tc_03_leader_election::{ElectionRole, LeadershipView};
use tc_04_token_refresh::RefreshTrigger;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    Unauthorized,
    ServerError,
}

impl Reply {
    fn error(self) -> Option<SessionApiError> {
        match self {
            Reply::Ok => None,
            Reply::Unauthorized => Some(SessionApiError::Unauthorized),
            Reply::ServerError => Some(SessionApiError::Status { status: 503 }),
        }
    }
}

pub(crate) struct MockApi {
    reply: Mutex<Reply>,
    events: Mutex<Vec<ServerEvent>>,
    event_calls: AtomicU32,
    heartbeat_calls: AtomicU32,
    last_since: Mutex<Timestamp>,
    last_context: Mutex<Option<RequestContext>>,
}

impl MockApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(Reply::Ok),
            events: Mutex::new(Vec::new()),
            event_calls: AtomicU32::new(0),
            heartbeat_calls: AtomicU32::new(0),
            last_since: Mutex::new(0),
            last_context: Mutex::new(None),
        })
    }

    pub(crate) fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    /// Events handed out by the next successful poll.
    pub(crate) fn push_events(&self, events: Vec<ServerEvent>) {
        self.events.lock().extend(events);
    }

    pub(crate) fn event_calls(&self) -> u32 {
        self.event_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn heartbeat_calls(&self) -> u32 {
        self.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_since(&self) -> Timestamp {
        *self.last_since.lock()
    }

    pub(crate) fn last_context(&self) -> Option<RequestContext> {
        self.last_context.lock().clone()
    }
}

#[async_trait]
impl SessionApi for MockApi {
    async fn events_since(
        &self,
        ctx: &RequestContext,
        since: Timestamp,
    ) -> Result<Vec<ServerEvent>, SessionApiError> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock() = since;
        *self.last_context.lock() = Some(ctx.clone());
        if let Some(err) = self.reply.lock().error() {
            return Err(err);
        }
        Ok(std::mem::take(&mut *self.events.lock()))
    }

    async fn heartbeat(&self, ctx: &RequestContext) -> Result<(), SessionApiError> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock() = Some(ctx.clone());
        match self.reply.lock().error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn refresh_tokens(&self, _ctx: &RequestContext) -> Result<TokenGrant, SessionApiError> {
        Err(SessionApiError::Status { status: 501 })
    }

    async fn validate_session(
        &self,
        _ctx: &RequestContext,
    ) -> Result<SessionStatus, SessionApiError> {
        Ok(SessionStatus {
            valid: true,
            expires_at: None,
            user_id: None,
        })
    }
}

pub(crate) struct MockRefresh {
    outcome: AtomicBool,
    calls: AtomicU32,
}

impl MockRefresh {
    pub(crate) fn new(outcome: bool) -> Arc<Self> {
        Arc::new(Self {
            outcome: AtomicBool::new(outcome),
            calls: AtomicU32::new(0),
        })
    }

    pub(crate) fn set_outcome(&self, outcome: bool) {
        self.outcome.store(outcome, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshTrigger for MockRefresh {
    async fn refresh(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.load(Ordering::SeqCst)
    }

    fn request_context(&self) -> RequestContext {
        RequestContext {
            device_id: "device-1".into(),
            tab_id: TabId::from("tab-a"),
            is_leader: true,
            csrf_token: None,
        }
    }
}

pub(crate) struct FixedLeadership {
    leader: AtomicBool,
    role: watch::Sender<ElectionRole>,
}

impl FixedLeadership {
    pub(crate) fn new(leader: bool) -> Arc<Self> {
        let this = Arc::new(Self {
            leader: AtomicBool::new(false),
            role: watch::channel(ElectionRole::Follower).0,
        });
        this.set(leader);
        this
    }

    pub(crate) fn set(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
        self.role.send_replace(if leader {
            ElectionRole::Leader
        } else {
            ElectionRole::Follower
        });
    }
}

impl LeadershipView for FixedLeadership {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn leader_id(&self) -> Option<TabId> {
        None
    }

    fn watch_role(&self) -> watch::Receiver<ElectionRole> {
        self.role.subscribe()
    }
}

/// A started bus whose only transport is the shared store.
pub(crate) async fn store_only_bus(tab: &str, clock: Arc<dyn Clock>) -> MessageBus {
    let config = BusConfig {
        storage_poll_interval: Duration::from_millis(10),
        ..BusConfig::default()
    };
    let bus = MessageBus::builder(TabId::from(tab), clock.clone())
        .connector(Arc::new(StorageConnector::new(
            Arc::new(InMemorySharedStore::new("shared")),
            TabId::from(tab),
            clock,
            config.storage_poll_interval,
            config.max_fallback_entries,
        )))
        .config(config)
        .build();
    bus.start().await;
    bus
}
