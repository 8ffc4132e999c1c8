//! # Message Bus
//!
//! Owns the active transport, the subscriber registry and the inbound
//! dispatch task of one tab.
//!
//! ## Invariants
//!
//! - At most one transport is active; when none can connect the bus
//!   delivers locally only and the liveness probe keeps retrying.
//! - The storage transport stays attached for the bus's whole lifetime,
//!   whichever transport is active. Every publish is mirrored to it, so a
//!   tab that demoted alone still hears and is heard by its peers; the
//!   duplicate check drops the second copy.
//! - Every message published by this tab reaches local subscribers before
//!   `publish` returns, whatever happens on the transport.
//! - Inbound validation order: own tab, signature, staleness, future skew,
//!   duplicate.

use crate::config::BusConfig;
use crate::dedup::RecentMessageCache;
use crate::filter::EventFilter;
use crate::subscriber::{MessageReceiver, SubscriberRegistry, Subscription};
use crate::transport::{Inbound, Transport, TransportConnector, TransportKind};
use parking_lot::Mutex;
use shared_types::{Clock, CoordinationMessage, MessageError, MessageSigner, MessageType, TabId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tc_02_event_journal::SharedJournal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a published message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sent over the transport that was active.
    Delivered(TransportKind),
    /// The active transport failed; sent over the one it demoted to.
    FellBack(TransportKind),
    /// Only local subscribers received it.
    LocalOnly,
}

impl PublishOutcome {
    /// Transport that carried the message, if any.
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        match self {
            Self::Delivered(kind) | Self::FellBack(kind) => Some(*kind),
            Self::LocalOnly => None,
        }
    }
}

/// Snapshot of bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub demotions: u64,
    pub promotions: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    demotions: AtomicU64,
    promotions: AtomicU64,
}

/// Builder for `MessageBus`.
pub struct MessageBusBuilder {
    tab_id: TabId,
    clock: Arc<dyn Clock>,
    config: BusConfig,
    journal: SharedJournal,
    connectors: Vec<Arc<dyn TransportConnector>>,
}

impl MessageBusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Journal that records every delivered message.
    #[must_use]
    pub fn journal(mut self, journal: SharedJournal) -> Self {
        self.journal = journal;
        self
    }

    /// Add a transport. Connectors are tried in rank order regardless of
    /// the order they are added in.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    #[must_use]
    pub fn build(mut self) -> MessageBus {
        self.connectors.sort_by_key(|c| c.kind());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (active_kind, _) = watch::channel(None);
        let signer = self.config.signing_secret.clone().map(MessageSigner::new);
        let window_ms = self.config.message_timeout.as_millis() as u64;

        MessageBus {
            inner: Arc::new(BusInner {
                tab_id: self.tab_id,
                clock: self.clock,
                signer,
                connectors: self.connectors,
                active: tokio::sync::Mutex::new(None),
                floor: Mutex::new(None),
                active_kind,
                subscribers: Arc::new(SubscriberRegistry::default()),
                journal: self.journal,
                dedup: Mutex::new(RecentMessageCache::new(window_ms)),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                tasks: Mutex::new(Vec::new()),
                counters: Counters::default(),
                config: self.config,
            }),
        }
    }
}

/// Cross-tab message bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    tab_id: TabId,
    config: BusConfig,
    clock: Arc<dyn Clock>,
    signer: Option<MessageSigner>,
    /// Sorted by rank.
    connectors: Vec<Arc<dyn TransportConnector>>,
    active: tokio::sync::Mutex<Option<Arc<dyn Transport>>>,
    /// Storage transport, connected once at start.
    floor: Mutex<Option<Arc<dyn Transport>>>,
    active_kind: watch::Sender<Option<TransportKind>>,
    subscribers: Arc<SubscriberRegistry>,
    journal: SharedJournal,
    dedup: Mutex<RecentMessageCache>,
    inbound_tx: Inbound,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<CoordinationMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

impl MessageBus {
    /// Start building a bus for `tab_id`.
    #[must_use]
    pub fn builder(tab_id: TabId, clock: Arc<dyn Clock>) -> MessageBusBuilder {
        MessageBusBuilder {
            tab_id,
            clock,
            config: BusConfig::default(),
            journal: SharedJournal::default(),
            connectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.inner.tab_id
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Connect the best available transport and start the dispatch and
    /// liveness tasks. A second call is a no-op.
    pub async fn start(&self) {
        let Some(inbound_rx) = self.inner.inbound_rx.lock().take() else {
            debug!(tab_id = %self.inner.tab_id, "Message bus already started");
            return;
        };

        self.inner.attach_floor().await;
        {
            let mut active = self.inner.active.lock().await;
            let first = self.inner.connect_first(|_| true).await;
            self.inner.replace_active(&mut active, first);
        }

        match self.active_transport() {
            Some(kind) => info!(tab_id = %self.inner.tab_id, transport = %kind, "Message bus started"),
            None => warn!(
                tab_id = %self.inner.tab_id,
                "Message bus started without a transport; delivering locally only"
            ),
        }

        let dispatch = tokio::spawn(run_dispatch(Arc::clone(&self.inner), inbound_rx));
        let liveness = tokio::spawn(run_liveness(Arc::clone(&self.inner)));
        self.inner.tasks.lock().extend([dispatch, liveness]);
    }

    /// Stop background tasks and close the active transport.
    pub async fn stop(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let mut active = self.inner.active.lock().await;
        if let Some(transport) = active.take() {
            transport.close().await;
        }
        self.inner.replace_active(&mut active, None);
        let floor = self.inner.floor.lock().take();
        if let Some(floor) = floor {
            floor.close().await;
        }
        info!(tab_id = %self.inner.tab_id, "Message bus stopped");
    }

    /// Publish to local subscribers and every other tab. Never fails.
    pub async fn publish(
        &self,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> PublishOutcome {
        let inner = &self.inner;
        let mut message =
            CoordinationMessage::new(message_type, payload, inner.tab_id.clone(), inner.clock.now_ms());
        if let Some(signer) = &inner.signer {
            signer.sign(&mut message);
        }
        inner.counters.published.fetch_add(1, Ordering::Relaxed);

        inner.journal.record_message(&message);
        inner.subscribers.dispatch(&message);

        let outcome = inner.forward(&message).await;
        debug!(
            message_type = %message_type,
            outcome = ?outcome,
            "Published message"
        );
        outcome
    }

    /// Register a handler for messages matching `filter`.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, handler: F) -> Subscription
    where
        F: Fn(&CoordinationMessage) + Send + Sync + 'static,
    {
        let id = self.inner.subscribers.insert(filter.into(), Arc::new(handler));
        Subscription::new(id, &self.inner.subscribers)
    }

    /// Like `subscribe`, but first replays matching journal entries,
    /// oldest first.
    pub fn subscribe_with_replay<F>(
        &self,
        filter: impl Into<EventFilter>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&CoordinationMessage) + Send + Sync + 'static,
    {
        let filter = filter.into();
        let history = self.inner.journal.replay(None);
        let handler = Arc::new(handler);
        let replay_handler = Arc::clone(&handler);
        let subscription = self.subscribe(filter.clone(), move |m| handler(m));

        for entry in history {
            if !filter.matches_type(entry.event_type) {
                continue;
            }
            let message = CoordinationMessage::new(
                entry.event_type,
                entry.payload,
                TabId::from(entry.source),
                entry.timestamp,
            );
            replay_handler(&message);
        }
        subscription
    }

    /// Async queue of messages matching `filter`.
    pub fn listen(&self, filter: impl Into<EventFilter>) -> MessageReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(filter, move |message| {
            let _ = tx.send(message.clone());
        });
        MessageReceiver::new(rx, subscription)
    }

    /// Validate and deliver a message received from another tab.
    ///
    /// Returns the number of handlers invoked.
    pub fn accept(&self, message: CoordinationMessage) -> Result<usize, MessageError> {
        self.inner.accept(message)
    }

    /// Probe the active transport, demote if it failed, then try to
    /// promote to a better rank. Returns the transport active afterwards.
    pub async fn probe_transports(&self) -> Option<TransportKind> {
        self.inner.probe_transports().await
    }

    #[must_use]
    pub fn active_transport(&self) -> Option<TransportKind> {
        *self.inner.active_kind.borrow()
    }

    /// True when the active transport is shared-store polling.
    #[must_use]
    pub fn is_store_only(&self) -> bool {
        self.active_transport() == Some(TransportKind::Storage)
    }

    /// Observe active transport changes.
    #[must_use]
    pub fn transport_watch(&self) -> watch::Receiver<Option<TransportKind>> {
        self.inner.active_kind.subscribe()
    }

    #[must_use]
    pub fn journal(&self) -> SharedJournal {
        self.inner.journal.clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            demotions: c.demotions.load(Ordering::Relaxed),
            promotions: c.promotions.load(Ordering::Relaxed),
        }
    }
}

impl BusInner {
    /// Connect the storage transport that outlives demotions and
    /// promotions. Storage connects never fail outright.
    async fn attach_floor(&self) {
        let Some(connector) = self
            .connectors
            .iter()
            .find(|c| c.kind() == TransportKind::Storage)
        else {
            return;
        };
        match connector.connect(self.inbound_tx.clone()).await {
            Ok(transport) => *self.floor.lock() = Some(transport),
            Err(e) => warn!(error = %e, "Storage transport unavailable"),
        }
    }

    fn floor(&self) -> Option<Arc<dyn Transport>> {
        self.floor.lock().clone()
    }

    /// Connect the best-ranked transport satisfying `eligible`. Storage
    /// resolves to the attached floor transport when there is one.
    async fn connect_first(
        &self,
        eligible: impl Fn(TransportKind) -> bool,
    ) -> Option<Arc<dyn Transport>> {
        for connector in self.connectors.iter().filter(|c| eligible(c.kind())) {
            if connector.kind() == TransportKind::Storage {
                if let Some(floor) = self.floor() {
                    return Some(floor);
                }
            }
            match connector.connect(self.inbound_tx.clone()).await {
                Ok(transport) => return Some(transport),
                Err(e) => debug!(transport = %connector.kind(), error = %e, "Transport connect failed"),
            }
        }
        None
    }

    /// Next transport after `failed`. Storage is kept rather than dropped.
    async fn demote(&self, failed: TransportKind) -> Option<Arc<dyn Transport>> {
        self.counters.demotions.fetch_add(1, Ordering::Relaxed);
        self.connect_first(|kind| kind > failed || kind == TransportKind::Storage)
            .await
    }

    /// Close a transport leaving the active slot. The floor stays open.
    async fn retire(&self, transport: &Arc<dyn Transport>) {
        if transport.kind() == TransportKind::Storage && self.floor.lock().is_some() {
            return;
        }
        transport.close().await;
    }

    fn replace_active(
        &self,
        slot: &mut Option<Arc<dyn Transport>>,
        next: Option<Arc<dyn Transport>>,
    ) {
        let kind = next.as_ref().map(|t| t.kind());
        *slot = next;
        self.active_kind.send_if_modified(|current| {
            let changed = *current != kind;
            *current = kind;
            changed
        });
    }

    /// Install `next` if the active transport is still of kind `expected`.
    /// A connection that lost the race is retired.
    async fn swap_active(
        &self,
        expected: Option<TransportKind>,
        next: Option<Arc<dyn Transport>>,
    ) -> bool {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|t| t.kind()) != expected {
            if let Some(next) = next {
                self.retire(&next).await;
            }
            return false;
        }
        if let Some(old) = active.take() {
            self.retire(&old).await;
        }
        self.replace_active(&mut active, next);
        true
    }

    async fn mirror(&self, message: &CoordinationMessage) {
        if let Some(floor) = self.floor() {
            if let Err(e) = floor.send(message).await {
                debug!(error = %e, "Mirror to storage failed");
            }
        }
    }

    async fn forward(&self, message: &CoordinationMessage) -> PublishOutcome {
        let mut active = self.active.lock().await;
        let Some(transport) = active.clone() else {
            return PublishOutcome::LocalOnly;
        };
        let kind = transport.kind();

        match transport.send(message).await {
            Ok(()) => {
                drop(active);
                if kind != TransportKind::Storage {
                    self.mirror(message).await;
                }
                return PublishOutcome::Delivered(kind);
            }
            Err(e) => warn!(transport = %kind, error = %e, "Transport send failed; demoting"),
        }

        self.retire(&transport).await;
        let next = self.demote(kind).await;
        self.replace_active(&mut active, next.clone());
        drop(active);
        let Some(next) = next else {
            warn!("No fallback transport; message delivered locally only");
            return PublishOutcome::LocalOnly;
        };

        if next.kind() != kind {
            info!(from = %kind, to = %next.kind(), "Transport demoted");
        }
        let delivered = match next.send(message).await {
            Ok(()) => PublishOutcome::FellBack(next.kind()),
            Err(e) => {
                warn!(transport = %next.kind(), error = %e, "Retry on demoted transport failed");
                PublishOutcome::LocalOnly
            }
        };
        if next.kind() != TransportKind::Storage {
            self.mirror(message).await;
        }
        delivered
    }

    /// Connections are made without holding the active slot, so publishes
    /// are never queued behind a slow connect.
    async fn probe_transports(&self) -> Option<TransportKind> {
        let current = self.active.lock().await.clone();

        match current {
            Some(transport) => {
                if let Err(e) = transport.probe().await {
                    let kind = transport.kind();
                    warn!(transport = %kind, error = %e, "Liveness probe failed; demoting");
                    let next = self.demote(kind).await;
                    self.swap_active(Some(kind), next).await;
                }
            }
            None => {
                let first = self.connect_first(|_| true).await;
                self.swap_active(None, first).await;
            }
        }

        let current = *self.active_kind.borrow();
        if let Some(current) = current {
            if let Some(better) = self.connect_first(|kind| kind < current).await {
                let to = better.kind();
                if self.swap_active(Some(current), Some(better)).await {
                    info!(from = %current, to = %to, "Transport promoted");
                    self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        *self.active_kind.borrow()
    }

    fn validate(&self, message: &CoordinationMessage) -> Result<(), MessageError> {
        if message.is_from(&self.tab_id) {
            return Err(MessageError::FromSelf);
        }
        if let Some(signer) = &self.signer {
            if !signer.verify(message) {
                return Err(MessageError::InvalidSignature);
            }
        }

        let now = self.clock.now_ms();
        let max_age_ms = self.config.message_timeout.as_millis() as u64;
        if message.is_stale(now, max_age_ms) {
            return Err(MessageError::Stale {
                timestamp: message.timestamp,
                max_age_ms,
            });
        }
        let max_skew_ms = self.config.max_future_skew.as_millis() as u64;
        if message.timestamp > now.saturating_add(max_skew_ms) {
            return Err(MessageError::FromFuture {
                timestamp: message.timestamp,
                max_skew_ms,
            });
        }

        if !self.dedup.lock().check_and_insert(message, now) {
            return Err(MessageError::Duplicate);
        }
        Ok(())
    }

    fn accept(&self, message: CoordinationMessage) -> Result<usize, MessageError> {
        if let Err(e) = self.validate(&message) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(
                message_type = %message.message_type,
                source = %message.source_tab_id,
                reason = %e,
                "Dropped inbound message"
            );
            return Err(e);
        }
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.journal.record_message(&message);
        Ok(self.subscribers.dispatch(&message))
    }
}

async fn run_dispatch(
    inner: Arc<BusInner>,
    mut inbound: mpsc::UnboundedReceiver<CoordinationMessage>,
) {
    while let Some(message) = inbound.recv().await {
        let _ = inner.accept(message);
    }
}

async fn run_liveness(inner: Arc<BusInner>) {
    let mut ticker = tokio::time::interval(inner.config.liveness_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.probe_transports().await;
    }
}
