//! Leader Elector service.

use crate::domain::{ClaimToken, ElectionRole};
use crate::error::{ElectionError, ElectionResult};
use crate::ports::LeadershipView;
use parking_lot::Mutex;
use serde_json::json;
use shared_bus::{EventFilter, MessageBus, Subscription};
use shared_store::keys::{LEADER_KEY, LEADER_LOCK_KEY};
use shared_store::{SharedStore, SharedStoreExt, StoreError};
use shared_types::{Clock, CoordinationMessage, LeadershipRecord, MessageType, TabId, Timestamp};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Leader elector configuration.
#[derive(Clone, Debug)]
pub struct ElectorConfig {
    /// Renewal and check interval.
    pub renewal_interval: Duration,
    /// A record older than `renewal_interval * staleness_multiple` is expired.
    pub staleness_multiple: u32,
    /// Wait between writing the claim token and re-checking it.
    pub claim_settle_delay: Duration,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            renewal_interval: Duration::from_secs(5),
            staleness_multiple: 3,
            claim_settle_delay: Duration::from_millis(50),
        }
    }
}

impl ElectorConfig {
    /// Staleness threshold in milliseconds.
    #[must_use]
    pub fn staleness_ms(&self) -> u64 {
        self.renewal_interval.as_millis() as u64 * u64::from(self.staleness_multiple)
    }
}

#[derive(Debug, Default)]
struct ElectorState {
    role: ElectionRole,
    leader_id: Option<TabId>,
    /// Last leader ping received from another tab.
    last_foreign_ping: Option<Timestamp>,
    /// Leading without a record in the shared store.
    degraded: bool,
}

/// Leader elector for one tab. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LeaderElector {
    inner: Arc<ElectorInner>,
}

struct ElectorInner {
    tab_id: TabId,
    config: ElectorConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn SharedStore>,
    bus: MessageBus,
    state: Mutex<ElectorState>,
    role_tx: watch::Sender<ElectionRole>,
    /// Serializes elect/check within this tab.
    election: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    /// Create an elector. `store` should be breaker-guarded.
    #[must_use]
    pub fn new(
        config: ElectorConfig,
        store: Arc<dyn SharedStore>,
        bus: MessageBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (role_tx, _) = watch::channel(ElectionRole::Follower);
        Self {
            inner: Arc::new(ElectorInner {
                tab_id: bus.tab_id().clone(),
                config,
                clock,
                store,
                bus,
                state: Mutex::new(ElectorState::default()),
                role_tx,
                election: tokio::sync::Mutex::new(()),
                subscriptions: Mutex::new(Vec::new()),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn tab_id(&self) -> &TabId {
        &self.inner.tab_id
    }

    #[must_use]
    pub fn role(&self) -> ElectionRole {
        self.inner.state.lock().role
    }

    /// True while leading without a record in the shared store.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.inner.state.lock().degraded
    }

    /// Subscribe to election traffic, run a first election and start the
    /// periodic check.
    pub async fn start(&self) {
        self.listen();
        let role = self.elect().await;
        info!(tab_id = %self.inner.tab_id, role = %role, "Leader elector started");

        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.renewal_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                LeaderElector { inner }.check().await;
            }
        });
        if let Some(previous) = self.inner.task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the periodic check and drop bus subscriptions. The leadership
    /// record is left to expire.
    pub fn stop(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.subscriptions.lock().clear();
        self.inner.set_role(ElectionRole::Follower, None);
        self.inner.state.lock().leader_id = None;
        info!(tab_id = %self.inner.tab_id, "Leader elector stopped");
    }

    fn listen(&self) {
        let mut subscriptions = self.inner.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        subscriptions.push(self.inner.bus.subscribe(
            EventFilter::types(vec![MessageType::LeaderPing, MessageType::LeaderElection]),
            move |message| on_election_message(&weak, message),
        ));
    }

    /// Run one election round. Never fails; store trouble falls back to
    /// degraded mode.
    pub async fn elect(&self) -> ElectionRole {
        let _round = self.inner.election.lock().await;
        self.inner.elect_locked().await
    }

    /// Periodic step: renew while leader, otherwise elect if the record is
    /// missing or stale.
    pub async fn check(&self) -> ElectionRole {
        let _round = self.inner.election.lock().await;
        let inner = &self.inner;
        let now = inner.clock.now_ms();
        let staleness = inner.config.staleness_ms();
        let record = inner.store.get_json::<LeadershipRecord>(LEADER_KEY);

        if inner.state.lock().role == ElectionRole::Leader {
            match record {
                Ok(Some(record)) if foreign_holder(&record, &inner.tab_id, now, staleness) => {
                    info!(
                        tab_id = %inner.tab_id,
                        holder = %record.tab_id,
                        "Another tab holds leadership; stepping down"
                    );
                    inner.set_role(ElectionRole::Follower, Some(record.tab_id));
                }
                Ok(_) => inner.renew(now).await,
                Err(e) => {
                    debug!(error = %e, "Cannot read leadership record; leading in memory");
                    inner.state.lock().degraded = true;
                    inner.bus.publish(MessageType::LeaderPing, json!({})).await;
                }
            }
            return inner.state.lock().role;
        }

        match record {
            Ok(Some(record)) if foreign_holder(&record, &inner.tab_id, now, staleness) => {
                inner.state.lock().leader_id = Some(record.tab_id);
                ElectionRole::Follower
            }
            Ok(_) => inner.elect_locked().await,
            Err(e) => inner.elect_degraded(&e).await,
        }
    }
}

impl ElectorInner {
    async fn elect_locked(&self) -> ElectionRole {
        let now = self.clock.now_ms();
        let staleness = self.config.staleness_ms();
        match self.store.get_json::<LeadershipRecord>(LEADER_KEY) {
            Ok(Some(record)) if foreign_holder(&record, &self.tab_id, now, staleness) => {
                self.set_role(ElectionRole::Follower, Some(record.tab_id));
                return ElectionRole::Follower;
            }
            Ok(_) => {}
            Err(e) => return self.elect_degraded(&e).await,
        }

        self.set_role(ElectionRole::Candidate, None);
        self.bus
            .publish(MessageType::LeaderElection, json!({}))
            .await;

        match self.try_claim().await {
            Ok(()) => {
                self.become_leader(false).await;
                ElectionRole::Leader
            }
            Err(ElectionError::LostRace { holder }) => {
                debug!(tab_id = %self.tab_id, holder = %holder, "Lost leadership race");
                self.set_role(ElectionRole::Follower, Some(holder));
                ElectionRole::Follower
            }
            Err(ElectionError::Store(e)) => self.elect_degraded(&e).await,
        }
    }

    /// Write-then-verify claim.
    async fn try_claim(&self) -> ElectionResult<()> {
        let token = ClaimToken::new(self.tab_id.clone());
        self.store.set_json(LEADER_LOCK_KEY, &token)?;
        tokio::time::sleep(self.config.claim_settle_delay).await;

        {
            let state = self.state.lock();
            if state.role == ElectionRole::Follower {
                if let Some(holder) = state.leader_id.clone() {
                    return Err(ElectionError::LostRace { holder });
                }
            }
        }

        match self.store.get_json::<ClaimToken>(LEADER_LOCK_KEY)? {
            Some(current) if current == token => {}
            Some(current) => {
                return Err(ElectionError::LostRace {
                    holder: current.tab_id,
                })
            }
            // Lock vanished; nobody else claimed over us.
            None => {}
        }

        let now = self.clock.now_ms();
        if let Some(record) = self.store.get_json::<LeadershipRecord>(LEADER_KEY)? {
            if foreign_holder(&record, &self.tab_id, now, self.config.staleness_ms()) {
                return Err(ElectionError::LostRace {
                    holder: record.tab_id,
                });
            }
        }

        self.store
            .set_json(LEADER_KEY, &LeadershipRecord::new(self.tab_id.clone(), now))?;
        Ok(())
    }

    /// Election without the shared store.
    async fn elect_degraded(&self, error: &StoreError) -> ElectionRole {
        let now = self.clock.now_ms();
        let staleness = self.config.staleness_ms();
        let recent_leader = {
            let state = self.state.lock();
            state
                .last_foreign_ping
                .filter(|seen| now.saturating_sub(*seen) <= staleness)
                .and(state.leader_id.clone())
                .filter(|leader| leader != &self.tab_id)
        };

        if let Some(leader) = recent_leader {
            debug!(error = %error, leader = %leader, "Store unavailable; following recent leader");
            self.set_role(ElectionRole::Follower, Some(leader));
            return ElectionRole::Follower;
        }

        warn!(
            tab_id = %self.tab_id,
            error = %error,
            "Store unavailable and no recent leader ping; leading in memory"
        );
        self.become_leader(true).await;
        ElectionRole::Leader
    }

    async fn become_leader(&self, degraded: bool) {
        let was_leader = {
            let mut state = self.state.lock();
            state.degraded = degraded;
            state.role == ElectionRole::Leader
        };
        self.set_role(ElectionRole::Leader, Some(self.tab_id.clone()));
        if !was_leader {
            info!(tab_id = %self.tab_id, degraded, "Became leader");
        }
        self.bus.publish(MessageType::LeaderPing, json!({})).await;
    }

    async fn renew(&self, now: Timestamp) {
        let record = LeadershipRecord::new(self.tab_id.clone(), now);
        match self.store.set_json(LEADER_KEY, &record) {
            Ok(()) => self.state.lock().degraded = false,
            Err(e) => {
                debug!(error = %e, "Leadership renewal not persisted");
                self.state.lock().degraded = true;
            }
        }
        self.bus.publish(MessageType::LeaderPing, json!({})).await;
    }

    fn set_role(&self, role: ElectionRole, leader_id: Option<TabId>) {
        {
            let mut state = self.state.lock();
            state.role = role;
            if leader_id.is_some() || role != ElectionRole::Follower {
                state.leader_id = leader_id;
            }
            if role != ElectionRole::Leader {
                state.degraded = false;
            }
        }
        self.role_tx.send_if_modified(|current| {
            if *current == role {
                return false;
            }
            if *current == ElectionRole::Leader {
                info!(tab_id = %self.tab_id, role = %role, "Lost leadership");
            }
            *current = role;
            true
        });
    }
}

/// True if `record` is fresh and held by a tab other than `tab_id`.
fn foreign_holder(record: &LeadershipRecord, tab_id: &TabId, now: Timestamp, staleness: u64) -> bool {
    !record.is_expired(now, staleness) && &record.tab_id != tab_id
}

fn on_election_message(weak: &Weak<ElectorInner>, message: &CoordinationMessage) {
    let Some(inner) = weak.upgrade() else { return };
    if message.is_from(&inner.tab_id) {
        return;
    }

    match message.message_type {
        MessageType::LeaderPing => {
            let now = inner.clock.now_ms();
            inner.state.lock().last_foreign_ping = Some(now);
            inner.set_role(ElectionRole::Follower, Some(message.source_tab_id.clone()));
        }
        MessageType::LeaderElection => {
            if inner.state.lock().role == ElectionRole::Leader {
                debug!(candidate = %message.source_tab_id, "Answering election with ping");
                let bus = inner.bus.clone();
                tokio::spawn(async move {
                    bus.publish(MessageType::LeaderPing, json!({})).await;
                });
            }
        }
        _ => {}
    }
}

impl LeadershipView for LeaderElector {
    fn is_leader(&self) -> bool {
        self.role() == ElectionRole::Leader
    }

    fn leader_id(&self) -> Option<TabId> {
        self.inner.state.lock().leader_id.clone()
    }

    fn watch_role(&self) -> watch::Receiver<ElectionRole> {
        self.inner.role_tx.subscribe()
    }
}
