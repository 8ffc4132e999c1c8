//! Leader-only session heartbeat.

use parking_lot::Mutex;
use shared_types::SessionApi;
use std::sync::Arc;
use std::time::Duration;
use tc_03_leader_election::LeadershipView;
use tc_04_token_refresh::RefreshTrigger;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct HeartbeatConfig {
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Not the leader.
    Skipped,
    Ok,
    /// 401; a refresh was attempted.
    Unauthorized { refreshed: bool },
    Failed,
}

/// Keeps the server-side session alive on behalf of every tab.
#[derive(Clone)]
pub struct SessionHeartbeat {
    inner: Arc<HeartbeatInner>,
}

struct HeartbeatInner {
    config: HeartbeatConfig,
    api: Arc<dyn SessionApi>,
    refresh: Arc<dyn RefreshTrigger>,
    leadership: Arc<dyn LeadershipView>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHeartbeat {
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        api: Arc<dyn SessionApi>,
        refresh: Arc<dyn RefreshTrigger>,
        leadership: Arc<dyn LeadershipView>,
    ) -> Self {
        Self {
            inner: Arc::new(HeartbeatInner {
                config,
                api,
                refresh,
                leadership,
                task: Mutex::new(None),
            }),
        }
    }

    pub async fn beat_once(&self) -> HeartbeatOutcome {
        let inner = &self.inner;
        if !inner.leadership.is_leader() {
            return HeartbeatOutcome::Skipped;
        }
        let ctx = inner.refresh.request_context();
        match inner.api.heartbeat(&ctx).await {
            Ok(()) => {
                debug!("Session heartbeat ok");
                HeartbeatOutcome::Ok
            }
            Err(e) if e.is_unauthorized() => {
                info!("Heartbeat unauthorized; refreshing");
                let refreshed = inner.refresh.refresh().await;
                HeartbeatOutcome::Unauthorized { refreshed }
            }
            Err(e) => {
                warn!(error = %e, "Session heartbeat failed");
                HeartbeatOutcome::Failed
            }
        }
    }

    pub fn start(&self) {
        let heartbeat = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat.inner.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                heartbeat.beat_once().await;
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
