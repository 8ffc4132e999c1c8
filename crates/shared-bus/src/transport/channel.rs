//! # Channel Transport
//!
//! Publish/subscribe over an in-process `tokio::sync::broadcast` hub shared
//! by every tab of one process group. The hub can be closed and reopened to
//! model the channel becoming unavailable.

use super::{Inbound, Transport, TransportConnector, TransportError, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::CoordinationMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default hub capacity.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// A named in-process channel shared by tabs.
#[derive(Debug)]
pub struct ChannelHub {
    name: String,
    sender: broadcast::Sender<CoordinationMessage>,
    open: AtomicBool,
}

impl ChannelHub {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_capacity(name, DEFAULT_HUB_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            name: name.into(),
            sender,
            open: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Refuse new connections and sends until `reopen`.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of connected tabs.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Connects tabs to a `ChannelHub`. Without a hub the channel is
/// unavailable in this environment.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    hub: Option<Arc<ChannelHub>>,
}

impl ChannelConnector {
    #[must_use]
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self { hub: Some(hub) }
    }

    /// A connector for an environment without channel support.
    #[must_use]
    pub fn unsupported() -> Self {
        Self { hub: None }
    }
}

#[async_trait]
impl TransportConnector for ChannelConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Channel
    }

    async fn connect(&self, inbound: Inbound) -> Result<Arc<dyn Transport>, TransportError> {
        let hub = match &self.hub {
            Some(hub) if hub.is_open() => Arc::clone(hub),
            _ => return Err(TransportError::Unavailable(TransportKind::Channel)),
        };

        let mut receiver = hub.sender.subscribe();
        let closed = Arc::new(AtomicBool::new(false));
        let task_closed = Arc::clone(&closed);
        let hub_name = hub.name.clone();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if task_closed.load(Ordering::SeqCst) {
                            break;
                        }
                        if inbound.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!(hub = %hub_name, lagged = count, "Channel receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(hub = %hub_name, "Channel receiver stopped");
        });

        Ok(Arc::new(ChannelTransport {
            hub,
            closed,
            task: Mutex::new(Some(task)),
        }))
    }
}

struct ChannelTransport {
    hub: Arc<ChannelHub>,
    closed: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTransport {
    fn check(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || !self.hub.is_open() {
            return Err(TransportError::Disconnected(TransportKind::Channel));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Channel
    }

    async fn send(&self, message: &CoordinationMessage) -> Result<(), TransportError> {
        self.check()?;
        // Our own receiver keeps the channel alive, so a send error means
        // the hub is gone.
        self.hub
            .sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| TransportError::Disconnected(TransportKind::Channel))
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.check()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
