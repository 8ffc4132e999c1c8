//! # Transports
//!
//! A transport moves serialized `CoordinationMessage`s between tabs. The
//! bus sends over one active transport, keeping the storage transport
//! attached underneath it; inbound messages are pushed into the channel
//! handed to `TransportConnector::connect`.

pub mod broker;
pub mod channel;
pub mod storage;

use async_trait::async_trait;
use shared_store::StoreError;
use shared_types::CoordinationMessage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sink for messages received by a transport.
pub type Inbound = mpsc::UnboundedSender<CoordinationMessage>;

/// Transport kinds, best first. `Ord` follows the rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportKind {
    /// Out-of-process broker over TCP.
    Broker,
    /// In-process publish/subscribe hub.
    Channel,
    /// Shared-store polling.
    Storage,
}

impl TransportKind {
    /// Rank of the transport; 0 is best.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Broker => 0,
            Self::Channel => 1,
            Self::Storage => 2,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Channel => "channel",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport cannot be used in this environment.
    #[error("{0} transport unavailable")]
    Unavailable(TransportKind),

    /// The transport was connected but has since gone away.
    #[error("{0} transport disconnected")]
    Disconnected(TransportKind),

    #[error("connect to {kind} timed out")]
    ConnectTimeout { kind: TransportKind },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A connected transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Deliver a message to every other tab on this transport.
    async fn send(&self, message: &CoordinationMessage) -> Result<(), TransportError>;

    /// Check the transport is still usable.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Tear down. Idempotent; no inbound messages are delivered afterwards.
    async fn close(&self);
}

/// Factory for a transport of one kind.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Connect and start forwarding inbound messages into `inbound`.
    async fn connect(&self, inbound: Inbound) -> Result<Arc<dyn Transport>, TransportError>;
}
