//! # Broker Transport
//!
//! One persistent TCP connection per tab to a broker process that relays
//! every frame to all other connected tabs.
//!
//! ## Wire Format
//!
//! Newline-delimited JSON frames:
//!
//! ```text
//! {"kind":"message","message":{"type":"leader:ping",...}}
//! {"kind":"ping"}
//! ```
//!
//! Pings are consumed by the broker and never relayed. A frame longer than
//! `MAX_FRAME_BYTES` closes the connection on either side.

use super::{Inbound, Transport, TransportConnector, TransportError, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_types::CoordinationMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest accepted frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

fn frame_reader<R>(read_half: R) -> FramedRead<R, LinesCodec>
where
    R: tokio::io::AsyncRead,
{
    FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
}

/// Frames exchanged with the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BrokerFrame {
    Message { message: CoordinationMessage },
    Ping,
}

impl BrokerFrame {
    fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Connects to a broker at a fixed address.
#[derive(Debug, Clone)]
pub struct BrokerConnector {
    addr: String,
    connect_timeout: Duration,
}

impl BrokerConnector {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl TransportConnector for BrokerConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Broker
    }

    async fn connect(&self, inbound: Inbound) -> Result<Arc<dyn Transport>, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                kind: TransportKind::Broker,
            })??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = Arc::clone(&alive);
        let addr = self.addr.clone();

        let reader = tokio::spawn(async move {
            let mut frames = frame_reader(read_half);
            loop {
                match frames.next().await {
                    Some(Ok(line)) => match serde_json::from_str::<BrokerFrame>(&line) {
                        Ok(BrokerFrame::Message { message }) => {
                            if inbound.send(message).is_err() {
                                break;
                            }
                        }
                        Ok(BrokerFrame::Ping) => {}
                        Err(e) => debug!(error = %e, "Dropping malformed broker frame"),
                    },
                    None => {
                        warn!(broker = %addr, "Broker closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(broker = %addr, error = %e, "Broker read failed");
                        break;
                    }
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
        });

        info!(broker = %self.addr, "Connected to broker");
        Ok(Arc::new(BrokerTransport {
            writer: tokio::sync::Mutex::new(Some(write_half)),
            alive,
            reader: Mutex::new(Some(reader)),
        }))
    }
}

struct BrokerTransport {
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    alive: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerTransport {
    async fn write_frame(&self, frame: &BrokerFrame) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected(TransportKind::Broker));
        }
        let line = frame.encode()?;
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::Disconnected(TransportKind::Broker));
        };
        if let Err(e) = stream.write_all(&line).await {
            self.alive.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broker
    }

    async fn send(&self, message: &CoordinationMessage) -> Result<(), TransportError> {
        self.write_frame(&BrokerFrame::Message {
            message: message.clone(),
        })
        .await
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.write_frame(&BrokerFrame::Ping).await
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}

impl Drop for BrokerTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

// =============================================================================
// BROKER SERVER
// =============================================================================

/// Relay frame tagged with the originating connection.
type Relay = (u64, Arc<str>);

/// Broker process: relays message frames from each connection to all others.
pub struct BrokerServer {
    listener: TcpListener,
    relay: broadcast::Sender<Relay>,
    next_connection_id: AtomicU64,
}

impl BrokerServer {
    /// Relay buffer per connection.
    pub const RELAY_CAPACITY: usize = 1024;

    /// Bind to `addr`.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (relay, _) = broadcast::channel(Self::RELAY_CAPACITY);
        Ok(Self {
            listener,
            relay,
            next_connection_id: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                        debug!(connection = id, peer = %peer, "Tab connected to broker");
                        connections.retain(|handle| !handle.is_finished());
                        connections.push(tokio::spawn(serve_connection(
                            id,
                            stream,
                            self.relay.clone(),
                        )));
                    }
                    Err(e) => warn!(error = %e, "Broker accept failed"),
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        for handle in connections {
            handle.abort();
        }
        info!("Broker stopped");
    }
}

async fn serve_connection(id: u64, stream: TcpStream, relay: broadcast::Sender<Relay>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = frame_reader(read_half);
    let mut outbound = relay.subscribe();

    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(line)) => match serde_json::from_str::<BrokerFrame>(&line) {
                    Ok(BrokerFrame::Message { .. }) => {
                        let _ = relay.send((id, Arc::from(line)));
                    }
                    Ok(BrokerFrame::Ping) => {}
                    Err(e) => debug!(connection = id, error = %e, "Malformed frame"),
                },
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(connection = id, limit = MAX_FRAME_BYTES, "Frame too long; dropping connection");
                    break;
                }
                Some(Err(_)) | None => break,
            },
            relayed = outbound.recv() => match relayed {
                Ok((origin, line)) if origin != id => {
                    let mut buf = line.as_bytes().to_vec();
                    buf.push(b'\n');
                    if write_half.write_all(&buf).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(connection = id, lagged = count, "Broker connection lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!(connection = id, "Tab disconnected from broker");
}
