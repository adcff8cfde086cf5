//! Connection management
//!
//! Owns the transport lifetime:
//! - Single connect attempts with failure classification (resolution,
//!   transient network, fatal)
//! - Reconnect loop with exponential backoff that settles on a fixed interval
//! - The shared write half used by every outbound message
//! - A connection generation counter so waiters can tell a new connection
//!   replaced the one their request went out on

use crate::client::ClientEvent;
use crate::error::{ClientError, ClientResult};
use crate::messages::{OutboundMessage, RequestAcStatus};
use crate::protocol::encode_frame;
use crate::{ClientConfig, ClientStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Byte stream the client can talk to a console over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Read side of the active connection, owned by the frame reader
pub type TransportReader = ReadHalf<BoxedTransport>;

type TransportWriter = WriteHalf<BoxedTransport>;

/// Why a connect attempt failed
#[derive(Debug)]
pub enum ConnectFailure {
    /// Host name or address could not be resolved
    Resolution(io::Error),
    /// Network or host is down/unreachable; worth retrying
    Transient(io::Error),
    /// Anything else; must reach the caller
    Fatal(io::Error),
}

/// Sort an I/O error from a connect attempt into transient or fatal
pub fn classify_io_error(err: io::Error) -> ConnectFailure {
    match err.kind() {
        io::ErrorKind::HostUnreachable
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::TimedOut
        | io::ErrorKind::NetworkDown
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ConnectFailure::Transient(err),
        _ => ConnectFailure::Fatal(err),
    }
}

/// Opens transports to the console
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Human-readable target, used in logs and errors
    fn target(&self) -> String;

    async fn open(&self) -> Result<BoxedTransport, ConnectFailure>;
}

/// TCP connector used in production
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.host, config.port, config.connect_timeout())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<BoxedTransport, ConnectFailure> {
        let addrs: Vec<_> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(ConnectFailure::Resolution)?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectFailure::Resolution(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.host),
            )));
        }

        let mut last_error = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not set TCP_NODELAY on {}: {}", addr, e);
                    }
                    return Ok(Box::new(stream));
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", addr, self.connect_timeout),
                    ))
                }
            }
        }

        Err(classify_io_error(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no address attempted")
        })))
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Reconnect backoff: `base * growth^attempt` for the first
/// `exponential_attempts` attempts, then a fixed `steady_delay`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub base_delay_ms: u64,
    pub growth_factor: u32,
    pub exponential_attempts: u32,
    pub steady_delay_secs: u64,
    /// Log a "still not responding" notice every this many failed attempts
    pub notice_interval: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1,
            growth_factor: 10,
            exponential_attempts: 4,
            steady_delay_secs: 10,
            notice_interval: 60,
        }
    }
}

impl ReconnectionConfig {
    pub fn steady_delay(&self) -> Duration {
        Duration::from_secs(self.steady_delay_secs)
    }

    /// Delay to wait after the `attempt`-th consecutive failure (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt >= self.exponential_attempts {
            return self.steady_delay();
        }
        let factor = (self.growth_factor as u64).saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor)).min(self.steady_delay())
    }

    /// Whether to log the long-outage notice after `failures` failed attempts
    pub fn should_notify(&self, failures: u32) -> bool {
        failures == self.exponential_attempts
            || (self.notice_interval > 0 && failures > 0 && failures % self.notice_interval == 0)
    }
}

/// Outbound half of the connection as seen by request issuers
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: &dyn OutboundMessage) -> ClientResult<()>;

    /// Watch that ticks every time a new connection is established
    fn generation(&self) -> watch::Receiver<u64>;
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    reconnection: ReconnectionConfig,
    writer: Mutex<Option<TransportWriter>>,
    message_id: AtomicU8,
    state: parking_lot::RwLock<ConnectionState>,
    generation: watch::Sender<u64>,
    stats: Arc<ClientStats>,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        reconnection: ReconnectionConfig,
        stats: Arc<ClientStats>,
        event_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            connector,
            reconnection,
            writer: Mutex::new(None),
            message_id: AtomicU8::new(0),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            generation,
            stats,
            event_tx,
        }
    }

    pub fn target(&self) -> String {
        self.connector.target()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!("Connection state {:?} -> {:?}", previous, state);
            let _ = self.event_tx.send(ClientEvent::ConnectionStateChanged(state));
        }
    }

    /// Make a single connect attempt.
    ///
    /// Returns the read half on success and `None` on resolution or
    /// transient network failures. Any other OS error is returned as
    /// [`ClientError::ConnectionFatal`].
    pub async fn connect(&self) -> ClientResult<Option<TransportReader>> {
        let target = self.connector.target();
        tracing::debug!("Connecting to {}", target);
        if self.state() != ConnectionState::Reconnecting {
            self.set_state(ConnectionState::Connecting);
        }

        let failure = match self.connector.open().await {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                *self.writer.lock().await = Some(writer);
                self.generation.send_modify(|generation| *generation += 1);
                self.set_state(ConnectionState::Connected);
                return Ok(Some(reader));
            }
            Err(failure) => failure,
        };

        if self.state() == ConnectionState::Connecting {
            self.set_state(ConnectionState::Disconnected);
        }
        match failure {
            ConnectFailure::Resolution(e) => {
                tracing::warn!("Could not connect to host {}: address not resolved ({})", target, e);
                Ok(None)
            }
            ConnectFailure::Transient(e) => {
                tracing::warn!("Could not connect to host {}: {}", target, e);
                Ok(None)
            }
            ConnectFailure::Fatal(e) => Err(ClientError::ConnectionFatal { target, source: e }),
        }
    }

    /// Drop the write half of a connection the reader found dead
    pub async fn mark_lost(&self) {
        self.writer.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Retry [`connect`](Self::connect) until it succeeds or `cancel` fires.
    ///
    /// On success the standing status request is re-issued so the session
    /// resumes from a known state. Returns `None` only when cancelled.
    pub async fn reconnect_loop(
        &self,
        cancel: &CancellationToken,
    ) -> ClientResult<Option<TransportReader>> {
        self.set_state(ConnectionState::Reconnecting);
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(reader) = self.connect().await? {
                tracing::info!(
                    "Reconnected to {} after {} failed attempts",
                    self.connector.target(),
                    failures
                );
                let _ = self.event_tx.send(ClientEvent::Reconnected { attempts: failures });
                if let Err(e) = self.send(&RequestAcStatus).await {
                    tracing::warn!("Failed to re-request status after reconnect: {}", e);
                }
                return Ok(Some(reader));
            }

            let delay = self.reconnection.calculate_delay(failures);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = sleep(delay) => {}
            }

            failures = failures.saturating_add(1);
            self.stats.record(&self.stats.reconnect_attempts);
            if self.reconnection.should_notify(failures) {
                tracing::info!(
                    "Server is not responding, will continue trying to reconnect every {:?}",
                    self.reconnection.steady_delay()
                );
            }
        }
    }

    /// Encode and write one message on the current connection
    pub async fn send(&self, message: &dyn OutboundMessage) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
        let message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_frame(message.message_type(), message_id, &message.payload());
        tracing::debug!("Sending {} (id {})", message.name(), message_id);
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Shut the write half down and enter the terminal state
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Error shutting down writer: {}", e);
            }
        }
        self.set_state(ConnectionState::Stopped);
    }
}

#[async_trait]
impl<C: Connector> MessageSink for ConnectionManager<C> {
    async fn send(&self, message: &dyn OutboundMessage) -> ClientResult<()> {
        ConnectionManager::send(self, message).await
    }

    fn generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
