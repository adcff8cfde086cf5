//! AirTouch 2+ client implementation
//!
//! This module wires the components into a session:
//! - A dispatcher task that owns the frame reader and routes every decoded
//!   message without ever waiting on a consumer
//! - A status handler task that owns the device registry side and the
//!   ability correlator
//! - A connect/run/stop lifecycle with cooperative cancellation
//! - A broadcast event stream for connection and device changes

use crate::aircon::{AcStatus, Aircon};
use crate::callbacks::CallbackHandle;
use crate::connection::{
    ConnectionManager, ConnectionState, Connector, MessageSink, TcpConnector, TransportReader,
};
use crate::correlator::{ability_channel, AbilityCorrelator};
use crate::error::{ClientError, ClientResult};
use crate::frame::{FrameDump, FrameReader};
use crate::messages::{AcAbilityMessage, AcStatusMessage, OutboundMessage, RequestAcStatus};
use crate::protocol::{
    ControlStatusSubHeader, ControlStatusSubType, ExtendedSubHeader, ExtendedSubType, Message,
    MessageType,
};
use crate::registry::DeviceRegistry;
use crate::{ClientConfig, ClientStats, StatsSnapshot};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// AirTouch 2+ client event
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection state changed
    ConnectionStateChanged(ConnectionState),
    /// A unit was seen for the first time and registered
    DeviceDiscovered(u8),
    /// Status of a registered unit was replaced
    StatusUpdated(u8),
    /// Connection re-established after a loss
    Reconnected { attempts: u32 },
}

/// Routes decoded messages to their consumers.
///
/// Routing never awaits: statuses go to an unbounded queue (its depth is
/// tracked in [`ClientStats`]) and ability responses to a single-slot
/// mailbox that drops when occupied.
pub struct MessageDispatcher {
    status_tx: mpsc::UnboundedSender<AcStatusMessage>,
    ability_tx: mpsc::Sender<AcAbilityMessage>,
    stats: Arc<ClientStats>,
}

impl MessageDispatcher {
    pub fn new(
        status_tx: mpsc::UnboundedSender<AcStatusMessage>,
        ability_tx: mpsc::Sender<AcAbilityMessage>,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            status_tx,
            ability_tx,
            stats,
        }
    }

    pub fn route(&self, message: Message) {
        let Message { header, mut payload } = message;
        match header.message_type {
            MessageType::ControlStatus => {
                let subheader = match ControlStatusSubHeader::from_buffer(&mut payload) {
                    Ok(subheader) => subheader,
                    Err(e) => {
                        tracing::warn!("Failed to parse control/status sub-header: {}", e);
                        return;
                    }
                };
                match subheader.sub_type {
                    ControlStatusSubType::AcStatus => {
                        match AcStatusMessage::decode(&subheader, payload) {
                            Ok(statuses) => {
                                // counted before the send so the handler never releases first
                                self.stats.record(&self.stats.queued_status_batches);
                                if self.status_tx.send(statuses).is_err() {
                                    self.stats.release(&self.stats.queued_status_batches);
                                    tracing::debug!("Status handler gone, dropping AC status");
                                }
                            }
                            Err(e) => tracing::warn!("Failed to decode AC status: {}", e),
                        }
                    }
                    other => self.unhandled(other),
                }
            }
            MessageType::Extended => {
                let subheader = match ExtendedSubHeader::from_buffer(&mut payload) {
                    Ok(subheader) => subheader,
                    Err(e) => {
                        tracing::warn!("Failed to parse extended sub-header: {}", e);
                        return;
                    }
                };
                match subheader.sub_type {
                    ExtendedSubType::Ability => match AcAbilityMessage::decode(payload) {
                        Ok(abilities) => self.deliver_ability(abilities),
                        Err(e) => {
                            // an empty batch makes the waiting request go out again
                            tracing::warn!("Failed to decode AC ability: {}", e);
                            self.deliver_ability(AcAbilityMessage::default());
                        }
                    },
                    other => self.unhandled(other),
                }
            }
            other => self.unhandled(other),
        }
    }

    fn deliver_ability(&self, abilities: AcAbilityMessage) {
        match self.ability_tx.try_send(abilities) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Ability mailbox occupied, dropping response");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Ability correlator gone, dropping response");
            }
        }
    }

    fn unhandled(&self, kind: impl std::fmt::Debug) {
        self.stats.record(&self.stats.unhandled_messages);
        tracing::warn!("Unhandled message type: {:?}", kind);
    }
}

/// The read loop. Ends on cancellation or a fatal connection error, in
/// which case the whole session is cancelled.
async fn dispatch_loop<C: Connector>(
    mut reader: FrameReader<C>,
    dispatcher: MessageDispatcher,
    cancel: CancellationToken,
) -> ClientResult<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = reader.read_message() => next,
        };
        match next {
            Ok(Some(message)) => dispatcher.route(message),
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("Read loop stopped: {}", e);
                cancel.cancel();
                return Err(e);
            }
        }
    }
    tracing::debug!("Dispatcher stopped");
    Ok(())
}

struct ClientTasks {
    cancel: CancellationToken,
    dispatcher: JoinHandle<ClientResult<()>>,
    status_handler: JoinHandle<ClientResult<()>>,
}

fn join_result(result: Result<ClientResult<()>, JoinError>) -> ClientResult<()> {
    match result {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ClientError::TaskFailed(e.to_string())),
    }
}

/// AirTouch 2+ client for one console
pub struct At2PlusClient<C: Connector = TcpConnector> {
    config: ClientConfig,
    connection: Arc<ConnectionManager<C>>,
    registry: DeviceRegistry,
    stats: Arc<ClientStats>,
    event_tx: broadcast::Sender<ClientEvent>,
    /// Read half from `connect()`, handed to the dispatcher by `run()`
    pending_reader: Option<TransportReader>,
    tasks: Option<ClientTasks>,
    span: tracing::Span,
}

impl At2PlusClient<TcpConnector> {
    /// Create a new client for `host`, on the default port unless given
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self::with_config(ClientConfig::new(host, port))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> At2PlusClient<C> {
    /// Create a client that opens its transport through `connector`
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let stats = Arc::new(ClientStats::default());
        let connection = Arc::new(ConnectionManager::new(
            connector,
            config.reconnection.clone(),
            stats.clone(),
            event_tx.clone(),
        ));
        let span = tracing::info_span!("at2plus", host = %config.host, port = config.port);
        Self {
            registry: DeviceRegistry::new(event_tx.clone(), stats.clone()),
            config,
            connection,
            stats,
            event_tx,
            pending_reader: None,
            tasks: None,
            span,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Make a single connect attempt.
    ///
    /// `Ok(false)` for resolution and transient network failures; other OS
    /// errors are returned as [`ClientError::ConnectionFatal`].
    pub async fn connect(&mut self) -> ClientResult<bool> {
        if self.tasks.is_some() {
            return Err(ClientError::AlreadyRunning);
        }
        let reader = self.connection.connect().instrument(self.span.clone()).await?;
        match reader {
            Some(reader) => {
                self.span.in_scope(|| {
                    tracing::info!("Connected to AirTouch 2+ console {}", self.connection.target())
                });
                self.pending_reader = Some(reader);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Start the read loop and status handler, then request current status
    pub async fn run(&mut self) -> ClientResult<()> {
        if self.tasks.is_some() {
            return Err(ClientError::AlreadyRunning);
        }
        let reader = self.pending_reader.take().ok_or(ClientError::NotConnected)?;

        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ability_tx, ability_rx) = ability_channel();

        let sink: Arc<dyn MessageSink> = self.connection.clone();
        let correlator = AbilityCorrelator::new(sink, ability_rx, self.stats.clone());
        let status_handler = tokio::spawn(
            self.registry
                .clone()
                .run(correlator, status_rx, cancel.clone())
                .instrument(self.span.clone()),
        );

        let frame_reader = FrameReader::new(
            reader,
            self.connection.clone(),
            FrameDump::from_config(&self.config.dump),
            self.stats.clone(),
            cancel.clone(),
        );
        let dispatcher = MessageDispatcher::new(status_tx, ability_tx, self.stats.clone());
        let dispatcher = tokio::spawn(
            dispatch_loop(frame_reader, dispatcher, cancel.clone()).instrument(self.span.clone()),
        );

        self.tasks = Some(ClientTasks {
            cancel,
            dispatcher,
            status_handler,
        });

        // a dead connection here is picked up by the reader, which re-requests on reconnect
        if let Err(e) = self.send(&RequestAcStatus).await {
            self.span
                .in_scope(|| tracing::warn!("Initial status request failed: {}", e));
        }
        Ok(())
    }

    /// Cancel both tasks, wait for them and close the connection
    pub async fn stop(&mut self) -> ClientResult<()> {
        let tasks = self.tasks.take().ok_or(ClientError::NotRunning)?;
        tasks.cancel.cancel();

        let dispatcher = join_result(tasks.dispatcher.await);
        let status_handler = join_result(tasks.status_handler.await);
        self.connection.close().instrument(self.span.clone()).await;
        self.span.in_scope(|| tracing::info!("Client stopped"));

        dispatcher.and(status_handler)
    }

    /// Whether the read loop is still alive
    pub fn is_running(&self) -> bool {
        self.tasks
            .as_ref()
            .is_some_and(|tasks| !tasks.dispatcher.is_finished())
    }

    pub async fn send(&self, message: &dyn OutboundMessage) -> ClientResult<()> {
        self.connection
            .send(message)
            .instrument(self.span.clone())
            .await
    }

    pub fn add_new_device_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&Aircon) + Send + Sync + 'static,
    {
        self.registry.add_new_device_callback(callback)
    }

    pub fn add_device_callback<F>(&self, id: u8, callback: F) -> Option<CallbackHandle>
    where
        F: Fn(&AcStatus) + Send + Sync + 'static,
    {
        self.registry.add_device_callback(id, callback)
    }

    pub fn aircons(&self) -> Vec<Aircon> {
        self.registry.aircons()
    }

    pub fn aircon(&self, id: u8) -> Option<Aircon> {
        self.registry.aircon(id)
    }
}

impl Default for At2PlusClient<TcpConnector> {
    fn default() -> Self {
        Self::new("localhost", None)
    }
}

impl<C: Connector> Drop for At2PlusClient<C> {
    fn drop(&mut self) {
        if let Some(tasks) = &self.tasks {
            tasks.cancel.cancel();
        }
    }
}
