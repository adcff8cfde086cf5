//! AirTouch 2+ Protocol Client
//!
//! Talks to an AirTouch 2+ console over its binary TCP protocol.
//!
//! ## Features
//!
//! - CRC-16/MODBUS validated framing with header resynchronisation
//! - Automatic reconnection with exponential backoff settling at 10 s
//! - Single read loop routing frames to a status handler and an ability
//!   correlator over channels
//! - AC discovery: unseen units are queried for their ability record before
//!   being registered and announced to subscribers
//! - Per-unit status callbacks with idempotent removal
//! - Optional raw frame dump for offline inspection

mod aircon;
mod callbacks;
mod checksum;
mod client;
mod connection;
mod correlator;
mod error;
mod frame;
mod messages;
mod protocol;
mod registry;

#[cfg(test)]
mod testing;

pub use aircon::{AcAbility, AcFanSpeed, AcMode, AcPowerState, AcStatus, Aircon};
pub use callbacks::CallbackHandle;
pub use checksum::{checksum, CHECKSUM_LENGTH};
pub use client::*;
pub use connection::{
    classify_io_error, BoxedTransport, ConnectFailure, ConnectionState, Connector,
    ReconnectionConfig, TcpConnector, Transport,
};
pub use error::{ClientError, ClientResult, DecodeError};
pub use messages::{
    AcAbilityMessage, AcStatusMessage, OutboundMessage, RequestAcAbility, RequestAcStatus,
};
pub use protocol::{
    ControlStatusSubHeader, ControlStatusSubType, ExtendedSubHeader, ExtendedSubType, Header,
    Message, MessageType, HEADER_LENGTH,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default AirTouch 2+ console port
pub const AT2PLUS_DEFAULT_PORT: u16 = 9200;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Timeout for a single TCP connect attempt (default: 10 seconds)
    pub connect_timeout_secs: u64,
    pub reconnection: ReconnectionConfig,
    pub dump: DumpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: AT2PLUS_DEFAULT_PORT,
            connect_timeout_secs: 10,
            reconnection: ReconnectionConfig::default(),
            dump: DumpConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(AT2PLUS_DEFAULT_PORT),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Raw frame dump settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Write every validated frame to `message_<timestamp>.dump`
    pub enabled: bool,
    /// Directory for dump files (default: working directory)
    pub directory: PathBuf,
}

/// Running counters for diagnosing a session
#[derive(Debug, Default)]
pub struct ClientStats {
    pub(crate) frames_received: AtomicU64,
    pub(crate) checksum_failures: AtomicU64,
    pub(crate) malformed_headers: AtomicU64,
    pub(crate) unhandled_messages: AtomicU64,
    pub(crate) reconnect_attempts: AtomicU64,
    pub(crate) ability_retries: AtomicU64,
    pub(crate) queued_status_batches: AtomicU64,
}

impl ClientStats {
    pub(crate) fn record(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero
    pub(crate) fn release(&self, gauge: &AtomicU64) {
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |value| {
            Some(value.saturating_sub(1))
        });
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            malformed_headers: self.malformed_headers.load(Ordering::Relaxed),
            unhandled_messages: self.unhandled_messages.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            ability_retries: self.ability_retries.load(Ordering::Relaxed),
            queued_status_batches: self.queued_status_batches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub checksum_failures: u64,
    pub malformed_headers: u64,
    pub unhandled_messages: u64,
    /// Failed reconnect attempts across every outage
    pub reconnect_attempts: u64,
    /// Ability requests re-issued after a missing or mismatched answer
    pub ability_retries: u64,
    /// Status batches routed but not yet applied, e.g. while a discovery
    /// waits for its ability answer
    pub queued_status_batches: u64,
}
