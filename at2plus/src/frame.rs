//! Frame reader
//!
//! Pulls exact byte counts off the active transport and assembles them into
//! checksum-validated [`Message`]s. A short read means the connection is gone:
//! the reader hands over to the connection manager's reconnect loop and
//! reports "no message" so the caller simply asks again.

use crate::checksum::CHECKSUM_LENGTH;
use crate::connection::{ConnectionManager, Connector, TransportReader};
use crate::error::ClientResult;
use crate::protocol::{frame_checksum, Header, Message, HEADER_LENGTH};
use crate::{ClientStats, DumpConfig};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Writes validated frames to timestamped files
#[derive(Debug, Clone)]
pub struct FrameDump {
    directory: PathBuf,
    /// Keeps names unique when frames land in the same millisecond
    sequence: u64,
}

impl FrameDump {
    pub fn from_config(config: &DumpConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            directory: config.directory.clone(),
            sequence: 0,
        })
    }

    /// Best-effort write on a detached task; failures are only logged
    pub fn write(&mut self, header: &[u8], payload: &[u8], checksum: &[u8]) -> JoinHandle<()> {
        let name = format!(
            "message_{}_{:06}.dump",
            chrono::Local::now().format("%m-%d-%Y_%H-%M-%S%.3f"),
            self.sequence
        );
        self.sequence = self.sequence.wrapping_add(1);
        let path = self.directory.join(name);
        let frame = [header, payload, checksum].concat();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::write(&path, &frame).await {
                tracing::warn!("Failed to dump frame to {}: {}", path.display(), e);
            }
        })
    }
}

pub struct FrameReader<C: Connector> {
    reader: Option<TransportReader>,
    connection: Arc<ConnectionManager<C>>,
    dump: Option<FrameDump>,
    stats: Arc<ClientStats>,
    cancel: CancellationToken,
}

impl<C: Connector> FrameReader<C> {
    pub fn new(
        reader: TransportReader,
        connection: Arc<ConnectionManager<C>>,
        dump: Option<FrameDump>,
        stats: Arc<ClientStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader: Some(reader),
            connection,
            dump,
            stats,
            cancel,
        }
    }

    /// Read exactly `size` bytes.
    ///
    /// `Ok(None)` means the connection was lost; by the time this returns the
    /// reconnect loop has already produced a replacement (or been cancelled)
    /// and the caller must redo its read.
    pub async fn read_exact(&mut self, size: usize) -> ClientResult<Option<Vec<u8>>> {
        if let Some(reader) = self.reader.as_mut() {
            let mut buf = vec![0u8; size];
            match reader.read_exact(&mut buf).await {
                Ok(_) => return Ok(Some(buf)),
                Err(e) => tracing::debug!("Read of {} bytes failed: {}", size, e),
            }
        }

        tracing::warn!("Connection lost, reconnecting");
        self.reader = None;
        self.connection.mark_lost().await;
        self.reader = self.connection.reconnect_loop(&self.cancel).await?;
        Ok(None)
    }

    /// Read until a valid header arrives. Bytes that do not form a header
    /// are discarded and the read is retried. `Ok(None)` once the
    /// connection is lost; the replacement is already in place.
    pub async fn read_header(&mut self) -> ClientResult<Option<(Header, [u8; HEADER_LENGTH])>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let Some(bytes) = self.read_exact(HEADER_LENGTH).await? else {
                tracing::debug!("Interrupted while reading header");
                return Ok(None);
            };
            let Ok(bytes) = <[u8; HEADER_LENGTH]>::try_from(bytes) else {
                continue;
            };
            match Header::from_bytes(&bytes) {
                Ok(header) => return Ok(Some((header, bytes))),
                Err(e) => {
                    self.stats.record(&self.stats.malformed_headers);
                    tracing::debug!("Failed reading header, trying again: {}", e);
                }
            }
        }
    }

    /// Read one frame. `Ok(None)` when the frame was dropped (checksum
    /// mismatch) or interrupted by a connection loss at any step.
    pub async fn read_message(&mut self) -> ClientResult<Option<Message>> {
        let Some((header, header_bytes)) = self.read_header().await? else {
            return Ok(None);
        };
        let Some(payload) = self.read_exact(header.data_length as usize).await? else {
            tracing::debug!("Interrupted while reading {} payload bytes", header.data_length);
            return Ok(None);
        };
        let Some(checksum) = self.read_exact(CHECKSUM_LENGTH).await? else {
            tracing::debug!("Interrupted while reading checksum");
            return Ok(None);
        };

        let expected = frame_checksum(&header_bytes, &payload);
        if checksum[..] != expected[..] {
            self.stats.record(&self.stats.checksum_failures);
            tracing::warn!(
                "Checksum mismatch (got {:02x?}, expected {:02x?}), ignoring message",
                checksum,
                expected
            );
            return Ok(None);
        }

        self.stats.record(&self.stats.frames_received);
        if let Some(dump) = self.dump.as_mut() {
            dump.write(&header_bytes, &payload, &checksum);
        }

        Ok(Some(Message {
            header,
            payload: Bytes::from(payload),
        }))
    }
}
