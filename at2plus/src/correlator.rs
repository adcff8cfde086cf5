//! Ability request correlation
//!
//! The dispatcher drops every decoded ability response into a single-slot
//! mailbox. The correlator sends a request, then waits on that mailbox until
//! a response names exactly the unit it asked for.

use crate::aircon::AcAbility;
use crate::connection::MessageSink;
use crate::error::{ClientError, ClientResult};
use crate::messages::{AcAbilityMessage, RequestAcAbility};
use crate::ClientStats;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Single-slot mailbox between the dispatcher and the correlator
pub fn ability_channel() -> (mpsc::Sender<AcAbilityMessage>, mpsc::Receiver<AcAbilityMessage>) {
    mpsc::channel(1)
}

pub struct AbilityCorrelator {
    sink: Arc<dyn MessageSink>,
    responses: mpsc::Receiver<AcAbilityMessage>,
    stats: Arc<ClientStats>,
}

impl AbilityCorrelator {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        responses: mpsc::Receiver<AcAbilityMessage>,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            sink,
            responses,
            stats,
        }
    }

    /// Request the ability of AC `number` and wait for the matching answer.
    ///
    /// Retries without bound: a response for a different unit (or for more
    /// than one unit) re-issues the request, and so does a reconnect while
    /// the request is outstanding. Callers wanting a deadline wrap this in
    /// `tokio::time::timeout`.
    pub async fn request_ability(&mut self, number: u8) -> ClientResult<AcAbility> {
        let mut generation = self.sink.generation();
        let mut first = true;

        loop {
            if !first {
                self.stats.record(&self.stats.ability_retries);
            }
            first = false;

            while let Ok(stale) = self.responses.try_recv() {
                tracing::debug!(
                    "Discarding unsolicited ability response ({} entries)",
                    stale.abilities.len()
                );
            }
            generation.borrow_and_update();

            if let Err(e) = self.sink.send(&RequestAcAbility::new(number)).await {
                tracing::warn!(
                    "Could not request ability of AC{}: {}; waiting for the connection",
                    number,
                    e
                );
                generation
                    .changed()
                    .await
                    .map_err(|_| ClientError::ChannelClosed("connection generation".into()))?;
                continue;
            }

            let mut response = tokio::select! {
                response = self.responses.recv() => response
                    .ok_or_else(|| ClientError::ChannelClosed("ability responses".into()))?,
                changed = generation.changed() => {
                    changed.map_err(|_| ClientError::ChannelClosed("connection generation".into()))?;
                    tracing::debug!("Connection replaced while waiting for ability of AC{}", number);
                    continue;
                }
            };

            if response.abilities.len() != 1 {
                tracing::warn!(
                    "Expected ability of single requested AC but got {}",
                    response.abilities.len()
                );
                continue;
            }
            let Some(ability) = response.abilities.pop() else {
                continue;
            };
            if ability.number != number {
                tracing::warn!(
                    "Requested ability of AC{} but got AC{}",
                    number,
                    ability.number
                );
                continue;
            }
            return Ok(ability);
        }
    }
}
