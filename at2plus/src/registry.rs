//! Status handler and device registry
//!
//! Runs as its own task fed by the dispatcher. Known units get their status
//! replaced in place; an unseen unit is first queried for its ability through
//! the correlator, then registered and announced.

use crate::aircon::{AcStatus, Aircon};
use crate::callbacks::{CallbackHandle, CallbackList};
use crate::client::ClientEvent;
use crate::correlator::AbilityCorrelator;
use crate::error::ClientResult;
use crate::messages::AcStatusMessage;
use crate::ClientStats;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<u8, Aircon>>>,
    new_device_callbacks: CallbackList<Aircon>,
    event_tx: broadcast::Sender<ClientEvent>,
    stats: Arc<ClientStats>,
}

impl DeviceRegistry {
    pub fn new(event_tx: broadcast::Sender<ClientEvent>, stats: Arc<ClientStats>) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            new_device_callbacks: CallbackList::new(),
            event_tx,
            stats,
        }
    }

    /// All registered units ordered by AC number
    pub fn aircons(&self) -> Vec<Aircon> {
        let mut aircons: Vec<Aircon> = self.devices.read().values().cloned().collect();
        aircons.sort_by_key(Aircon::id);
        aircons
    }

    pub fn aircon(&self, id: u8) -> Option<Aircon> {
        self.devices.read().get(&id).cloned()
    }

    pub fn add_new_device_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&Aircon) + Send + Sync + 'static,
    {
        self.new_device_callbacks.add(callback)
    }

    /// Subscribe to status changes of a registered unit. `None` if the unit
    /// has not been discovered yet.
    pub fn add_device_callback<F>(&self, id: u8, callback: F) -> Option<CallbackHandle>
    where
        F: Fn(&AcStatus) + Send + Sync + 'static,
    {
        self.aircon(id).map(|aircon| aircon.add_callback(callback))
    }

    /// Apply one status batch, discovering unseen units on the way
    pub async fn handle_status_message(
        &self,
        message: AcStatusMessage,
        correlator: &mut AbilityCorrelator,
    ) -> ClientResult<()> {
        for status in message.statuses {
            let id = status.id;
            let known = self.aircon(id);
            match known {
                Some(aircon) => {
                    aircon.update_status(status);
                    let _ = self.event_tx.send(ClientEvent::StatusUpdated(id));
                }
                None => {
                    tracing::debug!("Status for unknown AC{}, requesting its ability", id);
                    let ability = correlator.request_ability(id).await?;
                    let aircon = Aircon::new(ability, status);
                    self.devices.write().insert(id, aircon.clone());
                    tracing::info!("Discovered AC{} ({})", id, aircon.name());
                    self.new_device_callbacks.notify(&aircon);
                    let _ = self.event_tx.send(ClientEvent::DeviceDiscovered(id));
                }
            }
        }
        Ok(())
    }

    /// Drain status batches until cancelled or the dispatcher goes away
    pub async fn run(
        self,
        mut correlator: AbilityCorrelator,
        mut status_rx: mpsc::UnboundedReceiver<AcStatusMessage>,
        cancel: CancellationToken,
    ) -> ClientResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = status_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.stats.release(&self.stats.queued_status_batches);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.handle_status_message(message, &mut correlator) => result?,
            }
        }
        tracing::debug!("Status handler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::ability_channel;
    use crate::messages::AcAbilityMessage;
    use crate::testing::{recv_within, sample_ability, sample_status, RecordingSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_discovery_then_update() {
        let (event_tx, mut events) = broadcast::channel(16);
        let registry = DeviceRegistry::new(event_tx, Arc::new(ClientStats::default()));
        let (sink, mut sent) = RecordingSink::new();
        let (ability_tx, ability_rx) = ability_channel();
        let correlator = AbilityCorrelator::new(sink, ability_rx, Arc::new(ClientStats::default()));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registry.clone().run(correlator, status_rx, cancel.clone()));

        let discovered = Arc::new(AtomicUsize::new(0));
        let counter = discovered.clone();
        registry.add_new_device_callback(move |aircon| {
            assert_eq!(aircon.id(), 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        status_tx
            .send(AcStatusMessage {
                statuses: vec![sample_status(3)],
            })
            .unwrap();
        assert_eq!(recv_within(&mut sent).await, 3);
        assert!(registry.aircon(3).is_none());
        ability_tx
            .send(AcAbilityMessage {
                abilities: vec![sample_ability(3)],
            })
            .await
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), ClientEvent::DeviceDiscovered(3)));
        assert_eq!(discovered.load(Ordering::SeqCst), 1);
        let aircon = registry.aircon(3).unwrap();
        assert_eq!(aircon.ability(), &sample_ability(3));
        assert_eq!(aircon.status(), sample_status(3));

        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        let handle = registry
            .add_device_callback(3, move |status| {
                assert_eq!(status.setpoint, 18);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let mut changed = sample_status(3);
        changed.setpoint = 18;
        status_tx
            .send(AcStatusMessage {
                statuses: vec![changed],
            })
            .unwrap();
        assert!(matches!(events.recv().await.unwrap(), ClientEvent::StatusUpdated(3)));
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(discovered.load(Ordering::SeqCst), 1);
        assert_eq!(aircon.status().setpoint, 18);
        assert!(sent.try_recv().is_err());

        handle.remove();
        handle.remove();
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_device_callback() {
        let (event_tx, _) = broadcast::channel(4);
        let registry = DeviceRegistry::new(event_tx, Arc::new(ClientStats::default()));
        assert!(registry.add_device_callback(9, |_| {}).is_none());
        assert!(registry.aircons().is_empty());
    }

    #[tokio::test]
    async fn test_aircons_sorted() {
        let (event_tx, _) = broadcast::channel(16);
        let registry = DeviceRegistry::new(event_tx, Arc::new(ClientStats::default()));
        for id in [4u8, 1, 2] {
            registry
                .devices
                .write()
                .insert(id, Aircon::new(sample_ability(id), sample_status(id)));
        }
        let ids: Vec<u8> = registry.aircons().iter().map(Aircon::id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_cancel_while_ability_pending() {
        let (event_tx, _) = broadcast::channel(16);
        let registry = DeviceRegistry::new(event_tx, Arc::new(ClientStats::default()));
        let (sink, mut sent) = RecordingSink::new();
        let (_ability_tx, ability_rx) = ability_channel();
        let correlator = AbilityCorrelator::new(sink, ability_rx, Arc::new(ClientStats::default()));
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(registry.clone().run(correlator, status_rx, cancel.clone()));

        status_tx
            .send(AcStatusMessage {
                statuses: vec![sample_status(0)],
            })
            .unwrap();
        assert_eq!(recv_within(&mut sent).await, 0);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(registry.aircons().is_empty());
    }
}
