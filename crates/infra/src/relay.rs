//! Cross-instance relay between a process-local [`SyncHub`] and an [`EventBus`].
//!
//! - Outbound: events this instance produced (origin == local instance id) are
//!   forwarded to the bus, one hub subscription per relayed entity type.
//! - Inbound: a worker thread reads the bus and re-publishes events from other
//!   instances into the local hub, where they get a local sequence.
//!
//! Re-published events keep their remote origin, so they are never forwarded
//! back out. Hub subscribers (including the stats cache invalidator) therefore
//! see writes from every instance.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use lotsync_events::{CallbackHandler, EntityType, EventBus, HubError, MutationEvent, Subscription, SubscriptionHandle, SyncHub};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("hub has no instance id; build it with SyncHub::for_instance")]
    NoInstanceId,

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("failed to spawn relay worker: {0}")]
    Spawn(String),
}

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

/// Run `handler` for every message of `sub` on a named thread until shutdown
/// or until the subscription disconnects.
pub fn spawn_worker<M, H, E>(name: impl Into<String>, sub: Subscription<M>, mut handler: H) -> Result<WorkerHandle, RelayError>
where
    M: Send + 'static,
    H: FnMut(M) -> Result<(), E> + Send + 'static,
    E: core::fmt::Display + Send + 'static,
{
    let name = name.into();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let worker_name = name.clone();
    let join = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let tick = Duration::from_millis(250);
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                match sub.recv_timeout(tick) {
                    Ok(msg) => {
                        if let Err(err) = handler(msg) {
                            warn!(worker = %worker_name, error = %err, "worker handler failed");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(worker = %worker_name, "worker stopped");
        })
        .map_err(|e| RelayError::Spawn(e.to_string()))?;

    Ok(WorkerHandle {
        name,
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

/// A running relay.
#[derive(Debug)]
pub struct HubRelay {
    hub: Arc<SyncHub>,
    outbound: Vec<SubscriptionHandle>,
    inbound: WorkerHandle,
}

impl HubRelay {
    /// Start relaying `entity_types` between `hub` and `bus`.
    pub fn start<B>(hub: Arc<SyncHub>, bus: Arc<B>, entity_types: &[EntityType]) -> Result<Self, RelayError>
    where
        B: EventBus<MutationEvent> + 'static,
        B::Error: core::fmt::Debug,
    {
        let local = hub.instance_id().ok_or(RelayError::NoInstanceId)?.to_owned();

        // Subscribe to the bus before hooking the hub, so nothing published
        // by a peer in between is lost.
        let inbound_hub = hub.clone();
        let inbound_local = local.clone();
        let inbound = spawn_worker(format!("relay-in-{local}"), bus.subscribe(), move |event: MutationEvent| {
            if event.origin() == Some(inbound_local.as_str()) {
                return Ok::<(), String>(());
            }
            let local_event = inbound_hub.republish(&event);
            debug!(
                entity_type = %local_event.entity_type(),
                origin = ?event.origin(),
                sequence = local_event.sequence(),
                "remote mutation republished"
            );
            Ok(())
        })?;

        let mut outbound = Vec::with_capacity(entity_types.len());
        for &entity_type in entity_types {
            let bus = bus.clone();
            let local = local.clone();
            let handle = hub.subscribe(
                entity_type,
                CallbackHandler::on_any(move |event| {
                    if event.origin() != Some(local.as_str()) {
                        return Ok(());
                    }
                    bus.publish(event.clone())
                        .map_err(|e| format!("relay publish failed: {e:?}").into())
                }),
            );
            match handle {
                Ok(handle) => outbound.push(handle),
                Err(err) => {
                    for h in &outbound {
                        hub.unsubscribe(h);
                    }
                    inbound.shutdown();
                    return Err(err.into());
                }
            }
        }

        info!(instance_id = %local, entity_types = entity_types.len(), "hub relay started");
        Ok(Self { hub, outbound, inbound })
    }

    pub fn shutdown(self) {
        for handle in &self.outbound {
            self.hub.unsubscribe(handle);
        }
        self.inbound.shutdown();
        info!("hub relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use lotsync_events::{InMemoryEventBus, Mutation};
    use serde_json::json;

    use super::*;

    #[test]
    fn relay_requires_an_instance_id() {
        let bus = Arc::new(InMemoryEventBus::<MutationEvent>::new());
        let err = HubRelay::start(Arc::new(SyncHub::new()), bus, &EntityType::ALL).unwrap_err();
        assert!(matches!(err, RelayError::NoInstanceId));
    }

    #[test]
    fn mutations_cross_instances_exactly_once() {
        let bus = Arc::new(InMemoryEventBus::<MutationEvent>::new());
        let east = Arc::new(SyncHub::for_instance("east"));
        let west = Arc::new(SyncHub::for_instance("west"));
        let east_relay = HubRelay::start(east.clone(), bus.clone(), &EntityType::ALL).unwrap();
        let west_relay = HubRelay::start(west.clone(), bus.clone(), &EntityType::ALL).unwrap();
        let west_items = west.subscribe_stream(EntityType::InventoryItem);
        let east_items = east.subscribe_stream(EntityType::InventoryItem);

        east.publish(Mutation::insert(EntityType::InventoryItem, "s1", json!({"id": "s1"})));

        let seen = west_items.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(seen.entity_id(), "s1");
        assert_eq!(seen.origin(), Some("east"));
        assert_eq!(seen.sequence(), 1);

        // Nothing echoes back to the producer.
        assert!(east_items.recv_timeout(Duration::from_millis(20)).is_ok());
        thread::sleep(Duration::from_millis(300));
        assert!(east_items.try_recv().is_err());
        assert_eq!(east.last_sequence(EntityType::InventoryItem), 1);

        east_relay.shutdown();
        west_relay.shutdown();
    }
}
