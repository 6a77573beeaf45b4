//! Realtime sync hub: typed fan-out of row mutations to independent subscribers.
//!
//! One hub per process. Write paths hand it [`Mutation`]s (the inventory store
//! does so from inside its commit section, so hub order follows commit order);
//! the hub stamps each one with the next sequence number of its entity type and
//! enqueues it for every subscriber of that type.
//!
//! ## Delivery guarantees
//!
//! - **Ordered per entity type**: sequence assignment and enqueueing happen
//!   under the type's own lock. Different types never contend and carry no
//!   ordering relative to each other.
//! - **At-least-once** from the consumer's point of view (a relay may re-deliver
//!   a remote event); consumers dedupe on `(entity_id, sequence)`, see
//!   [`crate::MutationCursor`].
//! - **Isolation**: each handler subscription owns an unbounded queue and a
//!   delivery thread. A handler that errors, panics or stalls affects nobody
//!   else and never delays `publish`.
//! - **No replay**: a subscriber only sees events published after it
//!   subscribed. Reconnecting consumers re-read from the store.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::Subscription;
use crate::entity::{EntityType, MutationOp};
use crate::mutation::{Mutation, MutationEvent};

/// Error returned by a subscriber callback. Logged by the hub, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Subscriber callbacks, one per mutation kind.
///
/// All methods default to a no-op so a subscriber only implements what it
/// cares about. Handlers must apply events idempotently.
pub trait MutationHandler: Send + 'static {
    fn on_insert(&mut self, _event: &MutationEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_update(&mut self, _event: &MutationEvent) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_delete(&mut self, _event: &MutationEvent) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn deliver<H>(handler: &mut H, event: &MutationEvent) -> Result<(), HandlerError>
where
    H: MutationHandler + ?Sized,
{
    match event.op() {
        MutationOp::Insert => handler.on_insert(event),
        MutationOp::Update => handler.on_update(event),
        MutationOp::Delete => handler.on_delete(event),
    }
}

type Callback = Box<dyn FnMut(&MutationEvent) -> Result<(), HandlerError> + Send>;

/// Closure-based [`MutationHandler`].
///
/// ```ignore
/// let handle = hub.subscribe(
///     EntityType::InventoryItem,
///     CallbackHandler::new()
///         .on_update(|ev| { table.apply(ev)?; Ok(()) })
///         .on_delete(|ev| { table.apply(ev)?; Ok(()) }),
/// )?;
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    insert: Option<Callback>,
    update: Option<Callback>,
    delete: Option<Callback>,
}

impl CallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert<F>(mut self, f: F) -> Self
    where
        F: FnMut(&MutationEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.insert = Some(Box::new(f));
        self
    }

    pub fn on_update<F>(mut self, f: F) -> Self
    where
        F: FnMut(&MutationEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete<F>(mut self, f: F) -> Self
    where
        F: FnMut(&MutationEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        self.delete = Some(Box::new(f));
        self
    }

    /// Route all three kinds to the same closure.
    pub fn on_any<F>(f: F) -> Self
    where
        F: FnMut(&MutationEvent) -> Result<(), HandlerError> + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(f));
        let route = |shared: Arc<Mutex<F>>| -> Callback {
            Box::new(move |ev| {
                let mut f = shared.lock().unwrap_or_else(PoisonError::into_inner);
                f(ev)
            })
        };
        Self {
            insert: Some(route(shared.clone())),
            update: Some(route(shared.clone())),
            delete: Some(route(shared)),
        }
    }
}

impl MutationHandler for CallbackHandler {
    fn on_insert(&mut self, event: &MutationEvent) -> Result<(), HandlerError> {
        self.insert.as_mut().map_or(Ok(()), |cb| cb(event))
    }

    fn on_update(&mut self, event: &MutationEvent) -> Result<(), HandlerError> {
        self.update.as_mut().map_or(Ok(()), |cb| cb(event))
    }

    fn on_delete(&mut self, event: &MutationEvent) -> Result<(), HandlerError> {
        self.delete.as_mut().map_or(Ok(()), |cb| cb(event))
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to spawn delivery thread: {0}")]
    Spawn(String),
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<MutationEvent>,
    active: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct TypeChannel {
    last_sequence: u64,
    subscribers: Vec<Subscriber>,
}

/// Handle returned by [`SyncHub::subscribe`]; pass it to [`SyncHub::unsubscribe`].
///
/// Dropping the handle does not cancel the subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    entity_type: EntityType,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Process-local realtime hub.
#[derive(Debug)]
pub struct SyncHub {
    channels: [Mutex<TypeChannel>; EntityType::ALL.len()],
    next_subscriber: AtomicU64,
    origin: Option<String>,
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(entity_type: EntityType) -> usize {
    match entity_type {
        EntityType::InventoryItem => 0,
        EntityType::TransferRequest => 1,
        EntityType::Notification => 2,
        EntityType::Batch => 3,
        EntityType::Team => 4,
    }
}

impl SyncHub {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|_| Mutex::new(TypeChannel::default())),
            next_subscriber: AtomicU64::new(0),
            origin: None,
        }
    }

    /// Hub whose locally-produced events are tagged with `instance_id`.
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            origin: Some(instance_id.into()),
            ..Self::new()
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    fn channel(&self, entity_type: EntityType) -> MutexGuard<'_, TypeChannel> {
        // The guarded state is a counter and a list; both stay consistent even
        // if a holder panicked, so poisoning is ignored.
        self.channels[slot(entity_type)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sequence and fan out a locally-produced mutation.
    pub fn publish(&self, mutation: Mutation) -> MutationEvent {
        self.publish_as(mutation, Uuid::now_v7(), self.origin.clone())
    }

    /// Re-publish an event produced by another instance, keeping its id and
    /// origin but assigning a local sequence number.
    pub fn republish(&self, remote: &MutationEvent) -> MutationEvent {
        self.publish_as(
            remote.to_mutation(),
            remote.event_id(),
            remote.origin().map(str::to_owned),
        )
    }

    fn publish_as(&self, mutation: Mutation, event_id: Uuid, origin: Option<String>) -> MutationEvent {
        let entity_type = mutation.entity_type;
        let mut channel = self.channel(entity_type);

        channel.last_sequence += 1;
        let event = MutationEvent::new(event_id, mutation, channel.last_sequence, origin, Utc::now());

        // Enqueue while still holding the type lock: queue order == sequence order.
        channel
            .subscribers
            .retain(|sub| sub.active.load(Ordering::Acquire) && sub.tx.send(event.clone()).is_ok());

        debug!(
            entity_type = %entity_type,
            entity_id = event.entity_id(),
            op = ?event.op(),
            sequence = event.sequence(),
            subscribers = channel.subscribers.len(),
            "mutation published"
        );

        event
    }

    /// Register callbacks for one entity type.
    ///
    /// The handler runs on its own thread and receives events in sequence order.
    pub fn subscribe<H>(&self, entity_type: EntityType, handler: H) -> Result<SubscriptionHandle, HubError>
    where
        H: MutationHandler,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed) + 1;
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let worker_active = active.clone();
        thread::Builder::new()
            .name(format!("sync-{entity_type}-{id}"))
            .spawn(move || delivery_loop(entity_type, id, rx, worker_active, handler))
            .map_err(|e| HubError::Spawn(e.to_string()))?;

        self.channel(entity_type).subscribers.push(Subscriber {
            id,
            tx,
            active: active.clone(),
        });

        debug!(entity_type = %entity_type, subscription = id, "subscribed");
        Ok(SubscriptionHandle {
            id,
            entity_type,
            active,
        })
    }

    /// Channel-based subscription (used by streaming endpoints and the relay).
    ///
    /// Dropping the returned [`Subscription`] detaches it on the next publish.
    pub fn subscribe_stream(&self, entity_type: EntityType) -> Subscription<MutationEvent> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel();
        self.channel(entity_type).subscribers.push(Subscriber {
            id,
            tx,
            active: Arc::new(AtomicBool::new(true)),
        });
        Subscription::new(rx)
    }

    /// Cancel a subscription. Events still queued for it are dropped.
    ///
    /// Returns `false` if it was already cancelled.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        handle.active.store(false, Ordering::Release);

        let mut channel = self.channel(handle.entity_type);
        let before = channel.subscribers.len();
        channel.subscribers.retain(|sub| sub.id != handle.id);
        let removed = channel.subscribers.len() != before;

        if removed {
            debug!(entity_type = %handle.entity_type, subscription = handle.id, "unsubscribed");
        }
        removed
    }

    /// Highest sequence number assigned so far for `entity_type` (0 if none).
    pub fn last_sequence(&self, entity_type: EntityType) -> u64 {
        self.channel(entity_type).last_sequence
    }

    pub fn subscriber_count(&self, entity_type: EntityType) -> usize {
        self.channel(entity_type)
            .subscribers
            .iter()
            .filter(|s| s.active.load(Ordering::Acquire))
            .count()
    }
}

fn delivery_loop<H>(
    entity_type: EntityType,
    id: u64,
    rx: mpsc::Receiver<MutationEvent>,
    active: Arc<AtomicBool>,
    mut handler: H,
) where
    H: MutationHandler,
{
    // Ends when the hub drops the sender (unsubscribe or hub dropped).
    while let Ok(event) = rx.recv() {
        if !active.load(Ordering::Acquire) {
            break;
        }

        match catch_unwind(AssertUnwindSafe(|| deliver(&mut handler, &event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                entity_type = %entity_type,
                subscription = id,
                sequence = event.sequence(),
                error = %err,
                "subscriber handler failed"
            ),
            Err(_) => warn!(
                entity_type = %entity_type,
                subscription = id,
                sequence = event.sequence(),
                "subscriber handler panicked"
            ),
        }
    }

    debug!(entity_type = %entity_type, subscription = id, "delivery loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;

    fn item_update(id: &str, n: u64) -> Mutation {
        Mutation::update(EntityType::InventoryItem, id, json!({ "n": n }), None)
    }

    fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn collecting_handler(sink: Arc<Mutex<Vec<u64>>>) -> CallbackHandler {
        CallbackHandler::on_any(move |ev| {
            sink.lock().unwrap().push(ev.sequence());
            Ok(())
        })
    }

    #[test]
    fn sequences_are_per_entity_type() {
        let hub = SyncHub::new();

        let a = hub.publish(item_update("s1", 1));
        let b = hub.publish(Mutation::insert(EntityType::TransferRequest, "t1", json!({})));
        let c = hub.publish(item_update("s1", 2));

        assert_eq!(a.sequence(), 1);
        assert_eq!(b.sequence(), 1);
        assert_eq!(c.sequence(), 2);
        assert_eq!(hub.last_sequence(EntityType::InventoryItem), 2);
    }

    #[test]
    fn subscriber_sees_events_in_publish_order() {
        let hub = SyncHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        hub.subscribe(EntityType::InventoryItem, collecting_handler(seen.clone()))
            .unwrap();

        for n in 0..200 {
            hub.publish(item_update(&format!("s{}", n % 7), n));
        }

        assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 200));
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_starve_others() {
        let hub = SyncHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        hub.subscribe(
            EntityType::InventoryItem,
            CallbackHandler::new().on_update(|_| Err("boom".into())),
        )
        .unwrap();
        hub.subscribe(
            EntityType::InventoryItem,
            CallbackHandler::new().on_update(|_| panic!("handler bug")),
        )
        .unwrap();
        hub.subscribe(EntityType::InventoryItem, collecting_handler(seen.clone()))
            .unwrap();

        for n in 0..3 {
            hub.publish(item_update("s1", n));
        }

        assert!(wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 3));
    }

    #[test]
    fn slow_handler_does_not_delay_publish() {
        let hub = SyncHub::new();
        hub.subscribe(
            EntityType::InventoryItem,
            CallbackHandler::new().on_update(|_| {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            }),
        )
        .unwrap();

        let started = Instant::now();
        for n in 0..5 {
            hub.publish(item_update("s1", n));
        }
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn unsubscribe_stops_future_delivery() {
        let hub = SyncHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = hub
            .subscribe(EntityType::InventoryItem, collecting_handler(seen.clone()))
            .unwrap();

        hub.publish(item_update("s1", 1));
        assert!(wait_until(Duration::from_secs(1), || seen.lock().unwrap().len() == 1));

        assert!(hub.unsubscribe(&handle));
        assert!(!hub.unsubscribe(&handle));
        assert!(!handle.is_active());
        assert_eq!(hub.subscriber_count(EntityType::InventoryItem), 0);

        hub.publish(item_update("s1", 2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn late_subscribers_get_no_replay() {
        let hub = SyncHub::new();
        hub.publish(item_update("s1", 1));

        let sub = hub.subscribe_stream(EntityType::InventoryItem);
        hub.publish(item_update("s1", 2));

        let got = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got.sequence(), 2);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn other_entity_types_are_not_delivered() {
        let hub = SyncHub::new();
        let sub = hub.subscribe_stream(EntityType::TransferRequest);

        hub.publish(item_update("s1", 1));

        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn republish_keeps_identity_but_resequences() {
        let remote = SyncHub::for_instance("node-a");
        let local = SyncHub::for_instance("node-b");
        local.publish(item_update("s9", 0));

        let original = remote.publish(item_update("s1", 1));
        let copy = local.republish(&original);

        assert_eq!(copy.event_id(), original.event_id());
        assert_eq!(copy.origin(), Some("node-a"));
        assert_eq!(copy.sequence(), 2);
    }
}
