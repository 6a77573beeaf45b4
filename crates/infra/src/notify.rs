//! Idempotent, best-effort delivery of transfer outcomes to requesters.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use lotsync_core::{TransferId, UserId};
use lotsync_events::{EntityType, Mutation, SyncHub};

/// Terminal outcome a requester is told about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferOutcome {
    Approved,
    Rejected,
    Conflict,
}

impl TransferOutcome {
    fn verb(self) -> &'static str {
        match self {
            TransferOutcome::Approved => "approved",
            TransferOutcome::Rejected => "rejected",
            TransferOutcome::Conflict => "stopped by an ownership conflict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub transfer_id: TransferId,
    pub recipient_id: UserId,
    pub outcome: TransferOutcome,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a successful `notify`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Same (transfer, recipient, outcome) was already delivered; nothing sent.
    AlreadyDelivered,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Where notifications go.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        (**self).deliver(notification)
    }
}

/// Keeps delivered notifications in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    delivered: Mutex<Vec<Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_recipient(&self, recipient: UserId) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(|n| n.recipient_id == recipient)
            .collect()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.delivered
            .lock()
            .map_err(|_| NotifyError::Delivery("sink lock poisoned".to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

/// Publishes each notification as a `Notification` INSERT on the hub, which
/// is how a requester's dashboard sees it.
#[derive(Debug, Clone)]
pub struct HubNotificationSink {
    hub: Arc<SyncHub>,
}

impl HubNotificationSink {
    pub fn new(hub: Arc<SyncHub>) -> Self {
        Self { hub }
    }
}

impl NotificationSink for HubNotificationSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let row = serde_json::to_value(notification).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.hub.publish(Mutation::insert(
            EntityType::Notification,
            notification.id.to_string(),
            row,
        ));
        Ok(())
    }
}

type DeliveryKey = (TransferId, UserId, TransferOutcome);

/// Keys remembered by default. Outcomes are terminal, so only replays of
/// recent decisions need deduplicating.
pub const DEFAULT_DELIVERY_MEMORY: usize = 10_000;

/// Delivered keys, oldest evicted first once `capacity` is reached.
#[derive(Debug)]
struct DeliveryLog {
    keys: HashSet<DeliveryKey>,
    order: VecDeque<DeliveryKey>,
    capacity: usize,
}

impl DeliveryLog {
    fn insert(&mut self, key: DeliveryKey) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }

    fn remove(&mut self, key: &DeliveryKey) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}

/// Deduplicating front of a [`NotificationSink`].
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    delivered: Mutex<DeliveryLog>,
}

impl core::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("remembered", &self.remembered())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_memory(sink, DEFAULT_DELIVERY_MEMORY)
    }

    /// Remember at most `capacity` delivered keys (at least one).
    pub fn with_memory(sink: Arc<dyn NotificationSink>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            delivered: Mutex::new(DeliveryLog {
                keys: HashSet::with_capacity(capacity.min(DEFAULT_DELIVERY_MEMORY)),
                order: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Number of delivered keys currently remembered.
    pub fn remembered(&self) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }

    /// Deliver at most once per `(transfer_id, recipient_id, outcome)` among
    /// the most recently delivered keys.
    ///
    /// The key is claimed before delivery and given back if the sink fails,
    /// so a later call can re-drive it.
    pub fn notify(
        &self,
        transfer_id: TransferId,
        recipient_id: UserId,
        outcome: TransferOutcome,
    ) -> Result<Delivery, NotifyError> {
        let key = (transfer_id, recipient_id, outcome);
        if !self.claim(key) {
            debug!(transfer_id = %transfer_id, recipient_id = %recipient_id, ?outcome, "notification already delivered");
            return Ok(Delivery::AlreadyDelivered);
        }

        let notification = Notification {
            id: Uuid::now_v7(),
            transfer_id,
            recipient_id,
            outcome,
            message: format!("Transfer {transfer_id} was {}", outcome.verb()),
            created_at: Utc::now(),
        };

        if let Err(err) = self.sink.deliver(&notification) {
            self.unclaim(&key);
            return Err(err);
        }

        info!(transfer_id = %transfer_id, recipient_id = %recipient_id, ?outcome, "notification delivered");
        Ok(Delivery::Delivered)
    }

    fn claim(&self, key: DeliveryKey) -> bool {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    fn unclaim(&self, key: &DeliveryKey) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
