//! Redis pub/sub transport for [`MutationEvent`]s between instances.
//!
//! Pub/sub is not durable: an instance that is disconnected misses messages
//! and must re-synchronize from the store, which matches the hub's no-replay
//! contract.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use thiserror::Error;
use tracing::{debug, warn};

use lotsync_events::{EventBus, MutationEvent, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode mutation event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Redis pub/sub bus carrying JSON-encoded mutation events on one channel.
#[derive(Debug, Clone)]
pub struct RedisPubSubBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl EventBus<MutationEvent> for RedisPubSubBus {
    type Error = RedisBusError;

    fn publish(&self, message: MutationEvent) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.client.get_connection()?;
        let receivers: i64 = conn.publish(&self.channel, payload)?;
        debug!(channel = %self.channel, receivers, "mutation event published to redis");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<MutationEvent> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let channel = self.channel.clone();

        // The thread ends when the connection drops or the subscription is
        // dropped; the relay worker then sees a disconnect.
        let spawned = thread::Builder::new()
            .name(format!("redis-sub-{channel}"))
            .spawn(move || {
                let mut conn = match client.get_connection() {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "redis subscribe connection failed");
                        return;
                    }
                };
                let mut pubsub = conn.as_pubsub();
                if let Err(err) = pubsub.subscribe(&channel) {
                    warn!(channel = %channel, error = %err, "redis subscribe failed");
                    return;
                }

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "redis subscription lost");
                            return;
                        }
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let event: MutationEvent = match serde_json::from_str(&payload) {
                        Ok(e) => e,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "dropping undecodable mutation event");
                            continue;
                        }
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            });

        if let Err(err) = spawned {
            warn!(channel = %self.channel, error = %err, "failed to spawn redis subscriber thread");
        }

        Subscription::new(rx)
    }
}
