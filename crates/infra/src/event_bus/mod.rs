//! Infrastructure event bus implementations.
//!
//! The bus abstraction lives in `lotsync-events`; this module provides the
//! networked transport used by the cross-instance relay.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubBus};
