//! Row-mutation events and the realtime sync hub.
//!
//! - [`Mutation`] / [`MutationEvent`]: what changed, as reported by a write path
//!   and as delivered (sequenced) to subscribers
//! - [`SyncHub`]: per-entity-type ordered fan-out with isolated subscribers
//! - [`EventBus`]: transport between processes (in-memory here, Redis in infra)
//! - [`MutationCursor`] / [`LiveCollection`]: consumer-side dedupe and replicas

pub mod bus;
pub mod cursor;
pub mod entity;
pub mod event;
pub mod hub;
pub mod in_memory_bus;
pub mod mutation;
pub mod replica;

pub use bus::{EventBus, Subscription};
pub use cursor::{Admission, MutationCursor};
pub use entity::{EntityType, MutationOp};
pub use event::Event;
pub use hub::{CallbackHandler, HandlerError, HubError, MutationHandler, SubscriptionHandle, SyncHub};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use mutation::{Mutation, MutationEvent};
pub use replica::{LiveCollection, ReplicaError};
