//! Infrastructure layer: store adapters, the transfer workflow and its
//! collaborators (reservations, notifications, cached statistics), and the
//! wiring between the store and the realtime sync hub.

pub mod event_bus;
pub mod ledger;
pub mod notify;
pub mod relay;
pub mod stats_cache;
pub mod store;
pub mod sync;
pub mod transfer;

#[cfg(test)]
mod integration_tests;

pub use ledger::{LedgerError, ReservationLedger};
pub use notify::{
    Delivery, HubNotificationSink, InMemoryNotificationSink, Notification, NotificationDispatcher,
    NotificationSink, NotifyError, TransferOutcome,
};
pub use relay::{HubRelay, RelayError, WorkerHandle, spawn_worker};
pub use stats_cache::{
    CacheInvalidator, CacheMetricsSnapshot, StatsAggregationCache, StatsCacheConfig, StatsError,
    StatsInvalidation,
};
pub use store::{
    ChangeSink, ConditionalUpdate, Expectation, InMemoryInventoryStore, InventoryStore, ItemQuery,
    PostgresInventoryStore, RowWrite, StoreError, TransferQuery, UpdateOutcome, Violation,
};
pub use transfer::{
    ApprovalPolicy, ApproverRoster, Decision, NewTransfer, SeparationOfDuties, TransferConfig,
    TransferError, TransferRequestManager,
};
