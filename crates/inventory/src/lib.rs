//! Inventory transfer domain.
//!
//! Business rules for SIM inventory ownership, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage):
//! - [`InventoryItem`] rows and their status lifecycle
//! - the [`TransferRequest`] state machine (closed command/event enums)
//! - team → batch → user statistics

pub mod item;
pub mod stats;
pub mod transfer;

pub use item::{InventoryItem, ItemId, ItemStatus};
pub use stats::{
    BatchStats, DateSpan, Rates, StatsFilter, StatsRange, StatusCounts, TeamStats, UserStats,
    aggregate_team,
};
pub use transfer::{
    ApproveTransfer, CancelTransfer, MarkConflict, OpenTransfer, RejectTransfer, TransferApproved,
    TransferCancelled, TransferCommand, TransferConflicted, TransferEvent, TransferOpened,
    TransferRejected, TransferRequest, TransferRuleError, TransferStatus, validate_item_ids,
};
