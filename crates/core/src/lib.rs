//! `lotsync-core`: domain foundation building blocks.
//!
//! Pure domain primitives shared by every other crate in the workspace: typed
//! identifiers, the domain error taxonomy and the aggregate contract used by the
//! transfer state machine. No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot};
pub use error::DomainError;
pub use id::{BatchId, TeamId, TransferId, UserId};
