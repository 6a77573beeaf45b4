//! Store → hub glue.
//!
//! The hub is the store's change sink: each committed row change becomes a
//! sequenced `MutationEvent`. Both stores publish before the next write can
//! commit (the in-memory store under its write lock, Postgres under its commit
//! lock), so per-type sequence order equals commit order.

use lotsync_events::{Mutation, SyncHub};

use crate::store::ChangeSink;

impl ChangeSink for SyncHub {
    fn record(&self, mutation: Mutation) {
        self.publish(mutation);
    }
}
