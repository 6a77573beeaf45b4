//! Consumer-side progress tracking for hub streams.
//!
//! Delivery is at-least-once and never replayed, so a consumer needs to know
//! two things about each incoming event: "have I already applied this?" and
//! "did I miss something before it?".

use std::collections::HashMap;

use crate::entity::EntityType;
use crate::mutation::MutationEvent;

/// What a consumer should do with an incoming event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Next in sequence (or the first one seen): apply it.
    Apply,
    /// Already applied; skip.
    Duplicate,
    /// Apply it, but events between `expected` and `found` were missed and the
    /// local copy must be re-read from the store.
    Gap { expected: u64, found: u64 },
}

/// Tracks the last applied sequence per entity type.
///
/// The first event of a type may carry any sequence (a subscriber joins a
/// running stream); after that, sequences must increase by exactly one.
#[derive(Debug, Default, Clone)]
pub struct MutationCursor {
    last: HashMap<EntityType, u64>,
}

impl MutationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sequence(&self, entity_type: EntityType) -> Option<u64> {
        self.last.get(&entity_type).copied()
    }

    /// Classify `event` and advance the cursor unless it is a duplicate.
    pub fn admit(&mut self, event: &MutationEvent) -> Admission {
        let found = event.sequence();
        match self.last.get_mut(&event.entity_type()) {
            None => {
                self.last.insert(event.entity_type(), found);
                Admission::Apply
            }
            Some(last) if found <= *last => Admission::Duplicate,
            Some(last) => {
                let expected = *last + 1;
                *last = found;
                if found == expected {
                    Admission::Apply
                } else {
                    Admission::Gap { expected, found }
                }
            }
        }
    }

    /// Forget progress for `entity_type` (after a full re-read).
    pub fn reset(&mut self, entity_type: EntityType) {
        self.last.remove(&entity_type);
    }
}
