//! Aggregate root contract for state-machine domain models.

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Incremented once per applied event; persisted rows carry it so that
    /// conditional writes can detect a concurrent decision.
    fn version(&self) -> u64;
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Commands and events are closed enums, so every operation is matched
/// exhaustively at compile time. Aggregates perform no IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Decide and apply in one step, returning the emitted events.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        for ev in &events {
            self.apply(ev);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        id: u32,
        total: i64,
        version: u64,
    }

    impl AggregateRoot for Counter {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Counter {
        type Command = i64;
        type Event = i64;
        type Error = &'static str;

        fn apply(&mut self, event: &i64) {
            self.total += event;
            self.version += 1;
        }

        fn handle(&self, command: &i64) -> Result<Vec<i64>, &'static str> {
            if *command == 0 {
                return Err("zero is not a change");
            }
            Ok(vec![*command])
        }
    }

    #[test]
    fn execute_applies_emitted_events_and_bumps_version() {
        let mut counter = Counter::default();
        assert_eq!(counter.execute(&5), Ok(vec![5]));
        assert_eq!(counter.execute(&-2), Ok(vec![-2]));
        assert_eq!((counter.total, counter.version()), (3, 2));
    }

    #[test]
    fn rejected_command_leaves_state_untouched() {
        let mut counter = Counter::default();
        assert!(counter.execute(&0).is_err());
        assert_eq!(counter.version(), 0);
    }
}
