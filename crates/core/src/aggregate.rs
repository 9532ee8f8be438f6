//! Aggregate root traits for the lifecycle state machines.

use crate::error::{DomainError, DomainResult};

/// Something with an identity and a revision counter: an invoice, a device
/// or an approval request.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Bumped once per applied event. Saves are rejected when the stored
    /// revision moved underneath the caller.
    fn version(&self) -> u64;
}

/// Revision a save expects to find in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    Any,
    /// First save of a freshly created record.
    New,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::New, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "record changed concurrently (expected {self:?}, found {actual:?})"
            )))
        }
    }
}

/// A lifecycle state machine. `handle` decides which events a command yields
/// against the current state and `apply` folds them in. No IO happens here;
/// the services persist the new state and turn the events into audit rows.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}
