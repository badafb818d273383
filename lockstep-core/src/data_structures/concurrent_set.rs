//! The set contract shared by both engines.
//!
//! ```text
//! ConcurrentSet<T>
//!     │
//!     ├── FineGrainedSet<T, K>   hand-over-hand lock ladder
//!     └── OptimisticSet<T, K>    unlocked scan + validated pair lock
//! ```
//!
//! Tests and the churn driver are written against this trait only, so they
//! run unchanged against either engine.

use crate::error::Result;

/// A concurrent set of values ordered by their key.
///
/// Membership is decided by key equality. Every method takes `&self`; the
/// set is meant to be shared behind an `Arc` by any number of threads.
pub trait ConcurrentSet<T> {
    /// Adds `value`.
    ///
    /// Returns `Ok(false)` if a member with the same key is already present,
    /// in which case `value` is dropped.
    fn add(&self, value: T) -> Result<bool>;

    /// Removes the member with the same key as `value`.
    ///
    /// Returns `Ok(false)` if no such member exists.
    fn remove(&self, value: &T) -> Result<bool>;

    /// Whether a member with the same key as `value` is present.
    fn contains(&self, value: &T) -> Result<bool>;

    /// Current population.
    ///
    /// Read without locks: while mutations are in flight the value may lag
    /// or lead the visible chain by the changes still committing.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detached copy of every member in ascending key order.
    fn snapshot(&self) -> Result<Vec<T>>
    where
        T: Clone;

    /// Structural self-check, meaningful when no operation is in flight.
    fn audit(&self) -> Result<StructureAudit>;

    /// Adds every value, returning how many were new.
    fn extend_from<I>(&self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = T>,
        Self: Sized,
    {
        let mut added = 0;
        for value in values {
            if self.add(value)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// Result of walking the chain under the lock ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureAudit {
    /// Member nodes reachable from the head sentinel.
    pub reachable: usize,
    /// Population counter at the end of the walk.
    pub recorded: usize,
    /// Keys strictly increased along the whole walk.
    pub ordered: bool,
}

impl StructureAudit {
    pub fn is_consistent(&self) -> bool {
        self.ordered && self.reachable == self.recorded
    }
}
