//! Fault conditions raised by set operations.
//!
//! Presence and absence are never faults: `add`, `remove` and `contains`
//! report them as `Ok(bool)`. A `SetError` means the operation did not run
//! to a decision.

use thiserror::Error;

use crate::key::Key;

/// Result alias used by every set operation.
pub type Result<T> = std::result::Result<T, SetError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetError {
    /// The value's derived key is one of the two sentinel keys.
    ///
    /// Raised before any node lock is taken, so the set is untouched.
    #[error("invalid argument: key {key} is reserved for a sentinel node")]
    InvalidArgument { key: Key },

    /// The operation was interrupted while holding node locks, by a member
    /// whose `Clone` panicked during `snapshot`.
    ///
    /// Only that call is abandoned. Its locks are released normally and no
    /// link was being written, so the set stays ordered and usable.
    #[error("operation incomplete: interrupted while holding node locks")]
    Incomplete,
}

impl SetError {
    /// `true` when the fault was caused by the caller's argument rather
    /// than by the state of the set.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, SetError::InvalidArgument { .. })
    }
}
