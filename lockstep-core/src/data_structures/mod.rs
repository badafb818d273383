//! Data structures for concurrent sets.
//!
//! # Organization
//!
//! - [`list`] - Lock-based sorted list sets (FineGrainedSet, OptimisticSet)
//! - [`concurrent_set`] - The `ConcurrentSet` contract both implement
//! - [`internal`] - Nodes, the lock window and the sentinel chain (pub(crate))

pub mod concurrent_set;
pub(crate) mod internal;
pub mod list;

pub use concurrent_set::{ConcurrentSet, StructureAudit};
pub use list::{FineGrainedSet, OptimisticSet};
