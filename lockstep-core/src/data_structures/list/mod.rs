//! Lock-based sorted list sets.
//!
//! Both sets share one node layout and one sentinel-bounded chain, and
//! differ only in how an operation reaches the pair it commits against:
//!
//! - `FineGrainedSet`: hand-over-hand lock ladder from the head
//! - `OptimisticSet`: unlocked scan, pair lock, validation, retry

pub mod fine_grained_set;
pub mod optimistic_set;

pub use fine_grained_set::FineGrainedSet;
pub use optimistic_set::OptimisticSet;
