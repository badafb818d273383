//! Internal implementation details.
//!
//! These are pub(crate) and not intended for external use.

pub(crate) mod locked_pair;
pub(crate) mod node;
pub(crate) mod sentinel_list;

pub(crate) use locked_pair::LockedPair;
pub(crate) use node::Node;
pub(crate) use sentinel_list::SentinelList;
