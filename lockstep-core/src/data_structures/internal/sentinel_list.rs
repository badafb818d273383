use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard};
use tracing::warn;

use super::locked_pair::LockedPair;
use super::node::Node;
use crate::data_structures::StructureAudit;
use crate::error::{Result, SetError};
use crate::key::{Key, KeyFn, checked_key};

/// State shared by both engines: the sentinel-bounded chain, the population
/// counter and the key function.
///
// INVARIANTS (at every quiescent instant):
// 1. head.key = i64::MIN, tail.key = i64::MAX, neither is ever unlinked
// 2. keys strictly increase from head to tail, so no duplicates
// 3. size = number of non-sentinel nodes reachable from head
//
// The counter is only touched while the pair that committed the change is
// still locked, so two structural changes never race on it.
//
pub(crate) struct SentinelList<T, K> {
    head: Atomic<Node<T>>,
    size: AtomicUsize,
    key_fn: K,
}

impl<T, K> SentinelList<T, K>
where
    K: KeyFn<T>,
{
    pub(crate) fn new(key_fn: K) -> Self {
        SentinelList {
            head: Atomic::from(Node::sentinel_pair()),
            size: AtomicUsize::new(0),
            key_fn,
        }
    }

    pub(crate) fn head<'g>(&self, guard: &'g Guard) -> &'g Node<T> {
        // SAFETY: the head sentinel is allocated in `new` and freed only in
        // `drop`, which cannot run while `&self` is borrowed.
        unsafe { self.head.load(Ordering::Acquire, guard).deref() }
    }

    /// Derives the key of `value`, rejecting sentinel keys.
    pub(crate) fn key_for(&self, value: &T) -> Result<Key> {
        checked_key(&self.key_fn, value)
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Called by the pair that committed an insert, before it unlocks.
    pub(crate) fn record_insert(&self) {
        self.size.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by the pair that committed a removal, before it unlocks.
    pub(crate) fn record_remove(&self) {
        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    /// Hand-over-hand walk from head to tail, calling `visit` on every
    /// member node while it is held as the second node of the window.
    fn walk_locked<F>(&self, guard: &Guard, mut visit: F)
    where
        F: FnMut(&Node<T>, &Node<T>) -> bool,
    {
        let mut pair = LockedPair::lock_from(self.head(guard), guard);
        while visit(pair.pred(), pair.curr()) && !pair.curr().is_tail() {
            pair = pair.advance(guard);
        }
    }

    /// Ordered copy of every member, taken under the lock ladder.
    ///
    /// A panicking `Clone` abandons the snapshot with `Incomplete`; the
    /// ladder unwinds normally and the set stays usable.
    pub(crate) fn snapshot(&self) -> Result<Vec<T>>
    where
        T: Clone,
    {
        let guard = &epoch::pin();
        let mut values = Vec::with_capacity(self.len());
        let mut interrupted = false;
        self.walk_locked(guard, |_, curr| {
            let Some(value) = curr.value() else {
                return true;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| value.clone())) {
                Ok(value) => {
                    values.push(value);
                    true
                }
                Err(_) => {
                    warn!(key = curr.key(), "clone panicked, abandoning snapshot");
                    interrupted = true;
                    false
                }
            }
        });
        if interrupted {
            return Err(SetError::Incomplete);
        }
        Ok(values)
    }

    /// Walks the chain under the lock ladder and checks the invariants.
    ///
    /// Stops at the first ordering violation, so a corrupted chain with a
    /// cycle cannot keep the walk going.
    pub(crate) fn audit(&self) -> Result<StructureAudit> {
        let guard = &epoch::pin();
        let mut reachable = 0;
        let mut ordered = true;
        self.walk_locked(guard, |pred, curr| {
            if pred.key() >= curr.key() {
                ordered = false;
                return false;
            }
            if curr.value().is_some() {
                reachable += 1;
            }
            true
        });
        Ok(StructureAudit {
            reachable,
            recorded: self.len(),
            ordered,
        })
    }
}

impl<T, K> Drop for SentinelList<T, K> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no operation is in flight, so nothing
        // else can observe the chain. Unlinked nodes were already handed to
        // the epoch collector and are not reachable from head.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while let Some(node) = curr.as_ref() {
                let next = node.next(guard);
                drop(curr.into_owned());
                curr = next;
            }
        }
    }
}
