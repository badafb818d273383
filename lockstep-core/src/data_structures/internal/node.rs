use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use tracing::warn;

use crate::key::{HEAD_KEY, Key, TAIL_KEY};

pub(crate) type NodeLock<'g> = MutexGuard<'g, ()>;

/// One link of the sentinel-bounded chain.
///
/// The `next` link is read without a lock by the optimistic scan, so it is
/// an epoch-protected atomic pointer rather than a plain field. Every write
/// to it happens while this node's lock is held.
///
// ┌──────────┐    ┌──────┐    ┌──────┐    ┌──────────┐
// │   HEAD   │───►│  k1  │───►│  k2  │───►│   TAIL   │
// │ i64::MIN │    │  v1  │    │  v2  │    │ i64::MAX │
// └──────────┘    └──────┘    └──────┘    └──────────┘
//
pub(crate) struct Node<T> {
    key: Key,
    value: Option<T>,
    next: Atomic<Node<T>>,
    lock: Mutex<()>,
}

impl<T> Node<T> {
    pub(crate) fn new(key: Key, value: T) -> Self {
        Node {
            key,
            value: Some(value),
            next: Atomic::null(),
            lock: Mutex::new(()),
        }
    }

    fn new_sentinel(key: Key) -> Self {
        Node {
            key,
            value: None,
            next: Atomic::null(),
            lock: Mutex::new(()),
        }
    }

    /// Allocates `head -> tail` and returns the head.
    pub(crate) fn sentinel_pair() -> Owned<Node<T>> {
        let head = Owned::new(Node::new_sentinel(HEAD_KEY));
        head.next.store(
            Owned::new(Node::new_sentinel(TAIL_KEY)),
            Ordering::Relaxed,
        );
        head
    }

    #[inline]
    pub(crate) fn key(&self) -> Key {
        self.key
    }

    /// Payload of a member node; `None` only for the two sentinels.
    #[inline]
    pub(crate) fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[inline]
    pub(crate) fn is_tail(&self) -> bool {
        self.value.is_none() && self.key == TAIL_KEY
    }

    // =========================================================================
    // Next link accessors
    // =========================================================================

    /// Load next link (Acquire ordering)
    #[inline]
    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
        self.next.load(Ordering::Acquire, guard)
    }

    /// Successor node, `None` only past the tail.
    #[inline]
    pub(crate) fn successor<'g>(&self, guard: &'g Guard) -> Option<&'g Node<T>> {
        // SAFETY: nodes reachable from a live chain are only reclaimed through
        // `defer_destroy`, which waits for every guard pinned before the
        // unlink, including `guard`.
        unsafe { self.next(guard).as_ref() }
    }

    /// Store next link (Release ordering). Caller holds this node's lock.
    #[inline]
    pub(crate) fn set_next<P>(&self, next: P)
    where
        P: crossbeam_epoch::Pointer<Node<T>>,
    {
        self.next.store(next, Ordering::Release)
    }

    #[inline]
    pub(crate) fn points_to(&self, node: &Node<T>, guard: &Guard) -> bool {
        std::ptr::eq(self.next(guard).as_raw(), node)
    }

    // =========================================================================
    // Lock
    // =========================================================================

    /// Acquires this node's lock, blocking until it is free.
    ///
    /// The mutex guards no data and every link write is complete before its
    /// guard is released, so a lock poisoned by a panicking holder is
    /// cleared and taken over.
    pub(crate) fn lock(&self) -> NodeLock<'_> {
        self.lock.lock().unwrap_or_else(|poisoned| {
            warn!(key = self.key, "node lock poisoned, clearing");
            self.lock.clear_poison();
            poisoned.into_inner()
        })
    }

    /// `true` if some thread currently holds this node's lock.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        matches!(self.lock.try_lock(), Err(std::sync::TryLockError::WouldBlock))
    }
}
