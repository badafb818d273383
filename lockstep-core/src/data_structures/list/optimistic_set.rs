use std::fmt;
use std::ptr;

use crossbeam_epoch::{self as epoch, Guard, Owned};
use tracing::trace;

use crate::data_structures::internal::{LockedPair, Node, SentinelList};
use crate::data_structures::{ConcurrentSet, StructureAudit};
use crate::error::Result;
use crate::key::{Key, KeyFn, NaturalKey};

///
/// Sorted set over a singly linked list with one lock per node, traversed
/// without locks and validated before every commit.
///
/// An operation scans from `head` reading `next` links unlocked until it
/// finds the pair bracketing its key, locks just that pair, then scans again
/// to confirm the pair is still in the list and still adjacent. Only a
/// validated pair is ever modified; a stale one is unlocked and the whole
/// attempt starts over.
///
// Searching ──► PairLocked ──► Validating ──► Committing ──► Released
//     ▲                            │
//     └────────── invalid ─────────┘
//
// WHY THE SECOND SCAN
// ===================
//
// Between the unlocked scan and the pair lock, other threads are free to
// change the chain around the candidate pair:
//
// CASE 1: a node was spliced between pred and curr
//
//   scanned:   pred(10) ──────────► curr(30)
//   now:       pred(10) ──► X(20) ──► curr(30)
//
//   pred.next != curr: committing would bypass X (add) or remove the
//   wrong node (remove).
//
// CASE 2: pred itself was unlinked
//
//   scanned:   P(5) ──► pred(10) ──► curr(30)
//   now:       P(5) ─────────────────► curr(30)      pred(10) ──► curr(30)
//
//   pred.next still equals curr, but pred is no longer reachable, so a
//   node linked after it would be lost. The re-walk from head does not land
//   on pred.
//
// Once both locks are held neither node can be unlinked and nothing can be
// inserted between them, so a pair that validates stays valid until it is
// released.
//
pub struct OptimisticSet<T, K = NaturalKey> {
    list: SentinelList<T, K>,
}

impl<T> OptimisticSet<T, NaturalKey>
where
    NaturalKey: KeyFn<T>,
{
    pub fn new() -> Self {
        Self::with_key_fn(NaturalKey)
    }
}

impl<T, K> OptimisticSet<T, K>
where
    K: KeyFn<T>,
{
    /// Creates an empty set ordered by `key_fn`.
    pub fn with_key_fn(key_fn: K) -> Self {
        OptimisticSet {
            list: SentinelList::new(key_fn),
        }
    }

    /// Unlocked walk to the first `pred` whose successor's key is `>= key`.
    fn scan<'g>(&self, key: Key, guard: &'g Guard) -> (&'g Node<T>, &'g Node<T>)
    where
        T: 'g,
    {
        let mut pred = self.list.head(guard);
        let mut curr = Self::step(pred, guard);
        while curr.key() < key {
            pred = curr;
            curr = Self::step(curr, guard);
        }
        (pred, curr)
    }

    /// Re-walks from head, unlocked, to check `pred` is reachable and still
    /// links to `curr`.
    fn validate(&self, pred: &Node<T>, curr: &Node<T>, guard: &Guard) -> bool {
        let mut node = self.list.head(guard);
        while node.key() < pred.key() {
            node = Self::step(node, guard);
        }
        ptr::eq(node, pred) && pred.points_to(curr, guard)
    }

    #[inline]
    fn step<'g>(node: &Node<T>, guard: &'g Guard) -> &'g Node<T>
    where
        T: 'g,
    {
        node.successor(guard)
            .expect("unlocked scan stops at the tail sentinel")
    }

    /// Scans, locks and validates until it holds a pair with
    /// `pred.key < key <= curr.key` that is part of the chain.
    fn locate<'g>(&self, key: Key, guard: &'g Guard) -> LockedPair<'g, T>
    where
        T: 'g,
    {
        self.locate_with(key, guard, || {})
    }

    /// `locate` with a hook run between the unlocked scan and the pair lock.
    fn locate_with<'g, H>(
        &self,
        key: Key,
        guard: &'g Guard,
        mut before_lock: H,
    ) -> LockedPair<'g, T>
    where
        T: 'g,
        H: FnMut(),
    {
        let mut attempt = 0u32;
        loop {
            let (pred, curr) = self.scan(key, guard);
            before_lock();
            let pair = LockedPair::lock_both(pred, curr);
            if self.validate(pred, curr, guard) {
                return pair;
            }
            attempt += 1;
            trace!(
                key,
                pred = pred.key(),
                curr = curr.key(),
                attempt,
                "validation failed, retrying"
            );
        }
    }

    /// Runs `predicate` on the validated pair bracketing `key` and returns
    /// its result. Locks are released once the predicate returns.
    fn test<'g, R, P>(&self, key: Key, guard: &'g Guard, predicate: P) -> R
    where
        T: 'g,
        P: FnOnce(&LockedPair<'g, T>) -> R,
    {
        let pair = self.locate(key, guard);
        predicate(&pair)
    }
}

impl<T, K> ConcurrentSet<T> for OptimisticSet<T, K>
where
    T: Send + 'static,
    K: KeyFn<T>,
{
    fn add(&self, value: T) -> Result<bool> {
        let key = self.list.key_for(&value)?;
        let node = Owned::new(Node::new(key, value));

        let guard = &epoch::pin();
        Ok(self.test(key, guard, |pair| {
            if pair.curr().key() == key {
                return false;
            }
            pair.splice(node);
            self.list.record_insert();
            true
        }))
    }

    fn remove(&self, value: &T) -> Result<bool> {
        let key = self.list.key_for(value)?;

        let guard = &epoch::pin();
        Ok(self.test(key, guard, |pair| {
            if pair.curr().key() != key {
                return false;
            }
            let removed = pair.unlink_curr(guard);
            self.list.record_remove();
            // SAFETY: `removed` is no longer reachable from head; scans that
            // already stand on it are pinned and keep it alive.
            unsafe { guard.defer_destroy(removed) };
            true
        }))
    }

    fn contains(&self, value: &T) -> Result<bool> {
        let key = self.list.key_for(value)?;
        let guard = &epoch::pin();
        Ok(self.test(key, guard, |pair| pair.curr().key() == key))
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn snapshot(&self) -> Result<Vec<T>>
    where
        T: Clone,
    {
        self.list.snapshot()
    }

    fn audit(&self) -> Result<StructureAudit> {
        self.list.audit()
    }
}

impl<T> Default for OptimisticSet<T, NaturalKey>
where
    NaturalKey: KeyFn<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> fmt::Debug for OptimisticSet<T, K>
where
    T: fmt::Debug + Clone + Send + 'static,
    K: KeyFn<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.snapshot() {
            Ok(values) => f.debug_set().entries(values).finish(),
            Err(err) => write!(f, "OptimisticSet({err})"),
        }
    }
}
