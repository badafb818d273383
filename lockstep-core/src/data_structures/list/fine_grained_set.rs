use std::fmt;

use crossbeam_epoch::{self as epoch, Guard, Owned};

use crate::data_structures::internal::{LockedPair, Node, SentinelList};
use crate::data_structures::{ConcurrentSet, StructureAudit};
use crate::error::Result;
use crate::key::{Key, KeyFn, NaturalKey};

///
/// Sorted set over a singly linked list with one lock per node, traversed
/// hand over hand.
///
/// Every traversal starts by locking `head` and its successor. To move
/// forward it releases the first node, then locks the node after the second
/// one, so it holds at most two locks and always keeps the node it stands
/// on. A node can therefore never be spliced or unlinked under a traversal
/// passing through it, and each operation commits against a pair nobody
/// else can touch.
///
// find(25):
//
//   [HEAD]─►[10]─► 20 ─► 30 ─► TAIL      start: head and 10 locked
//    HEAD ─►[10]─► 20 ─► 30 ─► TAIL      10 < 25, release head
//    HEAD ─►[10]─►[20]─► 30 ─► TAIL      lock 20
//    HEAD ─► 10 ─►[20]─►[30]─► TAIL      20 < 25, slide; 30 >= 25, stop
//
// The price is that traversals queue behind each other from the head: two
// operations on far-apart keys still pass through the same first locks one
// at a time, and even `contains` pays the whole ladder.
//
pub struct FineGrainedSet<T, K = NaturalKey> {
    list: SentinelList<T, K>,
}

impl<T> FineGrainedSet<T, NaturalKey>
where
    NaturalKey: KeyFn<T>,
{
    pub fn new() -> Self {
        Self::with_key_fn(NaturalKey)
    }
}

impl<T, K> FineGrainedSet<T, K>
where
    K: KeyFn<T>,
{
    /// Creates an empty set ordered by `key_fn`.
    pub fn with_key_fn(key_fn: K) -> Self {
        FineGrainedSet {
            list: SentinelList::new(key_fn),
        }
    }

    /// Locks the ladder down to the pair with `pred.key < key <= curr.key`.
    fn find<'g>(&self, key: Key, guard: &'g Guard) -> LockedPair<'g, T>
    where
        Self: 'g,
    {
        let mut pair = LockedPair::lock_from(self.list.head(guard), guard);
        while pair.curr().key() < key {
            pair = pair.advance(guard);
        }
        pair
    }
}

impl<T, K> ConcurrentSet<T> for FineGrainedSet<T, K>
where
    T: Send + 'static,
    K: KeyFn<T>,
{
    fn add(&self, value: T) -> Result<bool> {
        let key = self.list.key_for(&value)?;
        let node = Owned::new(Node::new(key, value));

        let guard = &epoch::pin();
        let pair = self.find(key, guard);
        if pair.curr().key() == key {
            return Ok(false);
        }
        pair.splice(node);
        self.list.record_insert();
        Ok(true)
    }

    fn remove(&self, value: &T) -> Result<bool> {
        let key = self.list.key_for(value)?;

        let guard = &epoch::pin();
        let pair = self.find(key, guard);
        if pair.curr().key() != key {
            return Ok(false);
        }
        let removed = pair.unlink_curr(guard);
        self.list.record_remove();
        drop(pair);

        // SAFETY: `removed` is no longer reachable from head, and threads
        // that reached it before the unlink are pinned.
        unsafe { guard.defer_destroy(removed) };
        Ok(true)
    }

    fn contains(&self, value: &T) -> Result<bool> {
        let key = self.list.key_for(value)?;

        let guard = &epoch::pin();
        let pair = self.find(key, guard);
        Ok(pair.curr().key() == key)
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

impl<T> Default for FineGrainedSet<T, NaturalKey>
where
    NaturalKey: KeyFn<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> fmt::Debug for FineGrainedSet<T, K>
where
    T: fmt::Debug + Clone + Send + 'static,
    K: KeyFn<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.snapshot() {
            Ok(values) => f.debug_set().entries(values).finish(),
            Err(err) => write!(f, "FineGrainedSet({err})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier, mpsc};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::common_tests::set_core_tests::{Fragile, test_panicking_clone_interrupts_snapshot};

    #[test]
    fn test_find_holds_exactly_the_bracketing_pair() {
        let set: FineGrainedSet<i32> = FineGrainedSet::new();
        for i in [10, 20, 30] {
            set.add(i).unwrap();
        }

        let guard = &epoch::pin();
        let pair = set.find(25, guard);
        assert_eq!(pair.pred().key(), 20);
        assert_eq!(pair.curr().key(), 30);
        assert!(pair.pred().is_locked());
        assert!(pair.curr().is_locked());

        // Everything the ladder walked past has been released.
        let head = set.list.head(guard);
        let ten = head.successor(guard).unwrap();
        assert!(!head.is_locked());
        assert!(!ten.is_locked());

        drop(pair);
        assert!(!ten.successor(guard).unwrap().is_locked());
    }

    #[test]
    fn test_find_stops_at_head_for_smallest_key() {
        let set: FineGrainedSet<i32> = FineGrainedSet::new();
        set.add(5).unwrap();

        let guard = &epoch::pin();
        let pair = set.find(-100, guard);
        assert_eq!(pair.pred().key(), i64::MIN);
        assert_eq!(pair.curr().key(), 5);
    }

    #[test]
    fn test_held_pair_blocks_other_traversals() {
        let set = Arc::new(FineGrainedSet::<i32>::new());
        for i in 0..10 {
            set.add(i).unwrap();
        }

        let started = Arc::new(Barrier::new(2));
        let finished = Arc::new(AtomicBool::new(false));

        let guard = &epoch::pin();
        let pair = set.find(0, guard);

        let handle = {
            let set = Arc::clone(&set);
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                started.wait();
                // Must pass through head, which the main thread holds.
                assert!(set.contains(&9).unwrap());
                finished.store(true, Ordering::Release);
            })
        };

        started.wait();
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!finished.load(Ordering::Acquire));

        drop(pair);
        handle.join().unwrap();
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_ladder_releases_pred_before_locking_next() {
        let set = Arc::new(FineGrainedSet::<i32>::new());
        for i in [10, 20, 30] {
            set.add(i).unwrap();
        }

        // Another thread holds 20, so a walk towards 25 stalls on it.
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                let guard = &epoch::pin();
                let ten = set.list.head(guard).successor(guard).unwrap();
                let twenty = ten.successor(guard).unwrap();
                let _held = twenty.lock();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };
        held_rx.recv().unwrap();

        let walker = {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                let guard = &epoch::pin();
                let pair = set.find(25, guard);
                (pair.pred().key(), pair.curr().key())
            })
        };

        // While stalled, the walker holds only 10: head is already free.
        let guard = &epoch::pin();
        let head = set.list.head(guard);
        let ten = head.successor(guard).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut stalled_on_one_lock = false;
        while Instant::now() < deadline {
            if ten.is_locked() && !head.is_locked() {
                stalled_on_one_lock = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(stalled_on_one_lock, "head still held while waiting for 20");

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert_eq!(walker.join().unwrap(), (20, 30));
    }

    #[test]
    fn test_panicking_clone_abandons_only_the_snapshot() {
        let explode = Arc::new(AtomicBool::new(false));
        let set = FineGrainedSet::with_key_fn(|v: &Fragile| v.key);
        test_panicking_clone_interrupts_snapshot(&set, &explode);
    }
}
