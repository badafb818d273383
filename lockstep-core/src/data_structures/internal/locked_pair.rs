use crossbeam_epoch::{Guard, Owned, Shared};

use super::node::{Node, NodeLock};

/// Two consecutive nodes, both locked.
///
/// This is the window every structural change goes through: a node may be
/// spliced in or unlinked only while its predecessor and successor are held
/// by one `LockedPair`. The hand-over-hand ladder slides the window with
/// `advance`, which lets go of the first node before locking the node after
/// the second, so a traversal never holds more than two locks. The second
/// node stays locked across the step, which keeps its `next` link fixed.
///
/// ```text
///   advance():   [pred]─►[curr]─► next        release pred
///                 pred ─►[curr]─► next        lock next
///                 pred ─►[curr]─►[next]
/// ```
///
/// Dropping the pair releases the successor first, then the predecessor.
pub(crate) struct LockedPair<'g, T> {
    // Declaration order is drop order.
    curr_lock: NodeLock<'g>,
    pred_lock: NodeLock<'g>,
    pred: &'g Node<T>,
    curr: &'g Node<T>,
}

impl<'g, T> LockedPair<'g, T> {
    /// Locks `pred`, then whatever `pred.next` is once `pred` is held.
    pub(crate) fn lock_from(pred: &'g Node<T>, guard: &'g Guard) -> Self {
        let pred_lock = pred.lock();
        let curr = pred
            .successor(guard)
            .expect("only the tail sentinel has no successor");
        let curr_lock = curr.lock();
        LockedPair {
            curr_lock,
            pred_lock,
            pred,
            curr,
        }
    }

    /// Locks `pred` then `curr` without checking they are still adjacent.
    ///
    /// Used by the optimistic engine, which validates the pair afterwards.
    pub(crate) fn lock_both(pred: &'g Node<T>, curr: &'g Node<T>) -> Self {
        let pred_lock = pred.lock();
        let curr_lock = curr.lock();
        LockedPair {
            curr_lock,
            pred_lock,
            pred,
            curr,
        }
    }

    #[inline]
    pub(crate) fn pred(&self) -> &'g Node<T> {
        self.pred
    }

    #[inline]
    pub(crate) fn curr(&self) -> &'g Node<T> {
        self.curr
    }

    /// Slides the window one node towards the tail.
    ///
    /// Must not be called once `curr` is the tail sentinel.
    pub(crate) fn advance(self, guard: &'g Guard) -> Self {
        let LockedPair {
            curr_lock,
            pred_lock,
            curr,
            ..
        } = self;
        drop(pred_lock);

        let next = curr
            .successor(guard)
            .expect("advance never moves past the tail sentinel");
        let next_lock = next.lock();
        LockedPair {
            curr_lock: next_lock,
            pred_lock: curr_lock,
            pred: curr,
            curr: next,
        }
    }

    /// Links `node` between `pred` and `curr`.
    pub(crate) fn splice(&self, node: Owned<Node<T>>) {
        node.set_next(Shared::from(self.curr as *const Node<T>));
        self.pred.set_next(node);
    }

    /// Unlinks `curr` and returns it for deferred destruction.
    ///
    /// `curr` stays locked by this pair until the pair is dropped, and its
    /// own `next` is left intact so unlocked readers standing on it can
    /// still reach the rest of the chain.
    pub(crate) fn unlink_curr(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
        self.pred.set_next(self.curr.next(guard));
        Shared::from(self.curr as *const Node<T>)
    }
}
