//! Sequential model check: any single-threaded sequence of operations must
//! agree with `BTreeSet` on every result, the size and the iteration order.

use std::collections::BTreeSet;

use proptest::prelude::*;
use lockstep_core::data_structures::{ConcurrentSet, FineGrainedSet, OptimisticSet};

#[derive(Debug, Clone)]
enum Op {
    Add(i32),
    Remove(i32),
    Contains(i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-50..50i32).prop_map(Op::Add),
        (-50..50i32).prop_map(Op::Remove),
        (-50..50i32).prop_map(Op::Contains),
    ]
}

fn check_against_model<C>(set: &C, ops: &[Op]) -> Result<(), TestCaseError>
where
    C: ConcurrentSet<i32>,
{
    let mut model = BTreeSet::new();
    for op in ops {
        match *op {
            Op::Add(v) => prop_assert_eq!(set.add(v).unwrap(), model.insert(v)),
            Op::Remove(v) => prop_assert_eq!(set.remove(&v).unwrap(), model.remove(&v)),
            Op::Contains(v) => prop_assert_eq!(set.contains(&v).unwrap(), model.contains(&v)),
        }
        prop_assert_eq!(set.len(), model.len());
    }
    prop_assert_eq!(set.snapshot().unwrap(), model.into_iter().collect::<Vec<_>>());
    prop_assert!(set.audit().unwrap().is_consistent());
    Ok(())
}

proptest! {
    #[test]
    fn fine_grained_matches_btreeset(ops in prop::collection::vec(op_strategy(), 0..200)) {
        check_against_model(&FineGrainedSet::<i32>::new(), &ops)?;
    }

    #[test]
    fn optimistic_matches_btreeset(ops in prop::collection::vec(op_strategy(), 0..200)) {
        check_against_model(&OptimisticSet::<i32>::new(), &ops)?;
    }
}
