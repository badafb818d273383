pub mod churn;
pub mod common_tests;
pub mod data_structures;
pub mod error;
pub mod key;

pub use data_structures::{ConcurrentSet, FineGrainedSet, OptimisticSet, StructureAudit};
pub use error::{Result, SetError};
pub use key::{HashedKey, Key, KeyFn, NaturalKey, SetKey};

/*

cargo bench --package lockstep-core --bench set_benchmark

RUST_LOG=lockstep_core=trace cargo run --package lockstep-churn

*/
