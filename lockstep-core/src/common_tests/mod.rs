//! Generic test bodies shared by every `ConcurrentSet` implementation.
//!
//! The integration tests in `tests/` instantiate each function once per
//! engine through rstest cases.
