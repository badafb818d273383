//! Key derivation for set members.
//!
//! Every member is ordered by an integer surrogate, its `Key`. The set keeps
//! nodes sorted by key and treats two members with the same key as the same
//! member, so a key function must map equal values to equal keys. The
//! converse is not required: two unequal values that collide are still
//! treated as one, and the second `add` is rejected.
//!
//! ```text
//! NaturalKey      - identity for integers, bool and char (default)
//! HashedKey<S>    - content hash through a BuildHasher
//! Fn(&T) -> Key   - any closure
//! ```

use std::hash::{BuildHasher, Hash};

use rustc_hash::FxBuildHasher;

use crate::error::{Result, SetError};

pub type Key = i64;

/// Key of the head sentinel. No member may derive it.
pub const HEAD_KEY: Key = Key::MIN;

/// Key of the tail sentinel. No member may derive it.
pub const TAIL_KEY: Key = Key::MAX;

/// Maps a member to its ordering key.
pub trait KeyFn<T: ?Sized>: Send + Sync {
    fn key_of(&self, value: &T) -> Key;
}

impl<T, F> KeyFn<T> for F
where
    T: ?Sized,
    F: Fn(&T) -> Key + Send + Sync,
{
    fn key_of(&self, value: &T) -> Key {
        self(value)
    }
}

/// Derives the key and rejects the two sentinel keys.
pub(crate) fn checked_key<T, K>(key_fn: &K, value: &T) -> Result<Key>
where
    T: ?Sized,
    K: KeyFn<T> + ?Sized,
{
    let key = key_fn.key_of(value);
    if key == HEAD_KEY || key == TAIL_KEY {
        return Err(SetError::InvalidArgument { key });
    }
    Ok(key)
}

/// A type's own ordering surrogate.
pub trait SetKey {
    fn set_key(&self) -> Key;
}

macro_rules! identity_set_key {
    ($($t:ty),* $(,)?) => {
        $(
            impl SetKey for $t {
                #[inline]
                fn set_key(&self) -> Key {
                    *self as Key
                }
            }
        )*
    };
}

// Only types whose every value fits an i64 unchanged; `u64` and `usize`
// would wrap and break the ordering.
identity_set_key!(i8, i16, i32, i64, isize, u8, u16, u32);

impl SetKey for bool {
    fn set_key(&self) -> Key {
        *self as Key
    }
}

impl SetKey for char {
    fn set_key(&self) -> Key {
        *self as u32 as Key
    }
}

impl<T: SetKey + ?Sized> SetKey for &T {
    fn set_key(&self) -> Key {
        (**self).set_key()
    }
}

/// Default key function: the member's `SetKey`.
///
/// Implemented for the integer types whose values all fit an `i64`, so the
/// key order is the natural order. `u64` and `usize` are not among them:
/// order those with a closure that states how to fold the upper half, or
/// with `HashedKey` when order does not matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalKey;

impl<T: SetKey + ?Sized> KeyFn<T> for NaturalKey {
    #[inline]
    fn key_of(&self, value: &T) -> Key {
        value.set_key()
    }
}

/// Content-hash key function.
///
/// Defaults to `FxBuildHasher`, which is deterministic across runs, so the
/// iteration order of a set is reproducible.
#[derive(Debug, Default, Clone)]
pub struct HashedKey<S = FxBuildHasher> {
    hasher: S,
}

impl<S> HashedKey<S> {
    pub fn with_hasher(hasher: S) -> Self {
        HashedKey { hasher }
    }
}

impl<T, S> KeyFn<T> for HashedKey<S>
where
    T: Hash + ?Sized,
    S: BuildHasher + Send + Sync,
{
    fn key_of(&self, value: &T) -> Key {
        self.hasher.hash_one(value) as Key
    }
}
