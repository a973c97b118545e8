//! Keyed client collections used for routing.
//!
//! Two flavors back the server's three indexes:
//!
//! - [`UniqueIndex`]: one value per key (sessions by session id, sessions by
//!   declared id). Registering an existing key replaces the binding.
//! - [`MultiIndex`]: a set of values per key (sessions by declared type).
//!   Removing the last member leaves an empty set under the key; the key
//!   only disappears through [`MultiIndex::remove_key`].
//!
//! ```text
//! by_type: {
//!     "TRG": [ session-a, session-b ],
//!     "EXP": [ session-c ],
//!     "VP":  [ ],                      <- emptied, key kept
//! }
//! ```
//!
//! Values that can receive a frame implement [`Recipient`], which is what
//! the broadcast helpers write through.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use crate::constants::BROADCAST_ALL;

/// Something a text frame can be delivered to.
pub trait Recipient {
    /// Deliver one frame. Returns `false` if the recipient is gone.
    fn deliver(&self, payload: &str) -> bool;
}

impl<T: Recipient + ?Sized> Recipient for std::sync::Arc<T> {
    fn deliver(&self, payload: &str) -> bool {
        (**self).deliver(payload)
    }
}

/// Which part of a multi index a broadcast reaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BroadcastTarget {
    /// Every value under every key.
    All,
    /// Only the set bound to this key.
    Key(String),
}

impl From<&str> for BroadcastTarget {
    fn from(s: &str) -> Self {
        if s == BROADCAST_ALL {
            Self::All
        } else {
            Self::Key(s.to_string())
        }
    }
}

impl From<String> for BroadcastTarget {
    fn from(s: String) -> Self {
        if s == BROADCAST_ALL {
            Self::All
        } else {
            Self::Key(s)
        }
    }
}

impl std::fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "{BROADCAST_ALL}"),
            Self::Key(key) => write!(f, "{key}"),
        }
    }
}

/// Key → single value.
#[derive(Debug, Clone)]
pub struct UniqueIndex<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for UniqueIndex<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> UniqueIndex<K, V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `value`, returning the binding it replaced.
    pub fn register(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Remove the binding for `key`.
    pub fn deregister<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key)
    }

    /// Whether `key` is bound.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Value bound to `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Iterate all values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Iterate all bindings.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V: Recipient> UniqueIndex<K, V> {
    /// Deliver `payload` to every value. Returns the number reached.
    pub fn broadcast(&self, payload: &str) -> usize {
        self.values().filter(|v| v.deliver(payload)).count()
    }
}

/// Key → set of values.
#[derive(Debug, Clone)]
pub struct MultiIndex<K, V> {
    entries: HashMap<K, Vec<V>>,
}

impl<K, V> Default for MultiIndex<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: PartialEq> MultiIndex<K, V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the set at `key`, creating the set if absent.
    ///
    /// Values already in the set are not duplicated.
    pub fn register(&mut self, key: K, value: V) {
        let set = self.entries.entry(key).or_default();
        if !set.contains(&value) {
            set.push(value);
        }
    }

    /// Remove `value` from the set at `key`. Returns whether it was present.
    pub fn deregister<Q>(&mut self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(set) = self.entries.get_mut(key) else {
            return false;
        };
        let before = set.len();
        set.retain(|v| v != value);
        set.len() != before
    }

    /// Drop the whole set at `key`.
    pub fn remove_key<Q>(&mut self, key: &Q) -> Option<Vec<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key)
    }

    /// Whether `key` has a set (possibly empty).
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Members of the set at `key`, empty if the key is unknown.
    pub fn get<Q>(&self, key: &Q) -> &[V]
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of members at `key`.
    pub fn count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).len()
    }

    /// Iterate every member across every key.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values().flatten()
    }

    /// Iterate the keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

impl<V: PartialEq + Recipient> MultiIndex<String, V> {
    /// Deliver `payload` to the members selected by `target`.
    ///
    /// An unknown key reaches nobody. Returns the number reached.
    pub fn broadcast(&self, payload: &str, target: &BroadcastTarget) -> usize {
        match target {
            BroadcastTarget::All => self.values().filter(|v| v.deliver(payload)).count(),
            BroadcastTarget::Key(key) => self
                .get(key.as_str())
                .iter()
                .filter(|v| v.deliver(payload))
                .count(),
        }
    }
}
