//! Typed, consume-once attributes carried by a [`Bootstrap`](crate::bootstrap::Bootstrap).
//!
//! Configuration transforms write attributes when a decision has to wait until
//! assembly time. The assembler reads every key exactly once with
//! [`AttributeStore::get_and_clear`], which always empties the slot, so a
//! bootstrap can never leak a stale decision into a later assembly pass.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Names one attribute slot and the type of value stored in it.
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

#[derive(Default)]
pub struct AttributeStore {
    entries: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing whatever the slot held before.
    pub fn set<T: Any + Send + Sync>(&mut self, key: AttributeKey<T>, value: T) {
        self.entries.insert(key.name, Box::new(value));
    }

    /// Removes and returns the value, if one of the right type is present.
    pub fn take<T: Any + Send + Sync>(&mut self, key: AttributeKey<T>) -> Option<T> {
        self.entries.remove(key.name).and_then(|value| value.downcast::<T>().ok()).map(|value| *value)
    }

    /// Reads the slot and clears it, falling back to `default` when it was empty.
    pub fn get_and_clear<T: Any + Send + Sync>(&mut self, key: AttributeKey<T>, default: T) -> T {
        self.take(key).unwrap_or(default)
    }

    pub fn get<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<&T> {
        self.entries.get(key.name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T>(&self, key: AttributeKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.entries.keys().collect::<Vec<_>>();
        keys.sort();
        f.debug_struct("AttributeStore").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: AttributeKey<usize> = AttributeKey::new("test.limit");
    const FLAG: AttributeKey<bool> = AttributeKey::new("test.flag");

    #[test]
    fn default_when_never_set() {
        let mut store = AttributeStore::new();
        assert_eq!(store.get_and_clear(LIMIT, 7), 7);
        assert!(store.is_empty());
    }

    #[test]
    fn value_is_read_at_most_once() {
        let mut store = AttributeStore::new();
        store.set(LIMIT, 42);

        assert_eq!(store.get_and_clear(LIMIT, 7), 42);
        assert_eq!(store.get_and_clear(LIMIT, 7), 7);
        assert!(!store.contains(LIMIT));
    }

    #[test]
    fn later_set_wins() {
        let mut store = AttributeStore::new();
        store.set(FLAG, false);
        store.set(FLAG, true);
        assert_eq!(store.len(), 1);
        assert!(store.get_and_clear(FLAG, false));
    }

    #[test]
    fn mistyped_value_is_cleared_as_absent() {
        const SAME_NAME: AttributeKey<String> = AttributeKey::new("test.limit");

        let mut store = AttributeStore::new();
        store.set(LIMIT, 42);

        assert_eq!(store.get_and_clear(SAME_NAME, "fallback".to_string()), "fallback");
        assert!(store.is_empty());
    }
}
