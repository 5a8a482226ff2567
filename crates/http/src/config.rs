//! Persistent configuration chains.
//!
//! Every public configuration call produces a new [`ConfigChain`] that shares
//! its parent and adds one transform. Nothing is applied until
//! [`ConfigChain::materialize`] walks the chain root-to-tip over a fresh
//! [`Bootstrap`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{error, trace};

use crate::bootstrap::Bootstrap;
use crate::protocol::ConfigError;
use crate::utils::panic_message;

struct Node<T> {
    parent: Option<Arc<Node<T>>>,
    value: T,
}

/// An immutable singly-linked list that only grows at the tip.
///
/// `push` never touches the receiver: the new chain points at the old tip, so
/// any number of chains can share a common prefix.
pub struct Chain<T> {
    tip: Option<Arc<Node<T>>>,
    len: usize,
}

impl<T> Chain<T> {
    pub const fn new() -> Self {
        Self { tip: None, len: 0 }
    }

    #[must_use]
    pub fn push(&self, value: T) -> Self {
        let node = Node { parent: self.tip.clone(), value };
        Self { tip: Some(Arc::new(node)), len: self.len + 1 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in registration order, root first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        let mut values = Vec::with_capacity(self.len);
        let mut current = self.tip.as_deref();
        while let Some(node) = current {
            values.push(&node.value);
            current = node.parent.as_deref();
        }
        values.into_iter().rev()
    }
}

impl<T: Clone> Chain<T> {
    /// Appends the entries of `other` after the entries of `self`.
    #[must_use]
    pub fn concat(&self, other: &Chain<T>) -> Self {
        other.iter().fold(self.clone(), |chain, value| chain.push(value.clone()))
    }
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self { tip: self.tip.clone(), len: self.len }
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.len).finish()
    }
}

pub type Transform = Arc<dyn Fn(Bootstrap) -> Result<Bootstrap, ConfigError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ConfigChain {
    chain: Chain<Transform>,
}

impl ConfigChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new chain with `transform` appended; `self` is unaffected.
    #[must_use]
    pub fn with_option<F>(&self, transform: F) -> Self
    where
        F: Fn(Bootstrap) -> Result<Bootstrap, ConfigError> + Send + Sync + 'static,
    {
        Self { chain: self.chain.push(Arc::new(transform)) }
    }

    /// Like [`with_option`](Self::with_option) for transforms that can't fail.
    #[must_use]
    pub fn map<F>(&self, transform: F) -> Self
    where
        F: Fn(Bootstrap) -> Bootstrap + Send + Sync + 'static,
    {
        self.with_option(move |bootstrap| Ok(transform(bootstrap)))
    }

    #[must_use]
    pub fn concat(&self, other: &ConfigChain) -> Self {
        Self { chain: self.chain.concat(&other.chain) }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Applies every transform in registration order to `fresh`.
    ///
    /// The first failing or panicking transform aborts the pass and the
    /// partially configured bootstrap is dropped with it.
    pub fn materialize(&self, fresh: Bootstrap) -> Result<Bootstrap, ConfigError> {
        let mut bootstrap = fresh;
        for (index, transform) in self.chain.iter().enumerate() {
            bootstrap = match catch_unwind(AssertUnwindSafe(|| transform(bootstrap))) {
                Ok(Ok(next)) => next,
                Ok(Err(e)) => {
                    error!(index, cause = %e, "configuration transform failed");
                    return Err(e);
                }
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(index, %reason, "configuration transform panicked");
                    return Err(ConfigError::transform(reason));
                }
            };
        }
        trace!(transforms = self.chain.len(), "configuration materialized");
        Ok(bootstrap)
    }
}

impl fmt::Debug for ConfigChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigChain").field("transforms", &self.chain.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttributeKey;

    const TRACE: AttributeKey<Vec<u32>> = AttributeKey::new("test.trace");
    const LIMIT: AttributeKey<usize> = AttributeKey::new("test.limit");

    fn record(step: u32) -> impl Fn(Bootstrap) -> Bootstrap + Send + Sync + 'static {
        move |mut bootstrap| {
            let mut trace = bootstrap.attrs_mut().take(TRACE).unwrap_or_default();
            trace.push(step);
            bootstrap.attr(TRACE, trace)
        }
    }

    #[test]
    fn push_leaves_parent_untouched() {
        let root = Chain::new().push(1).push(2);
        let left = root.push(3);
        let right = root.push(4);

        assert_eq!(root.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(left.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(right.iter().copied().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn concat_keeps_fragment_order() {
        let a = Chain::new().push("a1").push("a2");
        let b = Chain::new().push("b1");
        assert_eq!(a.concat(&b).iter().copied().collect::<Vec<_>>(), vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn materialize_applies_root_to_tip() {
        let chain = ConfigChain::new().map(record(1)).map(record(2)).map(record(3));
        let mut bootstrap = chain.materialize(Bootstrap::server()).unwrap();
        assert_eq!(bootstrap.attrs_mut().take(TRACE), Some(vec![1, 2, 3]));
    }

    #[test]
    fn same_transforms_materialize_identically() {
        let build = || ConfigChain::new().map(record(1)).map(|b| b.attr(LIMIT, 25).wiretap(true)).map(record(2));

        let first = build().materialize(Bootstrap::server()).unwrap();
        let second = build().materialize(Bootstrap::server()).unwrap();

        assert_eq!(first.attrs().get(TRACE), second.attrs().get(TRACE));
        assert_eq!(first.attrs().get(LIMIT), second.attrs().get(LIMIT));
        assert_eq!(first.is_wiretap(), second.is_wiretap());
    }

    #[test]
    fn with_option_returns_distinct_value() {
        let base = ConfigChain::new().map(record(1));
        let extended = base.map(record(2));

        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);

        let mut bootstrap = base.materialize(Bootstrap::server()).unwrap();
        assert_eq!(bootstrap.attrs_mut().take(TRACE), Some(vec![1]));
    }

    #[test]
    fn failing_transform_aborts() {
        let chain = ConfigChain::new()
            .map(record(1))
            .with_option(|_| Err(ConfigError::invalid_threshold("test.limit", "negative")))
            .map(|_| panic!("never reached"));

        let err = chain.materialize(Bootstrap::server()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { name: "test.limit", .. }));
    }

    #[test]
    fn panicking_transform_is_a_config_error() {
        let chain = ConfigChain::new().map(|_| panic!("boom"));
        let err = chain.materialize(Bootstrap::server()).unwrap_err();
        assert!(matches!(err, ConfigError::Transform { ref reason } if reason == "boom"));
    }
}
