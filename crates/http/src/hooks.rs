//! Before/after lifecycle callbacks composed like configuration chains.
//!
//! Hooks are stored as an ordered list of `(before, after)` pairs. Before-hooks
//! run in registration order and after-hooks in reverse, so a hook registered
//! later is nested inside every hook registered earlier:
//!
//! ```text
//! A.before -> B.before -> <exchange> -> B.after -> A.after
//! ```
//!
//! A hook that returns an error or panics stops the walk and is reported as a
//! [`HookError`] naming the phase.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

use crate::channel::Connection;
use crate::config::Chain;
use crate::protocol::{BoxError, HookError};
use crate::utils::panic_message;

pub type Hook<T> = Arc<dyn Fn(&T, &Connection) -> Result<(), BoxError> + Send + Sync>;

pub struct HookPair<T> {
    before: Option<Hook<T>>,
    after: Option<Hook<T>>,
}

impl<T> Clone for HookPair<T> {
    fn clone(&self) -> Self {
        Self { before: self.before.clone(), after: self.after.clone() }
    }
}

pub struct LifecycleHooks<T> {
    chain: Chain<HookPair<T>>,
}

impl<T> LifecycleHooks<T> {
    pub const fn new() -> Self {
        Self { chain: Chain::new() }
    }

    #[must_use]
    pub fn with_before<F>(&self, hook: F) -> Self
    where
        F: Fn(&T, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.push(Some(Arc::new(hook)), None)
    }

    #[must_use]
    pub fn with_after<F>(&self, hook: F) -> Self
    where
        F: Fn(&T, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.push(None, Some(Arc::new(hook)))
    }

    #[must_use]
    pub fn with_pair<B, A>(&self, before: B, after: A) -> Self
    where
        B: Fn(&T, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
        A: Fn(&T, &Connection) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.push(Some(Arc::new(before)), Some(Arc::new(after)))
    }

    /// Combines hooks from independently built fragments; `other` nests inside `self`.
    #[must_use]
    pub fn concat(&self, other: &LifecycleHooks<T>) -> Self {
        Self { chain: self.chain.concat(&other.chain) }
    }

    fn push(&self, before: Option<Hook<T>>, after: Option<Hook<T>>) -> Self {
        Self { chain: self.chain.push(HookPair { before, after }) }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn fire_before(&self, phase: &'static str, target: &T, connection: &Connection) -> Result<(), HookError> {
        for hook in self.chain.iter().filter_map(|pair| pair.before.as_ref()) {
            invoke(phase, hook, target, connection)?;
        }
        Ok(())
    }

    pub fn fire_after(&self, phase: &'static str, target: &T, connection: &Connection) -> Result<(), HookError> {
        for hook in self.chain.iter().rev().filter_map(|pair| pair.after.as_ref()) {
            invoke(phase, hook, target, connection)?;
        }
        Ok(())
    }
}

fn invoke<T>(phase: &'static str, hook: &Hook<T>, target: &T, connection: &Connection) -> Result<(), HookError> {
    match catch_unwind(AssertUnwindSafe(|| hook(target, connection))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(phase, connection_id = connection.id(), cause = %e, "hook failed");
            Err(HookError::new(phase, e))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(phase, connection_id = connection.id(), %message, "hook panicked");
            Err(HookError::new(phase, message))
        }
    }
}

impl<T> Clone for LifecycleHooks<T> {
    fn clone(&self) -> Self {
        Self { chain: self.chain.clone() }
    }
}

impl<T> Default for LifecycleHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LifecycleHooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks").field("pairs", &self.chain.len()).finish()
    }
}
