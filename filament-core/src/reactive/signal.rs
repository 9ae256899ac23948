//! Typed signal.
//!
//! A signal pairs a [`Cell`] with a value slot. Reading it inside a
//! reaction registers the dependency; writing it invalidates every
//! dependent. Signals are raw sources and perform no equality gating:
//! every `set` notifies, and deduplicating no-op changes is the job of the
//! computed layer.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::cell::Cell;
use super::runtime::{default_runtime, Runtime};

/// A reactive value container.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value (tracked inside a reaction)
/// let value = count.get();
///
/// // Update the value (notifies dependents)
/// count.set(5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Cell,
    value: Arc<RwLock<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal on the default runtime.
    pub fn new(value: T) -> Self {
        Self::new_in(default_runtime(), value)
    }

    /// Create a new signal on an explicit runtime.
    pub fn new_in(rt: &Runtime, value: T) -> Self {
        Self {
            cell: Cell::new_in(rt),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Get the current value.
    ///
    /// Inside a reaction this registers the signal as a dependency; outside
    /// any tracking context it degrades to a plain read.
    pub fn get(&self) -> T {
        self.cell.observe();
        self.value.read().clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value under tracking, without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.observe();
        f(&self.value.read())
    }

    /// Replace the value and notify dependents.
    pub fn set(&self, value: T) {
        {
            let mut slot = self.value.write();
            *slot = value;
        }
        self.cell.notify();
    }

    /// Update the value from the current one and notify dependents.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = {
            let slot = self.value.read();
            f(&slot)
        };
        self.set(next);
    }

    /// Whether any reaction currently depends on this signal.
    pub fn is_observed(&self) -> bool {
        self.cell.is_observed()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &self.get_untracked())
            .field("observed", &self.is_observed())
            .finish()
    }
}
