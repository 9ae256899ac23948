//! Computed values.
//!
//! A computed composes a [`Cell`] (what its readers subscribe to) with an
//! inner [`Reaction`] (what recomputes its cached result). The inner
//! reaction does not exist until the first tracked read: the cell's
//! become-observed hook constructs and runs it, and the armed
//! become-unobserved hook owns and disposes it. An unread computed costs
//! nothing, and one that loses all of its observers tears down its
//! upstream subscriptions at the end of the transaction.
//!
//! # Equality gating
//!
//! When a recomputation produces a value the comparator considers equal to
//! the cached one (and no error was cached), the cell is not notified.
//! Downstream work gated on referential stability never hears about the
//! non-change. An error transition always counts as a change.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::cell::{Cell, UnobservedHook};
use super::error::{EvalError, FatalError};
use super::reaction::Reaction;
use super::runtime::{default_runtime, Runtime};

/// Equality comparator for a computed's results.
pub type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Options for [`computed`] construction.
pub struct ComputedOptions<T> {
    /// Debug name, reported by structural-error panics.
    pub name: Option<String>,

    /// Change detector for recomputed values. Defaults to `PartialEq`.
    pub equals: Option<EqualsFn<T>>,
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self { name: None, equals: None }
    }
}

struct ComputedCore<T> {
    name: String,
    cell: Cell,
    evaluate: Box<dyn Fn() -> Result<T, EvalError> + Send + Sync>,
    equals: EqualsFn<T>,

    /// Cached outcome of the last recomputation. A valid value and a
    /// cached failure are mutually exclusive; `None` only before the
    /// first recomputation completes.
    cache: RwLock<Option<Result<T, EvalError>>>,

    /// Set while the become-observed hook drives the initial run. A cold
    /// run happens synchronously inside the first reader's observe; that
    /// reader has not looked at the cache yet and must not be invalidated
    /// by it.
    cold: AtomicBool,
}

impl<T> ComputedCore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// The inner reaction's body: evaluate under tracking, then decide
    /// whether the world needs to hear about it.
    ///
    /// A cold run fills the cache silently: it never notifies, it only
    /// captures the validation path for later pulls. Everyone else sees a
    /// warm run, which notifies on any change of outcome (an error always
    /// counts as a change).
    fn recompute(&self) -> Result<(), EvalError> {
        let cold = self.cold.load(Ordering::Relaxed);
        let changed = match (self.evaluate)() {
            Ok(value) => {
                let mut cache = self.cache.write();
                let unchanged = matches!(
                    cache.as_ref(),
                    Some(Ok(previous)) if (self.equals)(previous, &value)
                );
                if !unchanged {
                    *cache = Some(Ok(value));
                }
                !unchanged
            }
            Err(error) => {
                *self.cache.write() = Some(Err(error));
                true
            }
        };

        if cold {
            self.cell.capture_forward();
        } else if changed {
            self.cell.notify();
        }
        Ok(())
    }
}

/// A derived, memoized reactive value.
///
/// Reading a computed inside a reaction registers a dependency and drives
/// lazy validation: the expression re-runs only if one of its own
/// dependencies actually changed since the cached result was produced.
/// Outside any tracking context, [`get`](Computed::get) degrades to a
/// plain (non-memoized) evaluation.
///
/// Handles are cheap to clone and share the same cache.
pub struct Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    core: Arc<ComputedCore<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a computed on an explicit runtime.
    pub fn new_in(rt: &Runtime, evaluate: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_options_in(rt, move || Ok(evaluate()), ComputedOptions::default())
    }

    /// Create a fallible computed on an explicit runtime.
    ///
    /// A returned `Err` is cached and handed to every reader until a later
    /// evaluation succeeds.
    pub fn try_new_in(
        rt: &Runtime,
        evaluate: impl Fn() -> Result<T, EvalError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_options_in(rt, evaluate, ComputedOptions::default())
    }

    /// Create a computed with explicit options.
    pub fn with_options_in(
        rt: &Runtime,
        evaluate: impl Fn() -> Result<T, EvalError> + Send + Sync + 'static,
        options: ComputedOptions<T>,
    ) -> Self {
        let name = options.name.unwrap_or_else(|| "computed".to_string());
        let equals = options
            .equals
            .unwrap_or_else(|| Box::new(|a: &T, b: &T| a == b));

        let rt = rt.clone();
        let core = Arc::new_cyclic(|weak: &Weak<ComputedCore<T>>| {
            let hook_core = weak.clone();
            let hook_rt = rt.clone();
            let hook_name = name.clone();

            // The become-observed hook spins up the inner reaction; the
            // armed become-unobserved hook owns it and tears it down.
            let cell = Cell::with_hook_in(&rt, move || {
                let body_core = hook_core.clone();
                let reaction = Reaction::new(
                    hook_rt.clone(),
                    hook_name.clone(),
                    Box::new(move || match body_core.upgrade() {
                        Some(core) => core.recompute(),
                        None => Ok(()),
                    }),
                    None,
                );
                if let Some(core) = hook_core.upgrade() {
                    core.cold.store(true, Ordering::Relaxed);
                }
                reaction.run();
                if let Some(core) = hook_core.upgrade() {
                    core.cold.store(false, Ordering::Relaxed);
                }
                let unhook: UnobservedHook = Box::new(move || reaction.dispose());
                unhook
            });

            ComputedCore {
                name,
                cell,
                evaluate: Box::new(evaluate),
                equals,
                cache: RwLock::new(None),
                cold: AtomicBool::new(false),
            }
        });

        Self { core }
    }

    /// Get the current value, re-evaluating only when necessary.
    ///
    /// Like [`try_get`](Computed::try_get), but panics if the evaluation
    /// failed. Prefer `try_get` inside other reactive computations so
    /// failures can flow through the graph as values.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(error) => panic!("computed `{}` failed: {error}", self.core.name),
        }
    }

    /// Get the current value or the cached evaluation failure.
    ///
    /// Outside any tracking context this evaluates the raw expression
    /// untracked, so a computed stays usable as a plain getter at the cost
    /// of memoization for that call.
    pub fn try_get(&self) -> Result<T, EvalError> {
        if !self.core.cell.observe() {
            return (self.core.evaluate)();
        }

        let cache = self.core.cache.read();
        match cache.as_ref() {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(error)) => Err(Arc::clone(error)),
            // Validation completed without filling the cache: the only way
            // here is an evaluation further up the stack reading its own
            // output.
            None => panic!("{}", FatalError::CircularDependency(self.core.name.clone())),
        }
    }

    /// Whether any reaction currently depends on this computed.
    pub fn is_observed(&self) -> bool {
        self.core.cell.is_observed()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core) }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.core.name)
            .field("observed", &self.is_observed())
            .finish()
    }
}

/// Create a derived, memoized value on the default runtime.
///
/// The expression does not run until the first tracked read.
pub fn computed<T>(evaluate: impl Fn() -> T + Send + Sync + 'static) -> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Computed::new_in(default_runtime(), evaluate)
}

/// [`computed`] for fallible expressions.
pub fn try_computed<T>(
    evaluate: impl Fn() -> Result<T, EvalError> + Send + Sync + 'static,
) -> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Computed::try_new_in(default_runtime(), evaluate)
}
