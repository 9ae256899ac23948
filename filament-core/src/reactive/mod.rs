//! Fine-grained reactive runtime.
//!
//! The reactive layer is built from a small set of pieces:
//!
//! - [`Cell`]: the unit of observability. Carries no value, only a
//!   subscriber map, a change notification, and optional lifecycle hooks.
//! - [`Signal`]: a cell paired with a typed value slot.
//! - [`Computed`]: a cell paired with a lazy, memoizing inner reaction.
//! - [`autorun`] / [`Autorun`]: an eager reaction that re-runs after each
//!   change to anything it read.
//! - [`Runtime`]: the scheduler. Owns the epoch counter, the invalidation
//!   queue, batch depth, and deferred disposals.
//!
//! Changes propagate push-pull: a write pushes invalidation markers down
//! the dependency graph, and the subsequent flush pulls validation back up
//! through it, re-running only computations whose inputs actually changed.
//! [`batch`] coalesces any number of writes into a single flush.

mod cell;
mod computed;
mod context;
mod error;
mod observer;
mod reaction;
mod runtime;
mod signal;

pub use cell::{Cell, UnobservedHook};
pub use computed::{computed, try_computed, Computed, ComputedOptions, EqualsFn};
pub use context::untracked;
pub use error::{EvalError, FatalError};
pub use reaction::{autorun, try_autorun, Autorun, AutorunOptions, ErrorSink};
pub use runtime::{batch, default_runtime, Runtime};
pub use signal::Signal;
