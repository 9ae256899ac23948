//! Filament Core
//!
//! This crate provides a fine-grained reactive runtime: observable state,
//! derived values, and eager reactions, with transactional batching and
//! glitch-free change propagation. It implements:
//!
//! - Reactive primitives (cells, signals, computed values, autoruns)
//! - Epoch-based push-pull invalidation and validation
//! - Transactional batching with a single coalesced flush
//! - Deferred lifecycle hooks for lazy resource setup and teardown
//!
//! # Architecture
//!
//! Everything lives under the `reactive` module:
//!
//! - `Cell`: the raw unit of observability, value-free
//! - `Signal`: a cell paired with a typed value slot
//! - `Computed`: a lazy, memoized derived value
//! - `autorun`: an eager reaction that re-runs after relevant changes
//! - `Runtime`: the scheduler shared by all of the above
//!
//! # Example
//!
//! ```rust
//! use filament_core::reactive::{autorun, batch, computed, Signal};
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! let count = Signal::new(1);
//! let doubled = {
//!     let count = count.clone();
//!     computed(move || count.get() * 2)
//! };
//!
//! let seen = Arc::new(AtomicI64::new(0));
//! let _watch = {
//!     let doubled = doubled.clone();
//!     let seen = seen.clone();
//!     autorun(move || {
//!         seen.store(doubled.get(), Ordering::SeqCst);
//!     })
//! };
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//!
//! // Two writes, one flush, one rerun.
//! batch(|| {
//!     count.set(10);
//!     count.set(21);
//! });
//! assert_eq!(seen.load(Ordering::SeqCst), 42);
//! ```

pub mod reactive;
