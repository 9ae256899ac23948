//! Runtime scheduler.
//!
//! The runtime owns the pieces of shared scheduling state the rest of the
//! graph hangs off:
//!
//! - a monotonically increasing **epoch**, bumped once per flush, against
//!   which reactions stamp their freshness
//! - the **invalidated queue** of reactions waiting to be validated, in
//!   invalidation order
//! - the **batch depth**, so nested transactions coalesce into a single
//!   flush at the outermost boundary
//! - the **pending disposal** set of cells that lost their last observer
//!   mid-flush, whose teardown hooks run only once the flush settles
//!
//! # How It Works
//!
//! A flush advances the epoch, then drains the invalidated queue front to
//! back, asking each reaction to actualize itself. Actualizing can
//! invalidate further reactions; those land at the back of the same queue
//! and are drained in the same flush, so one flush always runs the graph
//! to quiescence. Deferred disposals run after the queue empties, which
//! lets a dependency that is dropped and re-acquired inside one flush
//! keep its subscriptions alive.
//!
//! Multiple runtimes are fully independent: batching on one never defers
//! flushes on another.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::cell::{CellCore, CellId};
use super::observer::{Observer, ObserverId};

struct RuntimeInner {
    /// Current epoch. Starts at 1 so a freshly created reaction (mark 0)
    /// is distinguishable from an up-to-date one.
    epoch: AtomicU64,
    batch_depth: AtomicU32,
    invalidated: Mutex<IndexMap<ObserverId, Weak<dyn Observer>>>,
    pending_dispose: Mutex<IndexMap<CellId, Weak<CellCore>>>,
}

/// A reactive scheduling domain.
///
/// Cheap to clone; clones share the same scheduler state. Most code uses
/// [`default_runtime`] implicitly through the free constructors, but tests
/// and embedders can create isolated runtimes with [`Runtime::new`].
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create an isolated runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                epoch: AtomicU64::new(1),
                batch_depth: AtomicU32::new(0),
                invalidated: Mutex::new(IndexMap::new()),
                pending_dispose: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// Run `action` as a transaction.
    ///
    /// Writes made inside the transaction invalidate dependents but do not
    /// flush; the flush happens once, when the outermost transaction ends.
    /// Nested calls are free.
    pub fn batch<R>(&self, action: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        let guard = BatchGuard { rt: self };
        let result = action();
        drop(guard);
        if !self.in_batch() {
            self.flush();
        }
        result
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn in_batch(&self) -> bool {
        self.inner.batch_depth.load(Ordering::SeqCst) > 0
    }

    /// Queue an invalidated reaction for the next flush.
    pub(crate) fn enqueue(&self, id: ObserverId, observer: Weak<dyn Observer>) {
        self.inner.invalidated.lock().entry(id).or_insert(observer);
    }

    /// Remove a reaction from the queue, if present.
    pub(crate) fn dequeue(&self, id: ObserverId) {
        self.inner.invalidated.lock().shift_remove(&id);
    }

    /// Defer a cell's become-unobserved hook to the end of the flush.
    pub(crate) fn schedule_dispose(&self, cell: &Arc<CellCore>) {
        self.inner
            .pending_dispose
            .lock()
            .insert(cell.id(), Arc::downgrade(cell));
    }

    /// Cancel a deferred disposal. Returns whether one was pending, in
    /// which case the cell's subscriptions never actually lapsed.
    pub(crate) fn cancel_dispose(&self, id: CellId) -> bool {
        self.inner.pending_dispose.lock().shift_remove(&id).is_some()
    }

    /// Drain the invalidated queue until the graph is quiescent, then run
    /// deferred disposals.
    pub(crate) fn flush(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(epoch = self.epoch(), "flush");

        // Reactions validated here may read cells and trigger further
        // invalidations; the raised depth keeps those from re-entering.
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        loop {
            let next = self.inner.invalidated.lock().shift_remove_index(0);
            let Some((_, observer)) = next else { break };
            if let Some(observer) = observer.upgrade() {
                observer.actualize();
            }
        }
        self.collect_unobserved();
        self.inner.batch_depth.fetch_sub(1, Ordering::SeqCst);
    }

    /// Run every deferred become-unobserved hook.
    pub(crate) fn collect_unobserved(&self) {
        loop {
            let next = self.inner.pending_dispose.lock().shift_remove_index(0);
            let Some((_, cell)) = next else { break };
            if let Some(cell) = cell.upgrade() {
                cell.fire_unobserved();
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("epoch", &self.epoch())
            .field("in_batch", &self.in_batch())
            .finish()
    }
}

/// Keeps the batch depth honest across unwinds. The flush itself happens
/// in [`Runtime::batch`] only on the normal path; a panicking transaction
/// leaves the queue for the next flush instead of running user code during
/// unwind.
struct BatchGuard<'a> {
    rt: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.rt.inner.batch_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

static DEFAULT: OnceLock<Runtime> = OnceLock::new();

/// The process-wide default runtime.
pub fn default_runtime() -> &'static Runtime {
    DEFAULT.get_or_init(Runtime::new)
}

/// Run `action` as a transaction on the default runtime.
pub fn batch<R>(action: impl FnOnce() -> R) -> R {
    default_runtime().batch(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::reaction::Autorun;
    use crate::reactive::signal::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn batch_coalesces_writes_into_one_rerun() {
        let rt = Runtime::new();
        let a = Signal::new_in(&rt, 1);
        let b = Signal::new_in(&rt, 2);
        let runs = Arc::new(AtomicI32::new(0));
        let sum = Arc::new(AtomicI32::new(0));

        let _autorun = {
            let a = a.clone();
            let b = b.clone();
            let runs = runs.clone();
            let sum = sum.clone();
            Autorun::new_in(&rt, move || {
                runs.fetch_add(1, Ordering::SeqCst);
                sum.store(a.get() + b.get(), Ordering::SeqCst);
            })
        };
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        rt.batch(|| {
            a.set(10);
            b.set(20);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(sum.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn nested_batches_flush_once_at_the_outermost() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 0);
        let runs = Arc::new(AtomicI32::new(0));

        let _autorun = {
            let signal = signal.clone();
            let runs = runs.clone();
            Autorun::new_in(&rt, move || {
                signal.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };

        rt.batch(|| {
            signal.set(1);
            rt.batch(|| {
                signal.set(2);
            });
            // Inner batch end must not flush.
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            signal.set(3);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn runtimes_are_isolated() {
        let rt1 = Runtime::new();
        let rt2 = Runtime::new();
        let signal = Signal::new_in(&rt1, 0);
        let runs = Arc::new(AtomicI32::new(0));

        let _autorun = {
            let signal = signal.clone();
            let runs = runs.clone();
            Autorun::new_in(&rt1, move || {
                signal.get();
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // A batch on rt2 must not defer rt1's flush.
        rt2.batch(|| {
            signal.set(1);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn writes_without_a_batch_flush_immediately() {
        let rt = Runtime::new();
        let signal = Signal::new_in(&rt, 0);
        let seen = Arc::new(AtomicI32::new(-1));

        let _autorun = {
            let signal = signal.clone();
            let seen = seen.clone();
            Autorun::new_in(&rt, move || {
                seen.store(signal.get(), Ordering::SeqCst);
            })
        };

        signal.set(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn batch_returns_the_action_result() {
        let rt = Runtime::new();
        let result = rt.batch(|| 5 * 5);
        assert_eq!(result, 25);
    }
}
