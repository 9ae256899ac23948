//! Observable cell.
//!
//! A cell is the unit of observability: it has no value of its own, only a
//! subscriber map and a change notification. Reading a cell inside a
//! reaction registers a dependency edge; notifying a cell invalidates every
//! registered reaction.
//!
//! # Lifecycle hooks
//!
//! A cell may carry a become-observed hook. It fires on the transition from
//! zero subscribers to one and returns the become-unobserved hook to arm for
//! the reverse transition. The reverse hook does not fire synchronously on
//! the last unsubscribe: it is deferred to the end of the current
//! transaction, because code frequently unsubscribes and resubscribes within
//! one batch and a net-zero transition should fire neither hook. Computed
//! values build their entire lazy lifecycle on this pair.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::context;
use super::observer::{Observer, ObserverId};
use super::runtime::{default_runtime, Runtime};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

impl CellId {
    fn new() -> Self {
        Self(CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The become-unobserved hook armed while a cell is observed.
pub type UnobservedHook = Box<dyn FnOnce() + Send>;

/// The become-observed hook: fires on the empty-to-non-empty subscriber
/// transition and returns the hook to arm for the reverse transition.
type ObservedHook = Box<dyn FnMut() -> UnobservedHook + Send>;

/// Shared state behind a [`Cell`] handle.
///
/// Reactions hold their dependencies as strong references to this core;
/// the core holds its observers weakly, so dropping every handle to a
/// reaction tears the edge down without reference cycles.
pub struct CellCore {
    id: CellId,
    rt: Runtime,

    /// Subscribers keyed by observer identity, in registration order.
    observers: RwLock<IndexMap<ObserverId, Weak<dyn Observer>>>,

    /// Fires when the cell gains its first subscriber.
    observed_hook: Mutex<Option<ObservedHook>>,

    /// Armed by the observed hook; fired (deferred) when the last
    /// subscriber unlinks.
    unobserved_hook: Mutex<Option<UnobservedHook>>,

    /// The actualize capability captured from whichever computation raised
    /// the most recent change. Pulls through this cell are forwarded here,
    /// which lets validation walk a chain of computed values.
    forward: RwLock<Option<Weak<dyn Observer>>>,
}

impl CellCore {
    fn new(rt: Runtime, observed_hook: Option<ObservedHook>) -> Arc<Self> {
        Arc::new(Self {
            id: CellId::new(),
            rt,
            observers: RwLock::new(IndexMap::new()),
            observed_hook: Mutex::new(observed_hook),
            unobserved_hook: Mutex::new(None),
            forward: RwLock::new(None),
        })
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Register the currently running reaction as a subscriber.
    ///
    /// Returns false when no tracking frame is active, in which case the
    /// caller falls back to an untracked read.
    ///
    /// The observer is registered before the become-observed hook runs.
    /// The hook may recursively evaluate user code (a computed spins up its
    /// inner reaction here), and if that evaluation reads this very cell
    /// again it must find the map non-empty, otherwise the hook would
    /// re-enter itself forever instead of surfacing a cycle.
    pub fn observe(self: &Arc<Self>) -> bool {
        let Some(frame) = context::current() else {
            return false;
        };

        let first = {
            let mut observers = self.observers.write();
            let first = observers.is_empty();
            observers
                .entry(frame.id())
                .or_insert_with(|| Arc::downgrade(&frame));
            first
        };

        if first && !self.rt.cancel_dispose(self.id) {
            let mut observed_hook = self.observed_hook.lock();
            if let Some(hook) = observed_hook.as_mut() {
                let armed = hook();
                *self.unobserved_hook.lock() = Some(armed);
            }
        }

        frame.link(Arc::clone(self));
        self.pull();
        true
    }

    /// Invalidate every subscriber and flush if no transaction is open.
    ///
    /// Also captures the innermost frame as the forwarding target for later
    /// pulls: when a computed's own recomputation raises the change, that
    /// computed's reaction is what downstream validation must delegate to.
    pub fn notify(&self) {
        self.capture_forward();

        let observers: Vec<Arc<dyn Observer>> = {
            let mut observers = self.observers.write();
            observers.retain(|_, weak| weak.strong_count() > 0);
            observers.values().filter_map(Weak::upgrade).collect()
        };
        for observer in &observers {
            observer.invalidate();
        }

        if !self.rt.in_batch() {
            self.rt.flush();
        }
    }

    /// Capture the innermost frame as the forwarding target without
    /// notifying anyone. Used when a value is produced for the first time:
    /// no subscriber can hold a stale copy yet, but later pulls still need
    /// a validation path to the producing computation.
    pub fn capture_forward(&self) {
        *self.forward.write() = context::current_weak();
    }

    /// Forward a pull through the captured actualize capability, if any.
    pub fn pull(&self) {
        let forward = self.forward.read().clone();
        if let Some(observer) = forward.and_then(|weak| weak.upgrade()) {
            observer.actualize();
        }
    }

    /// Remove a subscriber; on the last removal, schedule the armed
    /// become-unobserved hook for deferred execution.
    pub fn unlink(self: &Arc<Self>, observer: ObserverId) {
        let now_empty = {
            let mut observers = self.observers.write();
            observers.shift_remove(&observer);
            observers.is_empty()
        };
        if now_empty && self.unobserved_hook.lock().is_some() {
            self.rt.schedule_dispose(self);
        }
    }

    /// Fire the armed become-unobserved hook, at most once per transition.
    pub fn fire_unobserved(&self) {
        let hook = self.unobserved_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_observed(&self) -> bool {
        !self.observers.read().is_empty()
    }
}

/// A trackable unit of state exposing observe/notify.
///
/// Cells carry no value. A [`Signal`](super::Signal) pairs a cell with a
/// typed slot; a [`Computed`](super::Computed) pairs one with a memoizing
/// reaction. Handles are cheap to clone and share the same core.
pub struct Cell {
    core: Arc<CellCore>,
}

impl Cell {
    /// Create a cell on the default runtime.
    pub fn new() -> Self {
        Self::new_in(default_runtime())
    }

    /// Create a cell on an explicit runtime.
    pub fn new_in(rt: &Runtime) -> Self {
        Self { core: CellCore::new(rt.clone(), None) }
    }

    /// Create a cell with a become-observed hook on the default runtime.
    pub fn with_hook(hook: impl FnMut() -> UnobservedHook + Send + 'static) -> Self {
        Self::with_hook_in(default_runtime(), hook)
    }

    /// Create a cell with a become-observed hook.
    ///
    /// The hook fires when the cell gains its first subscriber and returns
    /// the closure to run once the cell loses its last one. The pair fires
    /// at most once per observed/unobserved transition, and an unsubscribe
    /// immediately followed by a resubscribe within one batch fires
    /// neither.
    pub fn with_hook_in(rt: &Runtime, hook: impl FnMut() -> UnobservedHook + Send + 'static) -> Self {
        Self { core: CellCore::new(rt.clone(), Some(Box::new(hook))) }
    }

    /// Register the currently running reaction as a subscriber.
    ///
    /// Returns false when called outside any tracking context; the caller
    /// should then fall back to an untracked read.
    pub fn observe(&self) -> bool {
        self.core.observe()
    }

    /// Signal that the state this cell stands for has changed.
    ///
    /// Every subscriber is invalidated; outside a batch this flushes
    /// immediately.
    pub fn notify(&self) {
        self.core.notify();
    }

    /// Whether the cell currently has any subscribers.
    pub fn is_observed(&self) -> bool {
        self.core.is_observed()
    }

    pub(crate) fn capture_forward(&self) {
        self.core.capture_forward();
    }

    pub(crate) fn core(&self) -> &Arc<CellCore> {
        &self.core
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Cell {
    fn clone(&self) -> Self {
        Self { core: Arc::clone(&self.core) }
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.core.id)
            .field("observed", &self.is_observed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::FrameGuard;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockObserver {
        id: ObserverId,
        linked: Mutex<Vec<CellId>>,
        invalidated: AtomicUsize,
    }

    impl MockObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ObserverId::new(),
                linked: Mutex::new(Vec::new()),
                invalidated: AtomicUsize::new(0),
            })
        }
    }

    impl Observer for MockObserver {
        fn id(&self) -> ObserverId {
            self.id
        }

        fn link(&self, dep: Arc<CellCore>) {
            self.linked.lock().push(dep.id());
        }

        fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }

        fn actualize(&self) {}
    }

    #[test]
    fn observe_outside_context_returns_false() {
        let cell = Cell::new();
        assert!(!cell.observe());
        assert!(!cell.is_observed());
    }

    #[test]
    fn observe_links_and_notify_invalidates() {
        let rt = Runtime::new();
        let cell = Cell::new_in(&rt);
        let observer = MockObserver::new();

        {
            let weak = Arc::downgrade(&observer);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
        }

        assert!(cell.is_observed());
        assert_eq!(observer.linked.lock().as_slice(), &[cell.core().id()]);

        cell.notify();
        assert_eq!(observer.invalidated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeated_observe_is_idempotent() {
        let rt = Runtime::new();
        let cell = Cell::new_in(&rt);
        let observer = MockObserver::new();

        {
            let weak = Arc::downgrade(&observer);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
            assert!(cell.observe());
        }

        cell.notify();
        assert_eq!(observer.invalidated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_purges_dead_observers() {
        let rt = Runtime::new();
        let cell = Cell::new_in(&rt);
        let observer = MockObserver::new();

        {
            let weak = Arc::downgrade(&observer);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
        }

        drop(observer);
        assert!(cell.is_observed());
        cell.notify();
        assert!(!cell.is_observed());
    }

    #[test]
    fn observed_hook_fires_on_first_subscriber_only() {
        let rt = Runtime::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let cell = {
            let observed = observed.clone();
            Cell::with_hook_in(&rt, move || {
                observed.fetch_add(1, Ordering::SeqCst);
                Box::new(|| {})
            })
        };

        let first = MockObserver::new();
        let second = MockObserver::new();

        {
            let weak = Arc::downgrade(&first);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
        }
        {
            let weak = Arc::downgrade(&second);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
        }

        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unobserved_hook_fires_after_last_unlink() {
        let rt = Runtime::new();
        let unobserved = Arc::new(AtomicUsize::new(0));
        let cell = {
            let unobserved = unobserved.clone();
            Cell::with_hook_in(&rt, move || {
                let unobserved = unobserved.clone();
                Box::new(move || {
                    unobserved.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        let observer = MockObserver::new();
        {
            let weak = Arc::downgrade(&observer);
            let _frame = FrameGuard::tracking(weak);
            assert!(cell.observe());
        }

        cell.core().unlink(observer.id);
        assert_eq!(unobserved.load(Ordering::SeqCst), 0);

        // Disposal is deferred to the end of the next flush.
        cell.notify();
        assert_eq!(unobserved.load(Ordering::SeqCst), 1);
    }
}
