//! Reaction engine.
//!
//! A reaction is a computation with a tracked dependency set. The same
//! engine drives both flavors of reactivity:
//!
//! - an **autorun** is eager: once invalidated it re-runs during the next
//!   flush;
//! - a **computed** is lazy: its inner reaction is only re-validated when
//!   somebody reads the computed value.
//!
//! # Validation epochs
//!
//! Each reaction carries an epoch marker. Zero means flagged stale (a
//! dependency pushed an invalidation); equal to the runtime's current epoch
//! means confirmed fresh; anything else means possibly stale, resolved by
//! the pull walk in `actualize`. The walk re-runs the reaction only if a
//! dependency's value actually changed, which is what keeps diamond-shaped
//! graphs glitch-free: epochs advancing is never by itself a reason to
//! recompute.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::cell::{CellCore, CellId};
use super::context::{self, FrameGuard};
use super::error::{EvalError, FatalError};
use super::observer::{Observer, ObserverId};
use super::runtime::{default_runtime, Runtime};

/// A fallible reaction body.
pub type Computation = Box<dyn FnMut() -> Result<(), EvalError> + Send>;

/// Receives evaluation failures from a reaction body.
pub type ErrorSink = Box<dyn Fn(&EvalError) + Send + Sync>;

/// The engine behind autoruns and computed values.
pub struct Reaction {
    id: ObserverId,
    name: String,
    rt: Runtime,

    /// Validation epoch marker: 0 = flagged stale, current epoch =
    /// confirmed fresh, anything else = possibly stale.
    mark: AtomicU64,

    /// Re-entrancy guard for `run`.
    running: AtomicBool,

    disposed: AtomicBool,

    /// Cells subscribed to during the last run, in read order.
    deps: Mutex<IndexMap<CellId, Arc<CellCore>>>,

    computation: Mutex<Computation>,
    on_error: ErrorSink,

    weak_self: Weak<Reaction>,
}

impl Reaction {
    pub fn new(
        rt: Runtime,
        name: String,
        computation: Computation,
        on_error: Option<ErrorSink>,
    ) -> Arc<Self> {
        let on_error = on_error.unwrap_or_else(|| {
            let name = name.clone();
            Box::new(move |error: &EvalError| {
                tracing::error!(reaction = %name, %error, "uncaught error in reaction");
            })
        });

        Arc::new_cyclic(|weak_self| Self {
            id: ObserverId::new(),
            name,
            rt,
            mark: AtomicU64::new(0),
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            deps: Mutex::new(IndexMap::new()),
            computation: Mutex::new(computation),
            on_error,
            weak_self: weak_self.clone(),
        })
    }

    /// Execute the computation under a fresh tracking frame.
    ///
    /// Dependencies are recomputed from scratch on every run: the previous
    /// set is snapshotted, the body re-registers whatever it actually
    /// reads, and edges not re-registered are pruned afterwards. An `Err`
    /// from the body goes to the error sink and bookkeeping still
    /// completes, so one failing computation never wedges the scheduler.
    pub fn run(&self) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        if self.running.swap(true, Ordering::Relaxed) {
            panic!("{}", FatalError::SelfDependency(self.name.clone()));
        }
        let _running = ClearOnDrop(&self.running);

        let previous = mem::take(&mut *self.deps.lock());

        let result = {
            let weak: Weak<dyn Observer> = self.weak_self.clone();
            let _frame = FrameGuard::tracking(weak);
            let mut computation = self.computation.lock();
            (*computation)()
        };

        if let Err(error) = result {
            (self.on_error)(&error);
        }

        // Unsubscribe from previous dependencies that were not re-read.
        let stale: Vec<Arc<CellCore>> = {
            let deps = self.deps.lock();
            previous
                .into_iter()
                .filter(|(id, _)| !deps.contains_key(id))
                .map(|(_, cell)| cell)
                .collect()
        };
        for cell in stale {
            cell.unlink(self.id);
        }

        self.rt.dequeue(self.id);
        self.mark.store(self.rt.epoch(), Ordering::Relaxed);
    }

    /// Tear the reaction down: unlink every dependency and drop out of the
    /// invalidation queue. Outside a batch, deferred become-unobserved
    /// hooks run immediately so lifecycle timing stays observable.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }

        let deps = mem::take(&mut *self.deps.lock());
        for (_, cell) in deps {
            cell.unlink(self.id);
        }
        self.rt.dequeue(self.id);

        if !self.rt.in_batch() {
            self.rt.collect_unobserved();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }
}

impl Observer for Reaction {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn link(&self, dep: Arc<CellCore>) {
        self.deps.lock().entry(dep.id()).or_insert(dep);
    }

    fn invalidate(&self) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }

        // A confirmed-fresh reaction invalidated while some reaction is
        // still evaluating in the same epoch means a computation observes
        // its own output, possibly through several cells.
        if context::in_reaction() && self.mark.load(Ordering::Relaxed) == self.rt.epoch() {
            panic!("{}", FatalError::CircularDependency(self.name.clone()));
        }

        self.mark.store(0, Ordering::Relaxed);
        let weak: Weak<dyn Observer> = self.weak_self.clone();
        self.rt.enqueue(self.id, weak);
    }

    fn actualize(&self) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }

        let epoch = self.rt.epoch();
        if self.mark.load(Ordering::Relaxed) == epoch {
            return;
        }
        if self.mark.load(Ordering::Relaxed) == 0 {
            self.run();
            return;
        }

        // Possibly stale: pull every dependency. A pull may cascade into
        // synchronous re-runs upstream; if one of them invalidates this
        // reaction the marker drops to zero and we re-run right away.
        let deps: Vec<Arc<CellCore>> = self.deps.lock().values().cloned().collect();
        for dep in deps {
            dep.pull();
            if self.mark.load(Ordering::Relaxed) == 0 {
                self.run();
                return;
            }
        }

        // Every dependency validated without invalidating us: fresh
        // without re-running.
        self.mark.store(epoch, Ordering::Relaxed);
    }
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Options for [`autorun`] construction.
#[derive(Default)]
pub struct AutorunOptions {
    /// Debug name, reported by structural-error panics and the default
    /// error sink.
    pub name: Option<String>,

    /// Where evaluation failures go. Defaults to log-and-continue.
    pub on_error: Option<ErrorSink>,
}

/// Handle to an eager reactive computation.
///
/// The computation runs once at creation and re-runs whenever one of the
/// cells it read gets notified. Dropping the handle disposes the autorun;
/// call [`forget`](Autorun::forget) to keep it running for the rest of the
/// process.
pub struct Autorun {
    core: Arc<Reaction>,
}

impl Autorun {
    /// Create an autorun on an explicit runtime.
    pub fn new_in(rt: &Runtime, mut computation: impl FnMut() + Send + 'static) -> Self {
        Self::with_options_in(
            rt,
            move || {
                computation();
                Ok(())
            },
            AutorunOptions::default(),
        )
    }

    /// Create a fallible autorun with explicit options.
    pub fn with_options_in(
        rt: &Runtime,
        computation: impl FnMut() -> Result<(), EvalError> + Send + 'static,
        options: AutorunOptions,
    ) -> Self {
        let name = options.name.unwrap_or_else(|| "autorun".to_string());
        let core = Reaction::new(rt.clone(), name, Box::new(computation), options.on_error);
        core.run();
        Self { core }
    }

    /// Stop the autorun and unsubscribe it from everything it reads.
    ///
    /// Safe to call mid-flush: the reaction is simply removed from future
    /// consideration. Idempotent.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Keep the autorun alive for the rest of the process.
    pub fn forget(self) {
        mem::forget(self);
    }
}

impl Drop for Autorun {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl std::fmt::Debug for Autorun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autorun")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an eager computation on the default runtime.
///
/// Runs once immediately and re-runs after each change to any cell it
/// read. Returns the owning handle; dropping it stops the autorun.
pub fn autorun(computation: impl FnMut() + Send + 'static) -> Autorun {
    Autorun::new_in(default_runtime(), computation)
}

/// [`autorun`] for fallible computations.
///
/// An `Err` is routed to the error sink (default: logged) and the autorun
/// keeps running on subsequent invalidations.
pub fn try_autorun(
    computation: impl FnMut() -> Result<(), EvalError> + Send + 'static,
) -> Autorun {
    Autorun::with_options_in(default_runtime(), computation, AutorunOptions::default())
}
