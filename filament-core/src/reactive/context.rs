//! Tracking context.
//!
//! The context is a thread-local stack of tracking frames. While a reaction
//! runs, its frame sits on top of the stack; any cell read during that time
//! resolves the frame and registers the reaction as a dependent.
//!
//! Frames are pushed and popped through a drop guard, so a panic inside a
//! user computation still unwinds the stack correctly. An [`untracked`]
//! scope pushes an empty frame, which suspends dependency capture without
//! hiding the fact that a reaction is executing further up the stack.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use super::observer::Observer;

thread_local! {
    static FRAME_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// A tracking frame: the observer currently capturing dependencies, or
/// `None` for an untracked scope.
type Frame = Option<Weak<dyn Observer>>;

/// Guard that pops its frame when dropped.
pub struct FrameGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl FrameGuard {
    /// Push a tracking frame for `observer`.
    pub fn tracking(observer: Weak<dyn Observer>) -> Self {
        Self::push(Some(observer))
    }

    /// Push an untracked frame, suspending dependency capture.
    pub fn suspended() -> Self {
        Self::push(None)
    }

    fn push(frame: Frame) -> Self {
        FRAME_STACK.with(|stack| stack.borrow_mut().push(frame));
        FrameGuard { _not_send: std::marker::PhantomData }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Resolve the innermost frame to a live observer, if any.
///
/// Returns `None` when no frame is active, when the innermost frame is an
/// untracked scope, or when the observer has already been torn down.
pub fn current() -> Option<Arc<dyn Observer>> {
    FRAME_STACK
        .with(|stack| stack.borrow().last().cloned())
        .flatten()
        .and_then(|weak| weak.upgrade())
}

/// The innermost frame's observer handle without upgrading it.
///
/// Cells capture this at notify-time so later pulls can be forwarded
/// through whatever computation raised the change.
pub fn current_weak() -> Option<Weak<dyn Observer>> {
    FRAME_STACK
        .with(|stack| stack.borrow().last().cloned())
        .flatten()
}

/// Whether any reaction is executing on this thread's stack.
///
/// Untracked scopes do not count, but a reaction enclosing one does.
pub fn in_reaction() -> bool {
    FRAME_STACK.with(|stack| stack.borrow().iter().any(Option::is_some))
}

/// Run `action` with dependency capture suspended.
///
/// Cells read inside the scope are not registered as dependencies of the
/// enclosing reaction; values come back as plain untracked reads.
pub fn untracked<R>(action: impl FnOnce() -> R) -> R {
    let _frame = FrameGuard::suspended();
    action()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::cell::CellCore;
    use crate::reactive::observer::ObserverId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockObserver {
        id: ObserverId,
        linked: AtomicUsize,
        invalidated: AtomicUsize,
    }

    impl MockObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: ObserverId::new(),
                linked: AtomicUsize::new(0),
                invalidated: AtomicUsize::new(0),
            })
        }
    }

    impl Observer for MockObserver {
        fn id(&self) -> ObserverId {
            self.id
        }

        fn link(&self, _dep: Arc<CellCore>) {
            self.linked.fetch_add(1, Ordering::SeqCst);
        }

        fn invalidate(&self) {
            self.invalidated.fetch_add(1, Ordering::SeqCst);
        }

        fn actualize(&self) {}
    }

    #[test]
    fn no_frame_means_no_observer() {
        assert!(current().is_none());
        assert!(!in_reaction());
    }

    #[test]
    fn tracking_frame_exposes_observer() {
        let observer = MockObserver::new();
        let weak = Arc::downgrade(&observer);

        {
            let _frame = FrameGuard::tracking(weak);
            assert!(in_reaction());
            assert_eq!(current().expect("frame active").id(), observer.id);
        }

        assert!(current().is_none());
        assert!(!in_reaction());
    }

    #[test]
    fn nested_frames_shadow_each_other() {
        let outer = MockObserver::new();
        let inner = MockObserver::new();
        let outer_weak = Arc::downgrade(&outer);
        let inner_weak = Arc::downgrade(&inner);

        let _outer_frame = FrameGuard::tracking(outer_weak);
        {
            let _inner_frame = FrameGuard::tracking(inner_weak);
            assert_eq!(current().expect("frame active").id(), inner.id);
        }
        assert_eq!(current().expect("frame active").id(), outer.id);
    }

    #[test]
    fn untracked_suspends_capture_but_not_reaction_detection() {
        let observer = MockObserver::new();
        let weak = Arc::downgrade(&observer);

        let _frame = FrameGuard::tracking(weak);
        untracked(|| {
            assert!(current().is_none());
            assert!(in_reaction());
        });
        assert!(current().is_some());
    }

    #[test]
    fn dead_observer_resolves_to_none() {
        let observer = MockObserver::new();
        let weak = Arc::downgrade(&observer);
        drop(observer);

        let _frame = FrameGuard::tracking(weak);
        assert!(current().is_none());
    }
}
