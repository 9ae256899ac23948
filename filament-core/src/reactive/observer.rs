//! Observer identity and capabilities.
//!
//! An observer is any computation that subscribes to cells: the reaction
//! behind an autorun, or the one behind a computed value. Cells never learn
//! whether a subscriber is eager or lazy; they only see the three
//! capabilities below and decide nothing about evaluation strategy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cell::CellCore;

/// Unique identifier for an observer.
///
/// Cells key their subscriber maps by this identity, which makes repeated
/// reads of the same cell within one run idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// The capabilities a running reaction exposes to the cells it reads.
///
/// - `link` records a cell in the observer's current dependency set.
/// - `invalidate` flags the observer stale and enqueues it for the next
///   flush (push path).
/// - `actualize` lazily re-validates the observer, re-running it only if a
///   dependency's value actually changed (pull path).
pub trait Observer: Send + Sync {
    /// The identity cells key their subscriber maps by.
    fn id(&self) -> ObserverId;

    /// Record `dep` in the observer's dependency set for the current run.
    fn link(&self, dep: Arc<CellCore>);

    /// Flag the observer stale and enqueue it for the next flush.
    fn invalidate(&self);

    /// Lazily re-validate the observer.
    fn actualize(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_ids_are_unique() {
        let id1 = ObserverId::new();
        let id2 = ObserverId::new();
        let id3 = ObserverId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }
}
