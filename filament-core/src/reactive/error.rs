//! Error taxonomy for the reactive runtime.
//!
//! Two very different things can go wrong in a reactive graph:
//!
//! 1. A user computation fails. This is contained at the reaction boundary:
//!    autoruns route the error to their error sink, computed values cache it
//!    and hand it back to every reader until a later evaluation succeeds.
//!    These errors travel as [`EvalError`] values, never as unwinds.
//!
//! 2. The graph itself is inconsistent (a computation observes its own
//!    output, or a reaction is re-entered while running). These are
//!    programming-model violations, not recoverable conditions, and they
//!    abort loudly via panic with a [`FatalError`] message.

use std::sync::Arc;

use thiserror::Error;

/// A user evaluation failure.
///
/// Cloneable so a computed value can cache one failure and hand it to every
/// reader that pulls the stale result.
pub type EvalError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Structural violations of the reactive programming model.
///
/// These are raised by panicking with the formatted message, since the
/// dependency graph is inconsistent and no caller can meaningfully recover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    /// A reaction that already ran in the current epoch was invalidated
    /// from within that same epoch's evaluation. Some computation is
    /// observing its own output, possibly through a chain of computed
    /// values.
    #[error("circular dependency detected in `{0}`")]
    CircularDependency(String),

    /// A reaction's run was invoked while that run was already on the
    /// stack. Distinct from the circular case: this fires synchronously
    /// rather than through a deferred invalidation.
    #[error("self-dependency detected in `{0}`")]
    SelfDependency(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_name_the_offender() {
        let circular = FatalError::CircularDependency("totals".to_string());
        assert!(circular.to_string().contains("circular dependency"));
        assert!(circular.to_string().contains("totals"));

        let reentrant = FatalError::SelfDependency("render".to_string());
        assert!(reentrant.to_string().contains("self-dependency"));
        assert!(reentrant.to_string().contains("render"));
    }
}
