//! Error Taxonomy
//!
//! Every failure in the engine is a programmer-visible defect in how the
//! graph was built or used. Nothing is retried and nothing is recovered
//! internally: the error is reported synchronously at the point of misuse.
//!
//! # Raising across user code
//!
//! Computation bodies are plain closures that return a value, so an error
//! detected while one of them runs (say, a circular read) cannot travel back
//! through it as a `Result`. Such errors are *raised*: they unwind as a panic.
//! Inside any `try_*` entry point the unwind is silent and carries the typed
//! [`ReactiveError`], which the nearest `try_*` boundary turns back into
//! `Err`. With no `try_*` boundary on the stack, the panic message is the
//! error text itself.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

/// A fatal reactive error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A computation was created outside of any root or computation.
    #[error("no active owner for computation creation")]
    NoOwner,

    /// A computation read itself while it was still running.
    #[error("circular dependency")]
    CircularDependency,

    /// A clock was asked to update while it was already running.
    #[error("circular clock reference")]
    CircularClock,

    /// Two different values were queued for the same cell in one round.
    #[error("conflicting changes: {new} != {pending}")]
    ConflictingChanges { new: String, pending: String },

    /// An equality-tracked cell was given two different values in one tick.
    #[error("conflicting values: {new} is not the same as {current}")]
    ConflictingValues { new: String, current: String },

    /// `cleanup` was called with no active owner.
    #[error("cleanup must be called from within an active computation")]
    CleanupOutsideComputation,

    /// Propagation failed to settle within the configured round limit.
    #[error("runaway propagation detected")]
    Runaway,

    /// A value cell was used after the scope that created it was torn down.
    #[error("value cell used after its owner was disposed")]
    DisposedCell,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;

thread_local! {
    // Number of `try_*` boundaries currently on this thread's stack.
    static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Raise `err` as a fatal signal.
///
/// Unwinds silently to the nearest `try_*` boundary if there is one,
/// otherwise panics with the error's message.
pub fn raise(err: ReactiveError) -> ! {
    if CATCH_DEPTH.with(Cell::get) > 0 {
        tracing::debug!(error = %err, "unwinding to nearest try boundary");
        panic::resume_unwind(Box::new(err));
    }
    tracing::error!(error = %err, "fatal reactive error");
    panic!("{err}")
}

/// Unwrap `result`, raising the error if there is one.
pub(crate) fn unwrap_or_raise<T>(result: Result<T>) -> T {
    result.unwrap_or_else(|err| raise(err))
}

/// Run `f` as a `try_*` boundary.
///
/// A [`ReactiveError`] raised anywhere below becomes `Err`. Any other
/// panic keeps unwinding.
pub(crate) fn catch<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    struct Depth;

    impl Drop for Depth {
        fn drop(&mut self) {
            CATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
        }
    }

    CATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = {
        let _depth = Depth;
        panic::catch_unwind(AssertUnwindSafe(f))
    };

    match outcome {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<ReactiveError>() {
            Ok(err) => Err(*err),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_contract() {
        assert_eq!(
            ReactiveError::NoOwner.to_string(),
            "no active owner for computation creation"
        );
        assert_eq!(
            ReactiveError::ConflictingChanges {
                new: "2".into(),
                pending: "1".into()
            }
            .to_string(),
            "conflicting changes: 2 != 1"
        );
        assert_eq!(
            ReactiveError::ConflictingValues {
                new: "3".into(),
                current: "2".into()
            }
            .to_string(),
            "conflicting values: 3 is not the same as 2"
        );
        assert_eq!(ReactiveError::Runaway.to_string(), "runaway propagation detected");
        assert_eq!(
            ReactiveError::DisposedCell.to_string(),
            "value cell used after its owner was disposed"
        );
    }

    #[test]
    fn catch_turns_raise_into_err() {
        let result: Result<()> = catch(|| raise(ReactiveError::CircularDependency));
        assert_eq!(result, Err(ReactiveError::CircularDependency));
        assert_eq!(CATCH_DEPTH.with(Cell::get), 0);
    }

    #[test]
    fn nested_catch_reports_innermost() {
        let outer = catch(|| {
            let inner: Result<()> = catch(|| raise(ReactiveError::CircularClock));
            assert_eq!(inner, Err(ReactiveError::CircularClock));
            Ok(7)
        });
        assert_eq!(outer, Ok(7));
    }

    #[test]
    #[should_panic(expected = "circular dependency")]
    fn raise_outside_catch_panics_with_message() {
        raise(ReactiveError::CircularDependency);
    }

    #[test]
    fn foreign_panics_pass_through() {
        let outcome = panic::catch_unwind(|| catch(|| -> Result<()> { panic!("boom") }));
        assert!(outcome.is_err());
        assert_eq!(CATCH_DEPTH.with(Cell::get), 0);
    }
}
