//! Reactive Context
//!
//! Four pieces of ambient state steer every operation: the clock whose
//! propagation is active, the computation currently reading (reads register
//! dependencies on it), and the owner that newly created computations attach
//! to. An active clock doubles as the "propagation in progress" flag.
//!
//! # Implementation
//!
//! The context is a small `Copy` value held by the thread's runtime. Every
//! recursive entry point (recomputing a node, sampling, batching, running a
//! sub-clock) swaps in a new context and gets back a [`ContextGuard`] that
//! restores the previous one when dropped. Restoration therefore also
//! happens when a fatal error unwinds through the entry point.

use std::cell::Cell;

use crate::graph::{ClockId, NodeId};

use super::runtime::Runtime;

/// Owner that newly created computations attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    /// A root without a disposer. Children are not tracked.
    Unowned,
    /// A computation or a disposable root.
    Node(NodeId),
}

/// Ambient execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Context {
    /// Clock being propagated, if any.
    pub clock: Option<ClockId>,
    /// Computation whose reads are being tracked.
    pub reader: Option<NodeId>,
    /// Owner for new computations.
    pub owner: Option<Owner>,
}

/// Restores the previous context when dropped.
pub(crate) struct ContextGuard<'a> {
    slot: &'a Cell<Context>,
    saved: Context,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn enter(slot: &'a Cell<Context>, context: Context) -> Self {
        let saved = slot.replace(context);
        Self { slot, saved }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.slot.set(self.saved);
    }
}

/// Whether a computation is currently reading, so that reads register
/// dependencies.
pub fn is_tracking() -> bool {
    Runtime::is_tracking()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_context() {
        let slot = Cell::new(Context::default());
        let inner = Context {
            clock: Some(ClockId::ROOT),
            reader: None,
            owner: Some(Owner::Unowned),
        };

        {
            let _guard = ContextGuard::enter(&slot, inner);
            assert_eq!(slot.get(), inner);
        }

        assert_eq!(slot.get(), Context::default());
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let slot = Cell::new(Context::default());
        let outer = Context {
            owner: Some(Owner::Unowned),
            ..Context::default()
        };
        let inner = Context {
            clock: Some(ClockId::ROOT),
            ..outer
        };

        {
            let _outer = ContextGuard::enter(&slot, outer);
            {
                let _inner = ContextGuard::enter(&slot, inner);
                assert_eq!(slot.get().clock, Some(ClockId::ROOT));
            }
            assert_eq!(slot.get(), outer);
        }

        assert_eq!(slot.get(), Context::default());
    }

    #[test]
    fn guard_restores_during_unwind() {
        let slot = Cell::new(Context::default());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ContextGuard::enter(
                &slot,
                Context {
                    owner: Some(Owner::Unowned),
                    ..Context::default()
                },
            );
            panic!("unwind");
        }));

        assert!(result.is_err());
        assert_eq!(slot.get(), Context::default());
    }

    #[test]
    fn not_tracking_outside_computations() {
        assert!(!is_tracking());
    }
}
