//! Reactive Primitives
//!
//! This module implements the user-facing reactive system: value cells,
//! computations, ownership roots, batches and sub-clocks.
//!
//! # Concepts
//!
//! ## Value Cells
//!
//! A [`Signal`] holds mutable state. Reading it inside a computation
//! registers a dependency; writing it schedules every reader for
//! recomputation. [`ValueSignal`] additionally ignores writes equal to the
//! current value.
//!
//! ## Computations
//!
//! A [`Computation`] runs a closure, remembers what it read, and reruns when
//! any of it changes. Propagation is glitch-free: a computation never sees a
//! mix of old and new values from one batch, and runs at most once per round.
//!
//! ## Ownership
//!
//! Computations created while another one runs are owned by it and disposed
//! before it reruns. [`root`] and [`root_with_disposer`] start ownership
//! trees; [`cleanup`] registers teardown callbacks.
//!
//! ## Clocks
//!
//! Every propagation runs on a clock. [`subclock`] opens a nested domain
//! whose changes settle completely before the enclosing domain continues.
//!
//! # Implementation Notes
//!
//! The runtime is thread-local and single-threaded. Each thread gets an
//! independent graph; handles must not be moved across threads.

mod computation;
mod context;
mod runtime;
mod scope;
mod signal;

pub use computation::{
    any_of, computation, computation_with, on, on_with, try_computation, try_computation_with,
    try_on, try_on_with, Computation,
};
pub use context::is_tracking;
pub use runtime::{Runtime, RuntimeConfig, RuntimeStats, DEFAULT_MAX_ROUNDS};
pub use scope::{
    cleanup, freeze, root, root_with_disposer, sample, subclock, subclock_batcher, try_cleanup,
    try_freeze, try_root, try_root_with_disposer, try_subclock, Disposer, SubClock,
};
pub use signal::{value_cell, value_with_eq, value_with_equality, Signal, ValueSignal};
