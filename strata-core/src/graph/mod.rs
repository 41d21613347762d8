//! Dependency Graph
//!
//! This module implements the graph that tracks which computations read which
//! values, and the logical clocks that schedule their recomputation.
//!
//! # Overview
//!
//! - Value cells and computation nodes are producers. Each keeps a
//!   [`Log`] of the computations that read it during their last run.
//! - Every computation keeps the reverse index: the logs it appears in.
//! - Clocks form a tree of scheduling domains with hierarchical time.
//!
//! # Design Decisions
//!
//! 1. All graph objects live in one arena and refer to each other by integer
//!    handle. The graph is cyclic and mutated constantly; handles keep it free
//!    of shared ownership and interior mutability.
//!
//! 2. Nodes, logs, cells and clocks are recycled through [`Pool`]s. Handles
//!    are generational, so a handle that outlived its target cannot reach
//!    the next occupant of the slot. Cells are released with the scope that
//!    created them; a clock made for one `subclock` call is released once
//!    nothing is bound to it.
//!
//! 3. Nothing in this module calls user code. Operations that do (running a
//!    computation, cleanup callbacks) live in the reactive runtime and borrow
//!    the graph only between user calls.

mod clock;
mod log;
mod node;
mod pool;
mod preclock;
mod scheduler;

pub use clock::{Clock, ClockId, ClockTable, Relation, State};
pub use log::{Edge, Log};
pub use node::{CellId, CellSlot, Node, Source};
pub use pool::{Handle, Pool, Reset};
pub use preclock::{ClockPreclocks, NodePreclocks};
pub use scheduler::Graph;

/// Handle to a computation node.
pub type NodeId = Handle<Node>;

/// Handle to a dependency log.
pub type LogId = Handle<Log>;
