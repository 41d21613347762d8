//! Graph Nodes
//!
//! This module defines the two kinds of producers that live in the graph:
//! value cells (mutable storage) and computation nodes (re-runnable derived
//! computations).

use std::any::Any;
use std::rc::Rc;

use smallvec::SmallVec;

use super::clock::{ClockId, State};
use super::pool::{Handle, Reset};
use super::preclock::NodePreclocks;
use super::LogId;

/// Back-reference from a computation to one log it was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    pub log: LogId,
    /// Slot of the matching edge inside `log`.
    pub slot: usize,
}

/// A re-runnable derived computation.
#[derive(Default)]
pub struct Node {
    /// Owning clock. `None` once the node has been disposed.
    pub clock: Option<ClockId>,

    /// Recompute function. Roots have none.
    pub recompute: Option<Box<dyn FnMut()>>,

    /// Logical time of the last recomputation or stale mark.
    pub age: u64,

    pub state: State,

    /// Logs this node was recorded in during its last run. A slot becomes
    /// `None` when the producer behind it is disposed first.
    pub sources: SmallVec<[Option<Source>; 2]>,

    /// Log of computations that read this node.
    pub log: Option<LogId>,

    pub preclocks: Option<NodePreclocks>,

    /// Child computations created during the last run.
    pub owned: Vec<super::NodeId>,

    /// Value cells created during the last run.
    pub cells: Vec<CellId>,

    pub cleanups: Vec<Box<dyn FnMut(bool)>>,
}

impl Node {
    /// Number of logs this node is currently recorded in.
    pub fn source_count(&self) -> usize {
        self.sources.iter().flatten().count()
    }
}

impl Reset for Node {
    fn reset(&mut self) {
        self.clock = None;
        self.recompute = None;
        self.age = 0;
        self.state = State::Current;
        self.sources.clear();
        self.log = None;
        self.preclocks = None;
        self.owned.clear();
        self.cells.clear();
        self.cleanups.clear();
    }
}

/// Handle to a value cell. A cell lives as long as the scope that created
/// it; cells created outside any disposable owner are never released.
pub type CellId = Handle<CellSlot>;

/// Storage behind a value cell.
pub struct CellSlot {
    pub clock: ClockId,
    pub value: Rc<dyn Any>,
    /// Value queued for the next commit.
    pub pending: Option<Rc<dyn Any>>,
    pub log: Option<LogId>,
}

impl Default for CellSlot {
    fn default() -> Self {
        Self {
            clock: ClockId::ROOT,
            value: Rc::new(()),
            pending: None,
            log: None,
        }
    }
}

impl Reset for CellSlot {
    fn reset(&mut self) {
        self.clock = ClockId::ROOT;
        self.value = Rc::new(());
        self.pending = None;
        self.log = None;
    }
}
