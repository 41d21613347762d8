//! Graph Scheduling Operations
//!
//! The [`Graph`] owns every clock, cell, node and log of a runtime and
//! implements the operations that never call back into user code: recording
//! edges, marking computations stale, queueing them on their clocks, and
//! detaching edges on teardown.
//!
//! # Stale marking
//!
//! When a cell commits a new value, every computation in its log is marked
//! stale at the current time of its clock and queued for update. Marking is
//! transitive through each computation's own log. A computation whose age
//! already equals the current time has been marked in this round and is
//! skipped, so every node is queued at most once per round.

use std::any::Any;
use std::rc::Rc;

use super::clock::{ClockId, ClockTable, State};
use super::log::{Edge, Log};
use super::node::{CellId, CellSlot, Node, Source};
use super::pool::Pool;
use super::{LogId, NodeId};

/// Arena holding the whole dependency graph.
pub struct Graph {
    pub clocks: ClockTable,
    pub nodes: Pool<Node>,
    pub logs: Pool<Log>,
    pub cells: Pool<CellSlot>,
}

impl Graph {
    /// Create a graph holding only the root clock.
    pub fn new() -> Self {
        Self {
            clocks: ClockTable::new(),
            nodes: Pool::new(),
            logs: Pool::new(),
            cells: Pool::new(),
        }
    }

    /// Take a node from the pool and bind it to `clock`.
    pub fn new_node(&mut self, clock: ClockId, recompute: Option<Box<dyn FnMut()>>) -> NodeId {
        let age = self.clocks.time(clock);
        let id = self.nodes.acquire();
        let node = &mut self.nodes[id];
        node.clock = Some(clock);
        node.recompute = recompute;
        node.age = age;
        node.state = State::Current;
        self.clocks.retain(clock);
        id
    }

    /// Whether `node` refers to a node that has not been disposed.
    pub fn is_live(&self, node: NodeId) -> bool {
        self.nodes
            .get(node)
            .map(|n| n.clock.is_some())
            .unwrap_or(false)
    }

    /// Take a cell from the pool and bind it to `clock`.
    pub fn new_cell(&mut self, clock: ClockId, value: Rc<dyn Any>) -> CellId {
        let id = self.cells.acquire();
        let cell = &mut self.cells[id];
        cell.clock = clock;
        cell.value = value;
        self.clocks.retain(clock);
        id
    }

    /// Whether any computation read `cell` during its last run.
    pub fn cell_has_readers(&self, cell: CellId) -> bool {
        self.cells
            .get(cell)
            .and_then(|slot| slot.log)
            .map(|log| !self.logs[log].is_empty())
            .unwrap_or(false)
    }

    /// Register `child` as owned by `owner`.
    pub fn adopt(&mut self, owner: NodeId, child: NodeId) {
        if let Some(owner) = self.nodes.get_mut(owner) {
            owner.owned.push(child);
        }
    }

    // ------------------------------------------------------------------
    // Edge logging
    // ------------------------------------------------------------------

    fn log_read(&mut self, log: LogId, to: NodeId) {
        let node_slot = self.nodes[to].sources.len();
        let log_slot = self.logs[log].insert(Edge {
            node: to,
            slot: node_slot,
        });
        self.nodes[to].sources.push(Some(Source {
            log,
            slot: log_slot,
        }));
    }

    /// Record that `to` read `cell`.
    pub fn log_cell_read(&mut self, cell: CellId, to: NodeId) {
        let log = match self.cells[cell].log {
            Some(log) => log,
            None => {
                let log = self.logs.acquire();
                self.cells[cell].log = Some(log);
                log
            }
        };
        self.log_read(log, to);
    }

    /// Record that `to` read the computation `node`.
    pub fn log_node_read(&mut self, node: NodeId, to: NodeId) {
        let log = match self.nodes[node].log {
            Some(log) => log,
            None => {
                let log = self.logs.acquire();
                self.nodes[node].log = Some(log);
                log
            }
        };
        self.log_read(log, to);
    }

    /// Record that `to` depends on the child clock `clock` of its own clock.
    pub fn log_node_preclock(&mut self, clock: ClockId, to: NodeId) {
        let node = &mut self.nodes[to];
        let age = node.age;
        let preclocks = node.preclocks.get_or_insert_with(Default::default);
        if preclocks.note(clock, age) {
            preclocks.clocks.push(clock);
        }
    }

    /// Record that the domain `rclock`, on behalf of `rnode`, depends on its
    /// sibling `sclock`.
    pub fn log_clock_preclock(&mut self, sclock: ClockId, rclock: ClockId, rnode: NodeId) {
        let node = &mut self.nodes[rnode];
        let age = node.age;
        let preclocks = node.preclocks.get_or_insert_with(Default::default);
        if !preclocks.note(sclock, age) {
            return;
        }
        preclocks.upstream.push((rclock, sclock));

        self.clocks[rclock]
            .preclocks
            .get_or_insert_with(Default::default)
            .retain(sclock);
    }

    // ------------------------------------------------------------------
    // Stale marking
    // ------------------------------------------------------------------

    /// Mark every reader in `log` stale, squeezing out holes as it goes.
    pub fn mark_log_stale(&mut self, log: LogId) {
        let len = self.logs[log].entries.len();
        let mut dead = 0;

        for i in 0..len {
            let Some(edge) = self.logs[log].entries[i] else {
                dead += 1;
                continue;
            };

            self.mark_node_stale(edge.node);

            if dead > 0 {
                let slot = i - dead;
                let entries = &mut self.logs[log].entries;
                entries[i] = None;
                entries[slot] = Some(edge);
                if let Some(Some(source)) = self.nodes[edge.node].sources.get_mut(edge.slot) {
                    source.slot = slot;
                }
            }
        }

        self.logs[log].finish_compaction(len - dead);
    }

    /// Mark `node` stale for the current time of its clock and queue it.
    pub fn mark_node_stale(&mut self, node: NodeId) {
        let Some(clock) = self.nodes.get(node).and_then(|n| n.clock) else {
            return;
        };
        let time = self.clocks.time(clock);
        if self.nodes[node].age >= time {
            return;
        }

        self.mark_clock_stale(clock);

        let n = &mut self.nodes[node];
        n.age = time;
        n.state = State::Stale;
        self.clocks[clock].updates.push(node);

        self.mark_owned_current(node);

        if let Some(log) = self.nodes[node].log {
            self.mark_log_stale(log);
        }
    }

    // Children of a node about to rerun are doomed, but until the rerun
    // disposes them a read should see them as current rather than stale.
    fn mark_owned_current(&mut self, node: NodeId) {
        for i in 0..self.nodes[node].owned.len() {
            let child = self.nodes[node].owned[i];
            let Some(clock) = self.nodes.get(child).and_then(|c| c.clock) else {
                continue;
            };
            let time = self.clocks.time(clock);
            let c = &mut self.nodes[child];
            c.age = time;
            c.state = State::Current;
            self.mark_owned_current(child);
        }
    }

    /// Flag `clock` as having work, registering it with its parent.
    ///
    /// A clock that is behind its parent, or that was current, starts a fresh
    /// batch: anything queued under the old time horizon is dropped,
    /// disposals included.
    pub fn mark_clock_stale(&mut self, clock: ClockId) {
        // The root is drained directly by whoever queued work on it; its
        // queues are never reset from here.
        let Some(parent) = self.clocks.parent(clock) else {
            return;
        };
        let time = self.clocks.time(parent);

        if self.clocks[clock].age >= time && self.clocks[clock].state != State::Current {
            return;
        }

        self.clocks[clock].age = time;
        self.mark_clock_stale(parent);
        self.clocks[parent].subclocks.push(clock);

        self.reset_clock(clock);
        let c = &mut self.clocks[clock];
        c.disposes.clear();
        c.state = State::Stale;
    }

    /// Drop the changes, sub-clocks and updates queued on `clock`. Cells
    /// whose commit is dropped lose their pending value with it.
    pub fn reset_clock(&mut self, clock: ClockId) {
        let changes = std::mem::take(&mut self.clocks[clock].changes);
        for cell in changes {
            if let Some(slot) = self.cells.get_mut(cell) {
                slot.pending = None;
            }
        }
        self.clocks[clock].reset_queues();
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Remove every edge recording `node` as a reader.
    pub fn detach_sources(&mut self, node: NodeId) {
        let sources = std::mem::take(&mut self.nodes[node].sources);
        for source in sources.into_iter().flatten() {
            if let Some(log) = self.logs.get_mut(source.log) {
                log.remove(source.slot);
            }
        }
    }

    /// Drop the cross-domain records made on behalf of `node`.
    pub fn release_preclocks(&mut self, node: NodeId) {
        let upstream = match self.nodes[node].preclocks.as_mut() {
            Some(preclocks) => {
                preclocks.clocks.clear();
                std::mem::take(&mut preclocks.upstream)
            }
            None => return,
        };

        for (rclock, sclock) in upstream {
            if let Some(preclocks) = self
                .clocks
                .get_mut(rclock)
                .and_then(|c| c.preclocks.as_mut())
            {
                preclocks.release(sclock);
            }
        }
    }

    /// Return the node's own log to the pool, clearing the back-references
    /// of every computation that read it.
    pub fn release_log(&mut self, node: NodeId) {
        if let Some(log) = self.nodes[node].log.take() {
            self.release_readers(log);
        }
    }

    /// Return a disposed node to the pool and unbind it from `clock`.
    pub fn release_node(&mut self, node: NodeId, clock: Option<ClockId>) {
        self.nodes[node].preclocks = None;
        self.nodes.release(node);
        if let Some(clock) = clock {
            self.clocks.release(clock);
        }
    }

    /// Return `cell` and its log to their pools. Computations that read it
    /// lose the edge; later reads through a stale handle fail.
    ///
    /// Returns the cell's value so the caller can drop it with the graph
    /// released.
    pub fn release_cell(&mut self, cell: CellId) -> Option<Rc<dyn Any>> {
        let slot = self.cells.get_mut(cell)?;
        let clock = slot.clock;
        let log = slot.log.take();
        slot.pending = None;
        let value = std::mem::replace(&mut slot.value, Rc::new(()));

        if let Some(log) = log {
            self.release_readers(log);
        }
        self.cells.release(cell);
        self.clocks.release(clock);
        Some(value)
    }

    fn release_readers(&mut self, log: LogId) {
        let edges: Vec<Edge> = self.logs[log].edges().collect();
        for edge in edges {
            if let Some(slot) = self
                .nodes
                .get_mut(edge.node)
                .and_then(|reader| reader.sources.get_mut(edge.slot))
            {
                *slot = None;
            }
        }

        self.logs.release(log);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
