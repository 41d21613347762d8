//! Reactive Runtime
//!
//! The runtime owns the dependency graph and the ambient context of the
//! current thread, and runs the propagation engine over them.
//!
//! # How It Works
//!
//! A write to a cell is queued on a clock. The clock is then drained in
//! discrete rounds. Each round runs four phases in strict order:
//!
//! 1. apply every queued commit, marking the cell's readers stale;
//! 2. bring every queued child clock up to date;
//! 3. recompute every queued stale computation;
//! 4. tear down every computation queued for disposal.
//!
//! All commits of a round land before any recomputation starts, so a
//! computation never observes half of a batch. A computation that reads
//! another one marked stale in the same round pulls it up to date first.
//! Every round after the first advances the clock's tick, which invalidates
//! stale marks made against the previous tick.
//!
//! # Threading
//!
//! The model is single-threaded and cooperative. Each thread has its own
//! runtime; reactive handles are neither `Send` nor `Sync`.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::error::{ReactiveError, Result};
use crate::graph::{CellId, Clock, ClockId, Graph, NodeId, Relation, State};

use super::context::{Context, ContextGuard, Owner};

/// Default ceiling on propagation rounds per drain.
pub const DEFAULT_MAX_ROUNDS: usize = 100_000;

/// Tunables for a thread's runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Rounds a single clock drain may take before it is declared runaway.
    pub max_rounds: usize,
}

impl RuntimeConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Snapshot of a runtime's allocation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeStats {
    pub clocks: usize,
    pub pooled_clocks: usize,
    pub live_nodes: usize,
    pub pooled_nodes: usize,
    pub live_logs: usize,
    pub pooled_logs: usize,
    pub cells: usize,
    pub pooled_cells: usize,
}

/// The per-thread reactive runtime.
pub struct Runtime {
    graph: RefCell<Graph>,
    context: Cell<Context>,
    config: Cell<RuntimeConfig>,
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Where a cell access landed relative to the running clock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CellAccess {
    relation: Relation,
    /// Clock a write from here is queued on.
    write_clock: ClockId,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            context: Cell::new(Context::default()),
            config: Cell::new(RuntimeConfig::default()),
        }
    }

    /// Run `f` against this thread's runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Install `config` for this thread's runtime.
    pub fn configure(config: RuntimeConfig) {
        Self::with(|rt| rt.config.set(config));
    }

    /// Configuration of this thread's runtime.
    pub fn config() -> RuntimeConfig {
        Self::with(|rt| rt.config.get())
    }

    /// Whether a propagation is active on this thread.
    pub fn is_propagating() -> bool {
        Self::with(|rt| rt.propagating())
    }

    /// Whether a computation is reading on this thread.
    pub fn is_tracking() -> bool {
        Self::with(|rt| rt.context().reader.is_some())
    }

    /// Allocation counts of this thread's runtime.
    pub fn stats() -> RuntimeStats {
        Self::with(|rt| {
            let g = rt.graph();
            RuntimeStats {
                clocks: g.clocks.len(),
                pooled_clocks: g.clocks.pooled(),
                live_nodes: g.nodes.live(),
                pooled_nodes: g.nodes.pooled(),
                live_logs: g.logs.live(),
                pooled_logs: g.logs.pooled(),
                cells: g.cells.live(),
                pooled_cells: g.cells.pooled(),
            }
        })
    }

    // ------------------------------------------------------------------
    // Context and graph access
    // ------------------------------------------------------------------

    pub(crate) fn graph(&self) -> Ref<'_, Graph> {
        self.graph.borrow()
    }

    pub(crate) fn graph_mut(&self) -> RefMut<'_, Graph> {
        self.graph.borrow_mut()
    }

    pub(crate) fn context(&self) -> Context {
        self.context.get()
    }

    pub(crate) fn enter(&self, context: Context) -> ContextGuard<'_> {
        ContextGuard::enter(&self.context, context)
    }

    pub(crate) fn propagating(&self) -> bool {
        self.context.get().clock.is_some()
    }

    /// Clock that new cells, nodes and sub-clocks belong to.
    pub(crate) fn current_clock(&self) -> ClockId {
        self.context.get().clock.unwrap_or(ClockId::ROOT)
    }

    pub(crate) fn time(&self, clock: ClockId) -> u64 {
        self.graph().clocks.time(clock)
    }

    pub(crate) fn is_live(&self, node: NodeId) -> bool {
        self.graph().is_live(node)
    }

    /// Current time of the clock `cell` belongs to.
    pub(crate) fn cell_time(&self, cell: CellId) -> Result<u64> {
        let g = self.graph();
        let clock = g.cells.get(cell).ok_or(ReactiveError::DisposedCell)?.clock;
        Ok(g.clocks.time(clock))
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Drain `clock` until all four queues are empty.
    pub(crate) fn run(&self, clock: ClockId) -> Result<()> {
        let _ctx = self.enter(Context {
            clock: Some(clock),
            ..self.context()
        });
        let max_rounds = self.config.get().max_rounds;

        let mut rounds = 0usize;
        while self.graph().clocks[clock].has_work() {
            // The first round keeps the tick so updates already scheduled
            // against it stay valid.
            if rounds > 0 {
                self.graph_mut().clocks[clock].subtime += 1;
            }
            trace!(clock = clock.index(), round = rounds, "propagation round");

            self.drain(clock, |c| &mut c.changes, |rt, cell| {
                rt.apply_change(cell);
                Ok(())
            })?;
            self.drain(clock, |c| &mut c.subclocks, |rt, sub| rt.update_clock(sub))?;
            self.drain(clock, |c| &mut c.updates, |rt, node| rt.update_node(node))?;
            self.drain(clock, |c| &mut c.disposes, |rt, node| rt.dispose(node))?;

            rounds += 1;
            if rounds > max_rounds {
                warn!(clock = clock.index(), rounds, "propagation did not settle");
                return Err(ReactiveError::Runaway);
            }
        }

        Ok(())
    }

    // Process one queue of `clock` in order. Entries added while draining are
    // processed in the same pass; if the queue is reset mid-drain, the pass
    // ends there.
    fn drain<T: Copy>(
        &self,
        clock: ClockId,
        queue: fn(&mut Clock) -> &mut Vec<T>,
        mut apply: impl FnMut(&Runtime, T) -> Result<()>,
    ) -> Result<()> {
        let mut i = 0;
        loop {
            let item = {
                let mut g = self.graph_mut();
                match queue(&mut g.clocks[clock]).get(i) {
                    Some(item) => *item,
                    None => break,
                }
            };
            apply(self, item)?;
            i += 1;
        }
        queue(&mut self.graph_mut().clocks[clock]).clear();
        Ok(())
    }

    fn apply_change(&self, cell: CellId) {
        let replaced = {
            let mut g = self.graph_mut();
            let Some(slot) = g.cells.get_mut(cell) else {
                return;
            };
            let replaced = slot
                .pending
                .take()
                .map(|pending| std::mem::replace(&mut slot.value, pending));
            if let Some(log) = slot.log {
                g.mark_log_stale(log);
            }
            replaced
        };
        drop(replaced);
    }

    /// Drop whatever an interrupted top-level propagation left queued on the
    /// root clock.
    pub(crate) fn abandon(&self) {
        self.graph_mut().reset_clock(ClockId::ROOT);
    }

    /// Release a clock once the scope that created it is done with it.
    pub(crate) fn retire_clock(&self, clock: ClockId) {
        self.graph_mut().clocks.retire(clock);
    }

    /// Start a top-level propagation on the root clock.
    pub(crate) fn event(&self) -> Result<()> {
        {
            let mut g = self.graph_mut();
            let root = &mut g.clocks[ClockId::ROOT];
            root.subclocks.clear();
            root.updates.clear();
            root.subtime += 1;
        }
        self.run(ClockId::ROOT)
    }

    /// Bring `clock` up to its parent's time, running it if it is stale.
    pub(crate) fn update_clock(&self, clock: ClockId) -> Result<()> {
        let (time, preclocks) = {
            let mut g = self.graph_mut();
            let Some(parent) = g.clocks.get(clock).and_then(|c| c.parent) else {
                return Ok(());
            };
            let time = g.clocks.time(parent);
            let c = &mut g.clocks[clock];
            if c.age >= time && c.state != State::Stale {
                (None, SmallVec::<[ClockId; 4]>::new())
            } else {
                if c.age < time {
                    c.state = State::Current;
                }
                let preclocks: SmallVec<[ClockId; 4]> = c
                    .preclocks
                    .as_ref()
                    .map(|p| p.active().collect())
                    .unwrap_or_default();
                (Some(time), preclocks)
            }
        };

        if let Some(time) = time {
            for preclock in preclocks {
                self.update_clock(preclock)?;
            }
            if let Some(c) = self.graph_mut().clocks.get_mut(clock) {
                c.age = time;
            }
        }

        let state = self.graph().clocks.get(clock).map(|c| c.state);
        let Some(state) = state else {
            return Ok(());
        };
        match state {
            State::Running => Err(ReactiveError::CircularClock),
            State::Stale => {
                self.graph_mut().clocks[clock].state = State::Running;
                let _running = RunningClock { rt: self, clock };
                self.run(clock)
            }
            State::Current => Ok(()),
        }
    }

    /// Recompute `node` if it is stale.
    pub(crate) fn update_node(&self, node: NodeId) -> Result<()> {
        let clock = {
            let g = self.graph();
            match g.nodes.get(node) {
                Some(n) if n.state == State::Stale => n.clock,
                _ => None,
            }
        };
        let Some(clock) = clock else {
            return Ok(());
        };

        trace!(node = ?node, clock = clock.index(), "recomputing");

        let _ctx = self.enter(Context {
            clock: Some(clock),
            reader: Some(node),
            owner: Some(Owner::Node(node)),
        });

        self.invoke(node, true)
    }

    // Call the node's recompute function with the graph released. A rerun
    // first tears down what the previous run built.
    fn invoke(&self, node: NodeId, rerun: bool) -> Result<()> {
        let recompute = {
            let mut g = self.graph_mut();
            let n = &mut g.nodes[node];
            n.state = State::Running;
            n.recompute.take()
        };
        let mut invocation = Invocation {
            rt: self,
            node,
            recompute,
        };

        if rerun {
            self.cleanup_node(node, false)?;
        }
        if let Some(recompute) = invocation.recompute.as_mut() {
            recompute();
        }
        Ok(())
    }

    /// Create a computation under the current owner and run it once.
    pub(crate) fn create_node(&self, recompute: Box<dyn FnMut()>) -> Result<NodeId> {
        let ctx = self.context();
        let owner = ctx.owner.ok_or(ReactiveError::NoOwner)?;
        let node = self
            .graph_mut()
            .new_node(self.current_clock(), Some(recompute));

        {
            let _ctx = self.enter(Context {
                clock: ctx.clock,
                reader: Some(node),
                owner: Some(Owner::Node(node)),
            });

            if ctx.clock.is_some() {
                self.invoke(node, false)?;
            } else {
                self.toplevel_computation(node)?;
            }
        }

        if let Owner::Node(parent) = owner {
            // The owner may have been disposed by the propagation that
            // followed the first run.
            if self.is_live(parent) {
                self.graph_mut().adopt(parent, node);
            } else {
                self.dispose(node)?;
            }
        }

        Ok(node)
    }

    // First run of a computation created outside any propagation. Writes it
    // makes are queued on the root clock and propagated before returning.
    fn toplevel_computation(&self, node: NodeId) -> Result<()> {
        let _ctx = self.enter(Context {
            clock: Some(ClockId::ROOT),
            ..self.context()
        });

        self.graph_mut().reset_clock(ClockId::ROOT);
        self.invoke(node, false)?;

        let pending = {
            let mut g = self.graph_mut();
            let root = &mut g.clocks[ClockId::ROOT];
            let pending = root.has_work();
            if pending {
                root.subtime += 1;
            }
            pending
        };

        if pending {
            self.run(ClockId::ROOT)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Resolve a read of the computation `node` by the active reader.
    ///
    /// A read from the node's own domain (or from below it) pulls the node
    /// up to date if it was marked stale this tick and inherits the node's
    /// cross-domain dependencies. A read from elsewhere brings the node's
    /// domain up to date as a whole.
    pub(crate) fn read_node(&self, node: NodeId) -> Result<()> {
        let ctx = self.context();
        let (Some(reader), Some(rclock)) = (ctx.reader, ctx.clock) else {
            return Ok(());
        };
        let sclock = self.graph().nodes.get(node).and_then(|n| n.clock);
        let Some(sclock) = sclock else {
            return Ok(());
        };

        let relation = self.graph().clocks.classify(rclock, sclock);
        match relation {
            Relation::Same => self.read_local(node, reader, None)?,
            Relation::Nested { via } => self.read_local(node, reader, Some(via))?,
            Relation::Child { source, .. } => {
                self.graph_mut().log_node_preclock(source, reader);
                self.update_clock(source)?;
            }
            Relation::Sibling { source, reader: rside } => {
                self.graph_mut().log_clock_preclock(source, rside, reader);
                self.update_clock(source)?;
            }
        }

        self.graph_mut().log_node_read(node, reader);
        Ok(())
    }

    fn read_local(&self, node: NodeId, reader: NodeId, via: Option<ClockId>) -> Result<()> {
        for preclock in self.node_preclocks(node) {
            self.update_clock(preclock)?;
        }

        let (age, state, clock) = {
            let g = self.graph();
            let n = &g.nodes[node];
            (n.age, n.state, n.clock)
        };
        if let Some(clock) = clock {
            if age == self.time(clock) {
                if state == State::Running {
                    return Err(ReactiveError::CircularDependency);
                }
                self.update_node(node)?;
            }
        }

        let preclocks = self.node_preclocks(node);
        let mut g = self.graph_mut();
        for preclock in preclocks {
            match via {
                None => g.log_node_preclock(preclock, reader),
                Some(rside) => g.log_clock_preclock(preclock, rside, reader),
            }
        }
        Ok(())
    }

    fn node_preclocks(&self, node: NodeId) -> SmallVec<[ClockId; 2]> {
        self.graph()
            .nodes
            .get(node)
            .and_then(|n| n.preclocks.as_ref())
            .map(|p| p.clocks.clone())
            .unwrap_or_default()
    }

    /// Align a cell access with the running clock.
    ///
    /// Returns `None` outside propagation. A cell in a domain that is not an
    /// ancestor of the running clock is brought up to date first.
    fn resolve_cell(&self, cell: CellId) -> Result<Option<CellAccess>> {
        let Some(rclock) = self.context().clock else {
            return Ok(None);
        };

        let access = {
            let g = self.graph();
            let sclock = g.cells.get(cell).ok_or(ReactiveError::DisposedCell)?.clock;
            let relation = g.clocks.classify(rclock, sclock);
            let write_clock = match relation {
                Relation::Same | Relation::Nested { .. } => sclock,
                Relation::Child { reader, .. } => reader,
                Relation::Sibling { source, .. } => g.clocks.parent(source).unwrap_or(source),
            };
            CellAccess {
                relation,
                write_clock,
            }
        };

        match access.relation {
            Relation::Child { source, .. } | Relation::Sibling { source, .. } => {
                self.update_clock(source)?;
            }
            Relation::Same | Relation::Nested { .. } => {}
        }

        Ok(Some(access))
    }

    /// Read the committed value of `cell`, recording a dependency if a
    /// computation is reading.
    pub(crate) fn read_cell(&self, cell: CellId) -> Result<Rc<dyn Any>> {
        let access = self.resolve_cell(cell)?;

        let mut g = self.graph_mut();
        let value = g
            .cells
            .get(cell)
            .map(|slot| slot.value.clone())
            .ok_or(ReactiveError::DisposedCell)?;
        if let Some(reader) = self.context().reader {
            g.log_cell_read(cell, reader);
            match access.map(|a| a.relation) {
                Some(Relation::Child { source, .. }) => g.log_node_preclock(source, reader),
                Some(Relation::Sibling { source, reader: rside }) => {
                    g.log_clock_preclock(source, rside, reader)
                }
                _ => {}
            }
        }

        Ok(value)
    }

    /// Write `value` to `cell`.
    ///
    /// Inside a propagation the value is queued for the next round; a second,
    /// different value for the same round is rejected by `conflict`. Outside a
    /// propagation the value is committed immediately, and if the cell has
    /// readers a propagation is run before returning.
    pub(crate) fn write_cell(
        &self,
        cell: CellId,
        value: Rc<dyn Any>,
        conflict: impl FnOnce(&dyn Any) -> Option<ReactiveError>,
    ) -> Result<()> {
        if let Some(access) = self.resolve_cell(cell)? {
            let pending = self
                .graph()
                .cells
                .get(cell)
                .ok_or(ReactiveError::DisposedCell)?
                .pending
                .clone();
            if let Some(pending) = pending {
                return match conflict(&*pending) {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }

            let mut g = self.graph_mut();
            g.mark_clock_stale(access.write_clock);
            g.cells[cell].pending = Some(value);
            g.clocks[access.write_clock].changes.push(cell);
            return Ok(());
        }

        let has_readers = {
            let g = self.graph();
            if !g.cells.contains(cell) {
                return Err(ReactiveError::DisposedCell);
            }
            g.cell_has_readers(cell)
        };
        if has_readers {
            {
                let mut g = self.graph_mut();
                g.reset_clock(ClockId::ROOT);
                g.cells[cell].pending = Some(value);
                g.clocks[ClockId::ROOT].changes.push(cell);
            }
            self.event()
        } else {
            let replaced = std::mem::replace(&mut self.graph_mut().cells[cell].value, value);
            drop(replaced);
            Ok(())
        }
    }

    /// Create a cell in the current clock's domain. A cell created under a
    /// computation or a disposable root is released with it.
    pub(crate) fn new_cell(&self, value: Rc<dyn Any>) -> CellId {
        let clock = self.current_clock();
        let owner = self.context().owner;
        let mut g = self.graph_mut();
        let cell = g.new_cell(clock, value);
        if let Some(Owner::Node(owner)) = owner {
            if let Some(n) = g.nodes.get_mut(owner) {
                n.cells.push(cell);
            }
        }
        cell
    }

    // ------------------------------------------------------------------
    // Disposal and cleanup
    // ------------------------------------------------------------------

    /// Run cleanups, dispose owned children, release owned cells and detach
    /// every edge of `node`.
    ///
    /// `last` distinguishes final teardown from the pass before a rerun.
    pub(crate) fn cleanup_node(&self, node: NodeId, last: bool) -> Result<()> {
        let taken = {
            let mut g = self.graph_mut();
            g.nodes.get_mut(node).map(|n| {
                (
                    std::mem::take(&mut n.cleanups),
                    std::mem::take(&mut n.owned),
                    std::mem::take(&mut n.cells),
                )
            })
        };
        let Some((cleanups, owned, cells)) = taken else {
            return Ok(());
        };

        for mut cleanup in cleanups {
            cleanup(last);
        }
        for child in owned {
            self.dispose(child)?;
        }

        let released: Vec<Rc<dyn Any>> = {
            let mut g = self.graph_mut();
            g.detach_sources(node);
            g.release_preclocks(node);
            cells
                .into_iter()
                .filter_map(|cell| g.release_cell(cell))
                .collect()
        };
        drop(released);
        Ok(())
    }

    /// Tear `node` down now and return it to the pool.
    pub(crate) fn dispose(&self, node: NodeId) -> Result<()> {
        let (recompute, clock) = {
            let mut g = self.graph_mut();
            if !g.is_live(node) {
                return Ok(());
            }
            g.release_log(node);
            let n = &mut g.nodes[node];
            (n.recompute.take(), n.clock.take())
        };
        drop(recompute);

        trace!(node = ?node, "disposing");
        self.cleanup_node(node, true)?;

        self.graph_mut().release_node(node, clock);
        Ok(())
    }

    /// Dispose `node` now, or at the end of the current round if a
    /// propagation is active.
    pub(crate) fn request_dispose(&self, node: NodeId) -> Result<()> {
        if !self.propagating() {
            return self.dispose(node);
        }

        let mut g = self.graph_mut();
        let Some(clock) = g.nodes.get(node).and_then(|n| n.clock) else {
            return Ok(());
        };
        debug!(node = ?node, clock = clock.index(), "deferring disposal to end of round");
        g.mark_clock_stale(clock);
        g.clocks[clock].disposes.push(node);
        Ok(())
    }
}

// Puts a node's recompute function back and settles the node once its
// body returns or unwinds.
struct Invocation<'a> {
    rt: &'a Runtime,
    node: NodeId,
    recompute: Option<Box<dyn FnMut()>>,
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        let Ok(mut g) = self.rt.graph.try_borrow_mut() else {
            return;
        };
        if !g.is_live(self.node) {
            return;
        }
        let node = &mut g.nodes[self.node];
        node.state = State::Current;
        if node.recompute.is_none() {
            node.recompute = self.recompute.take();
        }
    }
}

// Settles a clock brought up to date by `update_clock`, and releases it if
// it is transient and nothing is bound to it anymore.
struct RunningClock<'a> {
    rt: &'a Runtime,
    clock: ClockId,
}

impl Drop for RunningClock<'_> {
    fn drop(&mut self) {
        let Ok(mut g) = self.rt.graph.try_borrow_mut() else {
            return;
        };
        if let Some(clock) = g.clocks.get_mut(self.clock) {
            clock.state = State::Current;
        }
        g.clocks.collect(self.clock);
    }
}
