//! Logical Clocks
//!
//! A clock is a scheduling domain with its own discrete time. Clocks form a
//! tree under a single root. Absolute time is hierarchical: a clock's time is
//! its own tick counter plus the tick counters of all of its ancestors, so
//! advancing a parent advances every clock below it.

use std::ops::{Index, IndexMut};

use super::node::CellId;
use super::pool::{Handle, Pool, Reset};
use super::preclock::ClockPreclocks;
use super::NodeId;

/// Handle to a clock.
pub type ClockId = Handle<Clock>;

impl Handle<Clock> {
    /// The root clock every runtime starts with. It is never released.
    pub const ROOT: ClockId = Handle::new(0, 0);
}

/// Scheduling state shared by clocks and computation nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Up to date for the current time.
    #[default]
    Current,

    /// Needs to run before it can be observed.
    Stale,

    /// Currently running. Observing it again is a cycle.
    Running,
}

/// A scheduling domain.
#[derive(Debug, Default)]
pub struct Clock {
    pub parent: Option<ClockId>,
    pub depth: u32,
    /// Parent time when this clock last caught up with its parent.
    pub age: u64,
    pub state: State,
    /// Local tick counter.
    pub subtime: u64,
    /// Sibling domains that must be brought up to date before this one.
    pub preclocks: Option<ClockPreclocks>,

    /// Cells with a committed value waiting to be applied.
    pub changes: Vec<CellId>,
    /// Child clocks that need to be brought up to date.
    pub subclocks: Vec<ClockId>,
    /// Stale computations to recompute.
    pub updates: Vec<NodeId>,
    /// Computations to tear down at the end of the round.
    pub disposes: Vec<NodeId>,

    /// Live nodes, cells and child clocks bound to this clock.
    pub members: usize,
    /// Set once the scope that created the clock has finished with it. A
    /// transient clock is released as soon as nothing is bound to it.
    pub transient: bool,
}

impl Clock {

    /// Whether any of the four queues holds work.
    pub fn has_work(&self) -> bool {
        !self.changes.is_empty()
            || !self.subclocks.is_empty()
            || !self.updates.is_empty()
            || !self.disposes.is_empty()
    }

    /// Drop all queued work except disposals. Used when work queued under an
    /// old time horizon becomes void.
    pub fn reset_queues(&mut self) {
        self.changes.clear();
        self.subclocks.clear();
        self.updates.clear();
    }
}

impl Reset for Clock {
    fn reset(&mut self) {
        self.parent = None;
        self.depth = 0;
        self.age = 0;
        self.state = State::Current;
        self.subtime = 0;
        self.preclocks = None;
        self.reset_queues();
        self.disposes.clear();
        self.members = 0;
        self.transient = false;
    }
}

/// How a reading domain relates to the domain of the value it reads.
///
/// Produced by [`ClockTable::classify`]. Each variant names the clocks at
/// which the two ancestor chains meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The reader runs in the source's own domain.
    Same,

    /// The reader runs somewhere below the source's domain. `via` is the
    /// direct child of the source's clock on the reader's chain.
    Nested { via: ClockId },

    /// `source` (the source's clock or one of its ancestors) is a direct
    /// child of `reader` (the reader's clock or one of its ancestors).
    Child { source: ClockId, reader: ClockId },

    /// `source` and `reader` are distinct clocks sharing a parent.
    Sibling { source: ClockId, reader: ClockId },
}

/// Storage for every clock in a runtime.
pub struct ClockTable {
    clocks: Pool<Clock>,
}

impl ClockTable {
    /// Create a table holding only the root clock.
    pub fn new() -> Self {
        let mut clocks = Pool::new();
        let root = clocks.acquire();
        debug_assert_eq!(root, ClockId::ROOT);
        Self { clocks }
    }

    /// Create a clock nested under `parent`, aligned to the parent's time.
    pub fn spawn(&mut self, parent: ClockId) -> ClockId {
        let depth = self[parent].depth + 1;
        let age = self.time(parent);
        let id = self.clocks.acquire();
        let clock = &mut self.clocks[id];
        clock.parent = Some(parent);
        clock.depth = depth;
        clock.age = age;
        self[parent].members += 1;
        id
    }

    /// Whether `clock` has not been released.
    pub fn contains(&self, clock: ClockId) -> bool {
        self.clocks.contains(clock)
    }

    pub fn get(&self, clock: ClockId) -> Option<&Clock> {
        self.clocks.get(clock)
    }

    pub fn get_mut(&mut self, clock: ClockId) -> Option<&mut Clock> {
        self.clocks.get_mut(clock)
    }

    /// Bind one more node or cell to `clock`.
    pub fn retain(&mut self, clock: ClockId) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.members += 1;
        }
    }

    /// Unbind a node or cell from `clock`, releasing the clock if it was
    /// the last member of a transient one.
    pub fn release(&mut self, clock: ClockId) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.members = c.members.saturating_sub(1);
        }
        self.collect(clock);
    }

    /// Mark `clock` as no longer needed by the scope that created it.
    pub fn retire(&mut self, clock: ClockId) {
        if clock == ClockId::ROOT {
            return;
        }
        if let Some(c) = self.clocks.get_mut(clock) {
            c.transient = true;
        }
        self.collect(clock);
    }

    /// Release `clock`, and then each transient ancestor, while nothing is
    /// bound to it and it is not running.
    pub fn collect(&mut self, clock: ClockId) {
        let mut next = Some(clock);
        while let Some(id) = next {
            let Some(c) = self.clocks.get(id) else {
                return;
            };
            if !c.transient || c.members > 0 || c.state == State::Running {
                return;
            }
            next = c.parent;
            self.clocks.release(id);
            if let Some(parent) = next.and_then(|p| self.clocks.get_mut(p)) {
                parent.members = parent.members.saturating_sub(1);
            }
        }
    }

    /// Absolute time of `clock`.
    pub fn time(&self, clock: ClockId) -> u64 {
        let mut time = self[clock].subtime;
        let mut current = self[clock].parent;
        while let Some(parent) = current {
            time += self[parent].subtime;
            current = self[parent].parent;
        }
        time
    }

    pub fn parent(&self, clock: ClockId) -> Option<ClockId> {
        self[clock].parent
    }

    pub fn depth(&self, clock: ClockId) -> u32 {
        self[clock].depth
    }

    /// Number of live clocks, the root included.
    pub fn len(&self) -> usize {
        self.clocks.live()
    }

    /// Number of released clocks waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.clocks.pooled()
    }

    // Parent of `clock`; the root is its own parent.
    fn up(&self, clock: ClockId) -> ClockId {
        self[clock].parent.unwrap_or(clock)
    }

    /// Locate where the ancestor chains of `reader` and `source` meet.
    ///
    /// The reader's chain is walked up to one level below the source. If
    /// that lands on the source or one of its children the reader is inside
    /// the source's domain. Otherwise both chains are aligned and walked up
    /// together until the source side is a child of the reader side, or the
    /// two sides are siblings.
    pub fn classify(&self, reader: ClockId, source: ClockId) -> Relation {
        let source_depth = self.depth(source);

        let mut r = reader;
        while self.depth(r) > source_depth + 1 {
            r = self.up(r);
        }

        if r == source {
            return Relation::Same;
        }
        if self.parent(r) == Some(source) {
            return Relation::Nested { via: r };
        }

        if self.depth(r) > source_depth {
            r = self.up(r);
        }

        let mut s = source;
        while self.depth(s) > self.depth(r) + 1 {
            s = self.up(s);
        }

        if self.parent(s) == Some(r) {
            return Relation::Child { source: s, reader: r };
        }

        if self.depth(s) > self.depth(r) {
            s = self.up(s);
        }
        while self.parent(r) != self.parent(s) {
            r = self.up(r);
            s = self.up(s);
        }

        Relation::Sibling { source: s, reader: r }
    }
}

impl Default for ClockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ClockId> for ClockTable {
    type Output = Clock;

    fn index(&self, id: ClockId) -> &Clock {
        &self.clocks[id]
    }
}

impl IndexMut<ClockId> for ClockTable {
    fn index_mut(&mut self, id: ClockId) -> &mut Clock {
        &mut self.clocks[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tree {
        table: ClockTable,
        root: ClockId,
        a: ClockId,
        a1: ClockId,
        a2: ClockId,
        a11: ClockId,
        b: ClockId,
        b1: ClockId,
    }

    //          root
    //        /      \
    //       a        b
    //      / \       |
    //    a1   a2     b1
    //    |
    //   a11
    fn tree() -> Tree {
        let mut table = ClockTable::new();
        let root = ClockId::ROOT;
        let a = table.spawn(root);
        let b = table.spawn(root);
        let a1 = table.spawn(a);
        let a2 = table.spawn(a);
        let a11 = table.spawn(a1);
        let b1 = table.spawn(b);
        Tree { table, root, a, a1, a2, a11, b, b1 }
    }

    #[test]
    fn depth_increases_away_from_root() {
        let t = tree();
        assert_eq!(t.table.depth(t.root), 0);
        assert_eq!(t.table.depth(t.a), 1);
        assert_eq!(t.table.depth(t.a1), 2);
        assert_eq!(t.table.depth(t.a11), 3);
        assert_eq!(t.table.depth(t.b1), 2);
    }

    #[test]
    fn time_sums_ancestor_ticks() {
        let mut t = tree();
        t.table[t.root].subtime = 5;
        t.table[t.a].subtime = 3;
        t.table[t.a1].subtime = 2;
        t.table[t.a11].subtime = 1;

        assert_eq!(t.table.time(t.root), 5);
        assert_eq!(t.table.time(t.a), 8);
        assert_eq!(t.table.time(t.a11), 11);
        assert_eq!(t.table.time(t.b1), 5);
    }

    #[test]
    fn spawn_aligns_age_with_parent_time() {
        let mut table = ClockTable::new();
        table[ClockId::ROOT].subtime = 4;
        let child = table.spawn(ClockId::ROOT);
        assert_eq!(table[child].age, 4);
        assert_eq!(table[child].state, State::Current);
    }

    #[test]
    fn retired_clock_is_released_with_its_last_member() {
        let mut table = ClockTable::new();
        let outer = table.spawn(ClockId::ROOT);
        let inner = table.spawn(outer);
        table.retain(inner);
        assert_eq!(table.len(), 3);

        table.retire(outer);
        table.retire(inner);
        assert!(table.contains(inner));

        table.release(inner);
        assert!(!table.contains(inner));
        assert!(!table.contains(outer));
        assert_eq!(table.len(), 1);
        assert_eq!(table.pooled(), 2);
        assert_eq!(table[ClockId::ROOT].members, 0);
    }

    #[test]
    fn clocks_in_use_are_never_released() {
        let mut table = ClockTable::new();
        let batcher = table.spawn(ClockId::ROOT);
        table.retain(batcher);
        table.release(batcher);
        assert!(table.contains(batcher));

        let running = table.spawn(ClockId::ROOT);
        table[running].state = State::Running;
        table.retire(running);
        assert!(table.contains(running));

        table[running].state = State::Current;
        table.collect(running);
        assert!(!table.contains(running));

        table.retire(ClockId::ROOT);
        assert!(table.contains(ClockId::ROOT));
    }

    #[test]
    fn classify_same_domain() {
        let t = tree();
        for clock in [t.root, t.a, t.a1, t.a2, t.a11, t.b, t.b1] {
            assert_eq!(t.table.classify(clock, clock), Relation::Same);
        }
    }

    #[test]
    fn classify_reader_nested_under_source() {
        let t = tree();
        assert_eq!(t.table.classify(t.a, t.root), Relation::Nested { via: t.a });
        assert_eq!(t.table.classify(t.a1, t.a), Relation::Nested { via: t.a1 });
        assert_eq!(t.table.classify(t.a11, t.a), Relation::Nested { via: t.a1 });
        assert_eq!(t.table.classify(t.a11, t.root), Relation::Nested { via: t.a });
        assert_eq!(t.table.classify(t.b1, t.root), Relation::Nested { via: t.b });
    }

    #[test]
    fn classify_source_below_reader() {
        let t = tree();
        assert_eq!(
            t.table.classify(t.root, t.a),
            Relation::Child { source: t.a, reader: t.root }
        );
        assert_eq!(
            t.table.classify(t.root, t.a11),
            Relation::Child { source: t.a, reader: t.root }
        );
        assert_eq!(
            t.table.classify(t.a, t.a11),
            Relation::Child { source: t.a1, reader: t.a }
        );
        assert_eq!(
            t.table.classify(t.a1, t.a11),
            Relation::Child { source: t.a11, reader: t.a1 }
        );
    }

    #[test]
    fn classify_siblings() {
        let t = tree();
        assert_eq!(
            t.table.classify(t.a, t.b),
            Relation::Sibling { source: t.b, reader: t.a }
        );
        assert_eq!(
            t.table.classify(t.a1, t.a2),
            Relation::Sibling { source: t.a2, reader: t.a1 }
        );
        assert_eq!(
            t.table.classify(t.a11, t.a2),
            Relation::Sibling { source: t.a2, reader: t.a1 }
        );
        assert_eq!(
            t.table.classify(t.a2, t.a11),
            Relation::Sibling { source: t.a1, reader: t.a2 }
        );
    }

    #[test]
    fn classify_distant_cousins_meet_below_common_ancestor() {
        let t = tree();
        assert_eq!(
            t.table.classify(t.a11, t.b1),
            Relation::Sibling { source: t.b, reader: t.a }
        );
        assert_eq!(
            t.table.classify(t.b1, t.a11),
            Relation::Sibling { source: t.a, reader: t.b }
        );
        assert_eq!(
            t.table.classify(t.b, t.a11),
            Relation::Sibling { source: t.a, reader: t.b }
        );
        assert_eq!(
            t.table.classify(t.a1, t.b),
            Relation::Sibling { source: t.b, reader: t.a }
        );
    }

    #[test]
    fn classify_every_pair_is_consistent() {
        let t = tree();
        let all = [t.root, t.a, t.a1, t.a2, t.a11, t.b, t.b1];
        for &reader in &all {
            for &source in &all {
                match t.table.classify(reader, source) {
                    Relation::Same => assert_eq!(reader, source),
                    Relation::Nested { via } => {
                        assert_eq!(t.table.parent(via), Some(source));
                    }
                    Relation::Child { source: s, reader: r } => {
                        assert_eq!(t.table.parent(s), Some(r));
                    }
                    Relation::Sibling { source: s, reader: r } => {
                        assert_ne!(s, r);
                        assert_eq!(t.table.parent(s), t.table.parent(r));
                    }
                }
            }
        }
    }
}
