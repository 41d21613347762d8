//! Dependency Logs
//!
//! A log records which computations read a producer (a value cell or another
//! computation) during their last run. It is a small sparse set: removing an
//! edge leaves a hole and pushes the hole onto a free-slot stack, so removal
//! is O(1) and every other edge keeps its slot. Holes are squeezed out only by
//! the stale-marking sweep, which visits every slot anyway.

use smallvec::SmallVec;

use super::pool::Reset;
use super::NodeId;

/// One consumer edge in a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// The reading computation.
    pub node: NodeId,
    /// Index of the matching back-reference in the node's source list.
    pub slot: usize,
}

/// Consumers of one producer.
#[derive(Debug, Default)]
pub struct Log {
    pub(crate) entries: SmallVec<[Option<Edge>; 2]>,
    free: Vec<usize>,
}

impl Log {
    /// Add an edge, reusing a free slot if one exists. Returns its slot.
    pub fn insert(&mut self, edge: Edge) -> usize {
        if let Some(slot) = self.free.pop() {
            self.entries[slot] = Some(edge);
            return slot;
        }
        self.entries.push(Some(edge));
        self.entries.len() - 1
    }

    /// Remove the edge at `slot`.
    pub fn remove(&mut self, slot: usize) {
        if slot >= self.entries.len() || self.entries[slot].is_none() {
            return;
        }
        self.entries[slot] = None;
        if slot + 1 == self.entries.len() {
            self.entries.pop();
        } else {
            self.free.push(slot);
        }
    }

    /// Live edges in slot order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.entries.iter().flatten().copied()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    /// Drop trailing slots after a compaction and forget the free list.
    pub(crate) fn finish_compaction(&mut self, len: usize) {
        self.entries.truncate(len);
        self.free.clear();
    }
}

impl Reset for Log {
    fn reset(&mut self) {
        self.entries.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pool::Pool;
    use crate::graph::Node;

    fn nodes(count: usize) -> Vec<NodeId> {
        let mut pool: Pool<Node> = Pool::new();
        (0..count).map(|_| pool.acquire()).collect()
    }

    #[test]
    fn removal_leaves_other_slots_in_place() {
        let ids = nodes(3);
        let mut log = Log::default();
        let s0 = log.insert(Edge { node: ids[0], slot: 0 });
        let s1 = log.insert(Edge { node: ids[1], slot: 0 });
        let s2 = log.insert(Edge { node: ids[2], slot: 0 });
        assert_eq!((s0, s1, s2), (0, 1, 2));

        log.remove(s1);
        assert_eq!(log.edge_count(), 2);
        assert_eq!(log.entries[2], Some(Edge { node: ids[2], slot: 0 }));
    }

    #[test]
    fn free_slots_are_reused() {
        let ids = nodes(3);
        let mut log = Log::default();
        log.insert(Edge { node: ids[0], slot: 0 });
        let middle = log.insert(Edge { node: ids[1], slot: 0 });
        log.insert(Edge { node: ids[2], slot: 0 });

        log.remove(middle);
        let reused = log.insert(Edge { node: ids[1], slot: 4 });
        assert_eq!(reused, middle);
        assert_eq!(log.edge_count(), 3);
    }

    #[test]
    fn removing_last_slot_shrinks() {
        let ids = nodes(2);
        let mut log = Log::default();
        log.insert(Edge { node: ids[0], slot: 0 });
        let last = log.insert(Edge { node: ids[1], slot: 0 });

        log.remove(last);
        assert_eq!(log.entries.len(), 1);
        log.remove(0);
        assert!(log.is_empty());
    }

    #[test]
    fn reset_clears_edges_and_free_slots() {
        let ids = nodes(3);
        let mut log = Log::default();
        for id in &ids {
            log.insert(Edge { node: *id, slot: 0 });
        }
        log.remove(0);

        log.reset();
        assert!(log.is_empty());
        assert_eq!(log.insert(Edge { node: ids[0], slot: 0 }), 0);
    }
}
