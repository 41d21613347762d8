//! Cross-Domain Bookkeeping
//!
//! When a computation reads something that lives in another clock's domain,
//! that domain has to be brought up to date before the read is trusted. The
//! records here remember which domains a node (or a whole clock) depends on,
//! so the next update can pull them forward first.

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::clock::ClockId;

/// Cross-domain dependencies recorded by one computation node.
#[derive(Debug, Default)]
pub struct NodePreclocks {
    /// Child clocks of the node's own clock that the node read from.
    pub clocks: SmallVec<[ClockId; 2]>,
    /// `(reader_side, source_side)` pairs registered on `reader_side`'s
    /// clock-level table on this node's behalf.
    pub upstream: Vec<(ClockId, ClockId)>,
    /// Node age at which each source clock was last recorded.
    ages: HashMap<ClockId, u64>,
}

impl NodePreclocks {
    /// Record `clock` at `age`. Returns false if it was already recorded for
    /// this age.
    pub fn note(&mut self, clock: ClockId, age: u64) -> bool {
        if self.ages.get(&clock) == Some(&age) {
            return false;
        }
        self.ages.insert(clock, age);
        true
    }
}

/// Reference-counted set of sibling clocks that a clock must update first.
#[derive(Debug, Default)]
pub struct ClockPreclocks {
    counts: IndexMap<ClockId, usize>,
}

impl ClockPreclocks {
    pub fn retain(&mut self, clock: ClockId) {
        *self.counts.entry(clock).or_insert(0) += 1;
    }

    pub fn release(&mut self, clock: ClockId) {
        if let Some(count) = self.counts.get_mut(&clock) {
            *count = count.saturating_sub(1);
        }
    }

    /// Clocks with at least one live reference, in first-recorded order.
    pub fn active(&self) -> impl Iterator<Item = ClockId> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(clock, _)| *clock)
    }
}
