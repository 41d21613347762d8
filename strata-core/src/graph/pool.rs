//! Allocator Pools
//!
//! Computation nodes, dependency logs, value cells and clocks are created
//! and torn down constantly as computations rerun. Instead of dropping them,
//! a released instance goes back on a free list and is handed out again by
//! the next acquisition.
//!
//! Handles carry a generation counter. Releasing a slot bumps its
//! generation, so a handle taken before the release can no longer reach the
//! slot after it is reused. Reuse never produces a dangling edge.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Types that can be returned to a pool and handed out again.
pub trait Reset {
    /// Clear every graph-edge field so the instance is indistinguishable
    /// from a freshly allocated one.
    fn reset(&mut self);
}

/// Generational handle into a [`Pool`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index of this handle.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    live: bool,
    value: T,
}

/// Slot arena with a free list of released instances.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T: Default + Reset> Pool<T> {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Take an instance from the free list, or allocate one.
    ///
    /// A recycled instance is reset before it is handed out.
    pub fn acquire(&mut self) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value.reset();
            slot.live = true;
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
            value: T::default(),
        });
        Handle::new(index, 0)
    }

    /// Return an instance to the free list.
    ///
    /// Returns false if the handle was already stale.
    pub fn release(&mut self, handle: Handle<T>) -> bool {
        if !self.contains(handle) {
            return false;
        }
        let slot = &mut self.slots[handle.index()];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        true
    }

    /// Whether `handle` still refers to a live instance.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slots
            .get(handle.index())
            .map(|slot| slot.live && slot.generation == handle.generation)
            .unwrap_or(false)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if self.contains(handle) {
            Some(&self.slots[handle.index()].value)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if self.contains(handle) {
            Some(&mut self.slots[handle.index()].value)
        } else {
            None
        }
    }

    /// Number of instances currently handed out.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Number of instances waiting on the free list.
    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

impl<T: Default + Reset> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle<T>> for Pool<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        let slot = &self.slots[handle.index()];
        debug_assert_eq!(slot.generation, handle.generation, "stale handle {handle:?}");
        &slot.value
    }
}

impl<T> IndexMut<Handle<T>> for Pool<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        let slot = &mut self.slots[handle.index()];
        debug_assert_eq!(slot.generation, handle.generation, "stale handle {handle:?}");
        &mut slot.value
    }
}
