//! A fixed-capacity arena for control blocks.
//!
//! Every core owns one pool per protocol. Slots are allocated when the pool is created and never
//! grow afterwards, so exhaustion is a normal condition that the caller answers by rejecting the
//! new connection.
//!
//! Two kinds of references exist to a pooled value:
//!
//! * a [`CbId`] is a plain copyable id. It is stored in tables, timer wheels and messages. Lookup
//!   with an id detects when its slot has been freed in the meantime, even if it has since been
//!   reused for another block.
//! * a [`Handle`] is the unique ownership token returned by `alloc`. It can not be copied and
//!   `free` consumes it, so freeing twice is not expressible.
//!
//! [`CbId`]: struct.CbId.html
//! [`Handle`]: struct.Handle.html
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// The generation counter of a slot.
///
/// Has strictly positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Generation(u32);

/// A copyable id of a pooled value.
///
/// The id remains valid until the value is freed. Accessing the pool with the id after that fails,
/// even if the slot that previously held the value has been reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CbId {
    idx: u32,
    generation: Generation,
}

/// The unique owner of a pooled value.
///
/// Returned by `Pool::alloc` and consumed by `Pool::free`. Handles are tagged with the pool that
/// created them.
#[must_use = "dropping a handle leaks its slot"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    id: CbId,
    pool: u32,
}

/// Allocation counters of a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful allocations.
    pub alloc: u64,
    /// Allocations that found the pool exhausted.
    pub alloc_fail: u64,
    /// Values returned to the pool.
    pub free: u64,
}

/// A fixed-capacity arena with generation checked ids.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free_top: Option<u32>,
    in_use: usize,
    tag: u32,
    stats: PoolStats,
}

struct Slot<T> {
    /// Bumped whenever the value is freed.
    generation: Generation,
    /// The value, or the link to the next free slot.
    entry: Entry<T>,
}

enum Entry<T> {
    Occupied(T),
    Free(Option<u32>),
}

static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

impl CbId {
    /// The index of the slot, dense in `0..capacity`.
    pub fn index(self) -> usize {
        self.idx as usize
    }

    /// An id that can never resolve, for blocks that live outside of any pool.
    pub(crate) fn detached() -> Self {
        CbId { idx: u32::max_value(), generation: Generation(u32::max_value()) }
    }
}

impl fmt::Display for CbId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.idx, self.generation.0)
    }
}

impl Handle {
    /// The id of the owned value.
    pub fn id(&self) -> CbId {
        self.id
    }
}

impl<T> Pool<T> {
    /// Create a pool and warm up all of its slots.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity < u32::max_value() as usize);
        let capacity = capacity as u32;

        let slots = (0..capacity)
            .map(|idx| Slot {
                generation: Generation::default(),
                entry: Entry::Free(Some(idx + 1).filter(|&next| next < capacity)),
            })
            .collect();

        Pool {
            slots,
            free_top: Some(0).filter(|_| capacity > 0),
            in_use: 0,
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            stats: PoolStats::default(),
        }
    }

    /// Move a value into a free slot.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(&mut self, value: T) -> Option<Handle> {
        let idx = match self.free_top {
            Some(idx) => idx,
            None => {
                self.stats.alloc_fail += 1;
                return None;
            },
        };

        let slot = &mut self.slots[idx as usize];
        self.free_top = match slot.entry {
            Entry::Free(next) => next,
            Entry::Occupied(_) => unreachable!("Free list links an occupied slot"),
        };
        slot.entry = Entry::Occupied(value);

        self.in_use += 1;
        self.stats.alloc += 1;
        Some(Handle {
            id: CbId { idx, generation: slot.generation },
            pool: self.tag,
        })
    }

    /// Retrieve a value by id.
    pub fn get(&self, id: CbId) -> Option<&T> {
        let slot = self.slots.get(id.index())?;
        match &slot.entry {
            Entry::Occupied(value) if slot.generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Retrieve a mutable value by id.
    pub fn get_mut(&mut self, id: CbId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index())?;
        match &mut slot.entry {
            Entry::Occupied(value) if slot.generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Return a value to the pool.
    ///
    /// All ids of the value become stale.
    ///
    /// ## Panics
    /// This function panics if the handle was created by another pool. That indicates a corrupted
    /// owner relationship which can not be recovered from.
    pub fn free(&mut self, handle: Handle) -> T {
        assert_eq!(handle.pool, self.tag, "Freeing {} into a foreign pool", handle.id);
        let idx = handle.id.idx;
        let slot = &mut self.slots[idx as usize];
        assert_eq!(slot.generation, handle.id.generation);

        let entry = core::mem::replace(&mut slot.entry, Entry::Free(self.free_top));
        slot.generation.advance();
        self.free_top = Some(idx);
        self.in_use -= 1;
        self.stats.free += 1;

        match entry {
            Entry::Occupied(value) => value,
            Entry::Free(_) => unreachable!("Handle to a free slot"),
        }
    }

    /// Iterate over all allocated values.
    pub fn iter(&self) -> impl Iterator<Item=(CbId, &T)> + '_ {
        self.slots.iter()
            .enumerate()
            .filter_map(|(idx, slot)| match &slot.entry {
                Entry::Occupied(value) => Some((
                    CbId { idx: idx as u32, generation: slot.generation },
                    value,
                )),
                Entry::Free(_) => None,
            })
    }

    /// The number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of allocated values.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Allocation counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Generation {
    fn advance(&mut self) {
        assert!(self.0 > 0);
        self.0 = self.0.wrapping_add(1).max(1)
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation(1)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use)
            .field("stats", &self.stats)
            .finish()
    }
}
