use std::collections::HashMap;

use crate::txn::TransactionHandle;

/// Non-owning reference into an [`Arena`]: an index plus a generation
/// counter. This is how a callback holds a reference back to its
/// transaction without creating the callback → transaction → callback
/// cycle a plain `Arc`/owning pointer would: the arena, not the reference,
/// owns the handle, and a stale `HandleRef` (generation mismatch) resolves
/// to `None` instead of a dangling or resurrected handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRef {
    index: usize,
    generation: u32,
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// A simple arena + free-list, the ownership model the per-partition
/// transaction handle pools are built from (design note, `spec.md` §9).
/// Exclusively mutated by the owning partition's executor thread.
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new() }
    }

    fn insert(&mut self, value: T) -> HandleRef {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            HandleRef { index, generation: slot.generation }
        } else {
            let index = self.slots.len();
            self.slots.push(Slot { value: Some(value), generation: 0 });
            HandleRef { index, generation: 0 }
        }
    }

    fn get(&self, handle: HandleRef) -> Option<&T> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    fn get_mut(&mut self, handle: HandleRef) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Removes the value, bumping the slot's generation so any previously
    /// issued `HandleRef` to it becomes invalid, and returns the handle to
    /// the free list for reuse.
    fn remove(&mut self, handle: HandleRef) -> Option<T> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        value
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Which typed pool a handle was drawn from. The partition executor is the
/// exclusive owner of handles drawn from its own pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Local,
    Remote,
    MapReduce,
    Distributed,
    Prefetch,
}

/// Per-partition typed object pools for transaction handles, one arena per
/// `HandleKind`.
pub struct TxnHandlePool {
    arenas: HashMap<HandleKind, Arena<TransactionHandle>>,
    idle_high_water_mark: usize,
}

impl TxnHandlePool {
    pub fn new(idle_high_water_mark: usize) -> Self {
        let mut arenas = HashMap::new();
        for kind in [
            HandleKind::Local,
            HandleKind::Remote,
            HandleKind::MapReduce,
            HandleKind::Distributed,
            HandleKind::Prefetch,
        ] {
            arenas.insert(kind, Arena::new());
        }
        Self { arenas, idle_high_water_mark }
    }

    pub fn acquire(&mut self, kind: HandleKind, handle: TransactionHandle) -> HandleRef {
        let arena = self.arenas.get_mut(&kind).expect("all HandleKind variants are pre-registered");
        let len_before = arena.len();
        let handle_ref = arena.insert(handle);
        if len_before + 1 > self.idle_high_water_mark {
            tracing::debug!(kind = ?kind, size = len_before + 1, "txn handle pool above idle high-water mark");
        }
        handle_ref
    }

    pub fn get(&self, kind: HandleKind, handle: HandleRef) -> Option<&TransactionHandle> {
        self.arenas.get(&kind)?.get(handle)
    }

    pub fn get_mut(&mut self, kind: HandleKind, handle: HandleRef) -> Option<&mut TransactionHandle> {
        self.arenas.get_mut(&kind)?.get_mut(handle)
    }

    /// Releases a handle back to its pool after FINISHED/ABORTED and after
    /// all callbacks have released their references (enforced by callers:
    /// the queue manager and the speculative scheduler never hold a
    /// `HandleRef` past the point they invoke this).
    pub fn release(&mut self, kind: HandleKind, handle: HandleRef) -> Option<TransactionHandle> {
        let mut released = self.arenas.get_mut(&kind)?.remove(handle)?;
        released.reset_for_pool_return();
        Some(released)
    }

    pub fn len(&self, kind: HandleKind) -> usize {
        self.arenas.get(&kind).map_or(0, Arena::len)
    }
}
