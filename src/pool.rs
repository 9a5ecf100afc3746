// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use tracing::trace;

/// A fixed-size-object arena with LIFO reuse.
///
/// A [`Mempool<T>`] hands out slots sized for exactly one `T` at a time, growing by allocating
/// whole blocks of slots as needed and recycling freed slots before carving new ones. This is
/// cheaper than going through the global allocator for every allocation of a small, frequently
/// reused type — the intended use within this crate is [`CycleCollector`][crate::cycle::CycleCollector]'s
/// per-object header bookkeeping.
///
/// A pool must be emptied (every [`PoolHandle`] dropped) before the pool itself is dropped.
/// Dropping a non-empty pool is a programming error and panics in debug builds; see
/// [`Mempool::done`].
///
/// A [`PoolHandle`] holds a raw pointer back to its pool, so a `Mempool` must not be moved (e.g.
/// via `mem::swap`) while any handle it has lent out is still alive.
pub struct Mempool<T> {
    elements_per_block: usize,
    blocks: Vec<Box<[MaybeUninit<T>]>>,
    free_list: Vec<SlotId>,
    next_uncarved: usize,
    allocated_count: usize,
    init: Option<Box<dyn FnMut(NonNull<u8>)>>,
    done: Option<Box<dyn FnMut(NonNull<u8>)>>,
}

impl<T> fmt::Debug for Mempool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("elements_per_block", &self.elements_per_block)
            .field("blocks", &self.blocks.len())
            .field("allocated_count", &self.allocated_count)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotId {
    block: usize,
    index: usize,
}

impl<T> Mempool<T> {
    /// Creates a pool that allocates `T`s in blocks of approximately `block_size` bytes.
    ///
    /// `block_size` is a target, not a hard limit: the pool always carves at least one element
    /// per block, even if `size_of::<T>()` exceeds `block_size`.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let element_size = size_of::<T>().max(1);
        let elements_per_block = (block_size / element_size).max(1);
        Self {
            elements_per_block,
            blocks: Vec::new(),
            free_list: Vec::new(),
            next_uncarved: 0,
            allocated_count: 0,
            init: None,
            done: None,
        }
    }

    /// Creates a pool with `init`/`done` hooks.
    ///
    /// `init` runs exactly once per slot, the first time that slot is carved out of a freshly
    /// allocated block — before any value is stored in it. `done` runs exactly once per ever-carved
    /// slot, when the pool itself is torn down via [`Mempool::done`]. Neither hook runs on ordinary
    /// acquire/release cycles; they exist for amortizing address-keyed bookkeeping that has nothing
    /// to do with the stored value itself.
    #[must_use]
    pub fn with_hooks(
        block_size: usize,
        init: impl FnMut(NonNull<u8>) + 'static,
        done: impl FnMut(NonNull<u8>) + 'static,
    ) -> Self {
        Self { init: Some(Box::new(init)), done: Some(Box::new(done)), ..Self::new(block_size) }
    }

    /// The number of slots currently lent out.
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Acquires a slot and stores `value` in it, growing the pool if no free slot is available.
    pub fn acquire(&mut self, value: T) -> PoolHandle<T> {
        let id = self.free_list.pop().unwrap_or_else(|| self.carve());
        // SAFETY: `id` names a slot that is currently free (either just carved, or popped from
        // the free list, which only ever holds slots whose previous value has been dropped), so
        // writing a fresh value into it does not overwrite a live `T` or alias a borrow.
        unsafe {
            self.slot_ptr(id).as_ptr().write(MaybeUninit::new(value));
        }
        self.allocated_count += 1;
        trace!(allocated = self.allocated_count, "mempool: acquired slot");
        PoolHandle { id, pool: self.into() }
    }

    fn carve(&mut self) -> SlotId {
        let block = self.next_uncarved / self.elements_per_block;
        let index = self.next_uncarved % self.elements_per_block;
        if block == self.blocks.len() {
            let mut new_block = Vec::with_capacity(self.elements_per_block);
            new_block.resize_with(self.elements_per_block, MaybeUninit::uninit);
            self.blocks.push(new_block.into_boxed_slice());
        }
        self.next_uncarved += 1;
        let id = SlotId { block, index };
        if let Some(init) = &mut self.init {
            // SAFETY: the slot was just carved and holds no value yet; `init` is documented to
            // treat the pointer as raw address bookkeeping, not a valid `T`.
            let ptr = unsafe { NonNull::new_unchecked(self.blocks[block][index].as_mut_ptr().cast::<u8>()) };
            init(ptr);
        }
        id
    }

    fn slot_ptr(&mut self, id: SlotId) -> NonNull<MaybeUninit<T>> {
        // SAFETY: `id` was produced by `carve` against `self.blocks`, so the indices are in bounds.
        unsafe { NonNull::new_unchecked(&mut self.blocks[id.block][id.index]) }
    }

    fn release(&mut self, id: SlotId) {
        // SAFETY: `id` identifies a slot handed out by `acquire`, which always wrote a valid `T`
        // into it; this is the only place that reads it back out, and it does so exactly once.
        let value = unsafe { self.slot_ptr(id).as_ptr().read().assume_init() };
        drop(value);
        self.free_list.push(id);
        self.allocated_count -= 1;
        trace!(allocated = self.allocated_count, "mempool: released slot");
    }

    /// Explicitly tears down the pool, running the `done` hook once per ever-carved slot.
    ///
    /// Calling this is optional: dropping the pool without calling it first runs the same hooks,
    /// the same number of times. Calling it explicitly just gives a point in the code where that
    /// teardown is guaranteed to have already happened (for example, before asserting on
    /// external, hook-maintained bookkeeping).
    ///
    /// # Panics
    ///
    /// Panics if any [`PoolHandle`] is still outstanding.
    pub fn done(&mut self) {
        assert_eq!(self.allocated_count, 0, "Mempool::done called with outstanding allocations");
        self.run_done_hooks();
    }

    fn run_done_hooks(&mut self) {
        let Some(mut done) = self.done.take() else { return };
        for block in 0..self.blocks.len() {
            let carved_in_block = if block + 1 == self.blocks.len() {
                self.next_uncarved - block * self.elements_per_block
            } else {
                self.elements_per_block
            };
            for index in 0..carved_in_block {
                // SAFETY: every slot in `0..carved_in_block` was carved by `carve`.
                let ptr = unsafe { NonNull::new_unchecked(self.blocks[block][index].as_mut_ptr().cast::<u8>()) };
                done(ptr);
            }
        }
    }
}

impl<T> Drop for Mempool<T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.allocated_count, 0,
            "Mempool dropped with outstanding allocations; call Mempool::done instead"
        );
        self.run_done_hooks();
    }
}

/// An owning handle to a slot lent out by a [`Mempool`].
///
/// Dropping the handle runs `T`'s destructor and returns the slot to the pool's free list.
pub struct PoolHandle<T> {
    id: SlotId,
    pool: NonNull<Mempool<T>>,
}

impl<T> PoolHandle<T> {
    /// Returns a reference to the stored value.
    #[must_use]
    pub fn get(&self) -> &T {
        // SAFETY: the pool outlives every handle it has lent out (the pool is never torn down
        // while `allocated_count > 0`), and `acquire` always wrote a valid `T` into this slot.
        unsafe { (*self.pool.as_ptr()).blocks[self.id.block][self.id.index].assume_init_ref() }
    }

    /// Returns a mutable reference to the stored value.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: see `get`; `&mut self` guarantees exclusive access to this handle, and each
        // handle owns a distinct slot.
        unsafe { (*self.pool.as_ptr()).blocks[self.id.block][self.id.index].assume_init_mut() }
    }
}

impl<T> fmt::Debug for PoolHandle<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolHandle").field(self.get()).finish()
    }
}

impl<T> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        // SAFETY: the pool is guaranteed to still be alive: it cannot be torn down (`done`) while
        // this handle's existence keeps `allocated_count > 0`.
        unsafe { (*self.pool.as_ptr()).release(self.id) }
    }
}
