// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use tracing::trace;

use super::gc_ref::{self, Gc, Trace};
use super::header::{Color, GcHeader};
use crate::error::Result;

/// The heap-allocated, pinned-in-place state a [`CycleCollector`] shares with every [`GcHeader`]
/// it owns.
///
/// Boxing this separately from [`CycleCollector`] itself means moving a `CycleCollector` (for
/// example, returning it from a function) never invalidates the raw `collector` pointer stored in
/// each header.
pub(crate) struct CollectorState {
    roots: RefCell<Vec<Option<NonNull<GcHeader>>>>,
    root_capacity: usize,
    live_count: Cell<usize>,
}

impl CollectorState {
    fn root_count(&self) -> usize {
        self.roots.borrow().len()
    }

    fn root_at(&self, index: usize) -> Option<NonNull<GcHeader>> {
        self.roots.borrow()[index]
    }

    fn clear_root(&self, index: usize) {
        self.roots.borrow_mut()[index] = None;
    }

    fn push_root(&self, header_ptr: NonNull<GcHeader>) {
        self.roots.borrow_mut().push(Some(header_ptr));
    }

    pub(crate) fn dec_live_count(&self) {
        self.live_count.set(self.live_count.get() - 1);
    }
}

/// A single-threaded, reference-counted heap with cycle detection.
///
/// See the [module-level docs][super] for the algorithm this implements. A collector owns the
/// root buffer used to track possible cycle roots; every [`Gc`] handle it allocates holds a raw
/// pointer back into that state, so **a `CycleCollector` must outlive every `Gc<T>` it has
/// allocated** — dropping the collector while a handle is still alive leaves that handle
/// dangling, the same hazard as freeing a [`Mempool`][crate::Mempool] with outstanding
/// [`PoolHandle`][crate::PoolHandle]s.
pub struct CycleCollector {
    state: Box<CollectorState>,
    _not_send_sync: PhantomData<*const ()>,
}

impl fmt::Debug for CycleCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleCollector")
            .field("live_count", &self.state.live_count.get())
            .field("root_count", &self.state.root_count())
            .finish_non_exhaustive()
    }
}

/// The default capacity of a collector's root buffer, matching the original implementation's
/// `ROOTS_SIZE`.
pub const DEFAULT_ROOT_BUFFER_CAPACITY: usize = 1024;

impl Default for CycleCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCollector {
    /// Creates a collector with the default root buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root_buffer_capacity(DEFAULT_ROOT_BUFFER_CAPACITY)
    }

    /// Creates a collector whose root buffer grows to at most `capacity` possible cycle roots
    /// before an implicit [`collect`][Self::collect] is triggered.
    #[must_use]
    pub fn with_root_buffer_capacity(capacity: usize) -> Self {
        let state = CollectorState { roots: RefCell::new(Vec::new()), root_capacity: capacity.max(1), live_count: Cell::new(0) };
        Self { state: Box::new(state), _not_send_sync: PhantomData }
    }

    /// Allocates a new garbage-collected object, returning a handle with a reference count of
    /// one.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`][crate::CorkError::OutOfMemory] if the allocation fails.
    pub fn alloc<T: Trace + 'static>(&self, value: T) -> Result<Gc<T>> {
        let collector_ptr = NonNull::from(self.state.as_ref());
        let ptr = gc_ref::new_box(value, collector_ptr)?;
        self.state.live_count.set(self.state.live_count.get() + 1);
        trace!(live = self.state.live_count.get(), "cycle: allocated object");
        Ok(Gc::from_box_ptr(ptr))
    }

    /// The number of objects this collector currently owns (allocated, not yet freed).
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.live_count.get()
    }

    /// The number of possible cycle roots currently buffered, awaiting the next collection.
    #[must_use]
    pub fn buffered_root_count(&self) -> usize {
        self.state.root_count()
    }

    /// Runs one pass of trial deletion, reclaiming any garbage cycles currently reachable only
    /// from the root buffer.
    ///
    /// This also runs implicitly whenever the root buffer would otherwise grow past its
    /// configured capacity.
    pub fn collect(&self) {
        collect_cycles(&self.state);
    }
}

impl Drop for CycleCollector {
    fn drop(&mut self) {
        collect_cycles(&self.state);
        let live = self.state.live_count();
        if live > 0 {
            tracing::warn!(
                live,
                "CycleCollector dropped with live objects remaining; any outstanding Gc handles are now dangling"
            );
        }
        debug_assert!(live == 0, "CycleCollector dropped with {live} live object(s) still outstanding");
    }
}

pub(crate) fn decref(header_ptr: NonNull<GcHeader>) {
    // SAFETY: `header_ptr` always names a `GcHeader` embedded in a live `GcBox`, since it is only
    // ever produced from a `Gc<T>` that is about to drop or clone.
    let header = unsafe { header_ptr.as_ref() };
    header.dec_ref_count();
    trace!(ref_count = header.ref_count(), "cycle: decrementing");
    if header.ref_count() == 0 {
        release(header_ptr);
    } else {
        possible_root(header_ptr);
    }
}

fn release(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    header.trace(header_ptr, &mut |child| decref(child));
    header.set_color(Color::Black);
    if !header.buffered() {
        free_object(header_ptr);
    }
}

fn possible_root(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    if header.color() == Color::Purple {
        return;
    }
    trace!("cycle: marking possible cycle root");
    header.set_color(Color::Purple);
    if header.buffered() {
        return;
    }
    header.set_buffered(true);
    // SAFETY: `header.collector` is set at allocation time to the collector that owns this
    // object, and that collector is required to outlive every object it allocated.
    let collector = unsafe { header.collector.as_ref() };
    if collector.root_count() >= collector.root_capacity {
        collect_cycles(collector);
    }
    collector.push_root(header_ptr);
}

fn free_object(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let collector = unsafe { header_ptr.as_ref().collector };
    GcHeader::free(header_ptr);
    // SAFETY: see `possible_root`.
    unsafe { collector.as_ref() }.dec_live_count();
}

fn mark_gray(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    if header.color() != Color::Gray {
        header.set_color(Color::Gray);
        header.trace(header_ptr, &mut |child| mark_gray_step(child));
    }
}

fn mark_gray_step(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    header.dec_ref_count();
    mark_gray(header_ptr);
}

fn mark_roots(state: &CollectorState) {
    trace!("cycle: marking roots");
    for i in 0..state.root_count() {
        let Some(header_ptr) = state.root_at(i) else { continue };
        // SAFETY: see `decref`.
        let header = unsafe { header_ptr.as_ref() };
        if header.color() == Color::Purple {
            mark_gray(header_ptr);
        } else {
            header.set_buffered(false);
            state.clear_root(i);
            if header.color() == Color::Black && header.ref_count() == 0 {
                free_object(header_ptr);
            }
        }
    }
}

fn scan_black(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    header.set_color(Color::Black);
    header.trace(header_ptr, &mut |child| scan_black_step(child));
}

fn scan_black_step(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    header.inc_ref_count();
    if header.color() != Color::Black {
        scan_black(header_ptr);
    }
}

fn scan(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    if header.color() != Color::Gray {
        return;
    }
    if header.ref_count() > 0 {
        scan_black(header_ptr);
    } else {
        header.set_color(Color::White);
        header.trace(header_ptr, &mut |child| scan(child));
    }
}

fn scan_roots(state: &CollectorState) {
    trace!("cycle: scanning roots");
    for i in 0..state.root_count() {
        if let Some(header_ptr) = state.root_at(i) {
            scan(header_ptr);
        }
    }
}

fn collect_white(header_ptr: NonNull<GcHeader>) {
    // SAFETY: see `decref`.
    let header = unsafe { header_ptr.as_ref() };
    if header.color() == Color::White && !header.buffered() {
        header.set_color(Color::Black);
        header.trace(header_ptr, &mut |child| collect_white(child));
        free_object(header_ptr);
    }
}

fn collect_roots(state: &CollectorState) {
    trace!("cycle: collecting roots");
    for i in 0..state.root_count() {
        if let Some(header_ptr) = state.root_at(i) {
            // SAFETY: see `decref`.
            let header = unsafe { header_ptr.as_ref() };
            header.set_buffered(false);
            collect_white(header_ptr);
        }
    }
    state.roots.borrow_mut().clear();
}

fn collect_cycles(state: &CollectorState) {
    trace!("cycle: collecting garbage cycles");
    mark_roots(state);
    scan_roots(state);
    collect_roots(state);
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use tracing_test::traced_test;

    use super::CycleCollector;
    use crate::cycle::{ErasedGc, Gc, Trace};

    struct Leaf;
    impl Trace for Leaf {
        fn trace(&self, _visitor: &mut dyn FnMut(&dyn ErasedGc)) {}
    }

    struct Node {
        next: RefCell<Option<Gc<Node>>>,
        dropped: Rc<Cell<usize>>,
    }

    impl Trace for Node {
        fn trace(&self, visitor: &mut dyn FnMut(&dyn ErasedGc)) {
            if let Some(next) = self.next.borrow().as_ref() {
                visitor(next);
            }
        }
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.dropped.set(self.dropped.get() + 1);
        }
    }

    #[test]
    fn acyclic_object_is_freed_when_last_handle_drops() {
        let collector = CycleCollector::new();
        let handle = collector.alloc(Leaf).unwrap();
        assert_eq!(collector.live_count(), 1);
        drop(handle);
        assert_eq!(collector.live_count(), 0);
    }

    #[test]
    fn cloning_increments_and_dropping_decrements_ref_count() {
        let collector = CycleCollector::new();
        let handle = collector.alloc(Leaf).unwrap();
        assert_eq!(handle.ref_count(), 1);
        let clone = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        drop(clone);
        assert_eq!(handle.ref_count(), 1);
        drop(handle);
        assert_eq!(collector.live_count(), 0);
    }

    #[test]
    fn self_cycle_is_collected() {
        let collector = CycleCollector::new();
        let dropped = Rc::new(Cell::new(0));
        let node = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped) }).unwrap();
        *node.next.borrow_mut() = Some(node.clone());
        assert_eq!(collector.live_count(), 1);

        drop(node);
        assert_eq!(dropped.get(), 0, "a self-cycle must survive a plain drop");

        collector.collect();
        assert_eq!(dropped.get(), 1, "collect() must reclaim the self-cycle");
        assert_eq!(collector.live_count(), 0);
    }

    #[test]
    fn two_node_cycle_is_collected_and_acyclic_survivor_is_not() {
        let collector = CycleCollector::new();
        let dropped_a = Rc::new(Cell::new(0));
        let dropped_b = Rc::new(Cell::new(0));

        let a = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped_a) }).unwrap();
        let b = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped_b) }).unwrap();
        *a.next.borrow_mut() = Some(b.clone());
        *b.next.borrow_mut() = Some(a.clone());

        drop(a);
        drop(b);
        assert_eq!(dropped_a.get() + dropped_b.get(), 0);

        collector.collect();
        assert_eq!(dropped_a.get(), 1);
        assert_eq!(dropped_b.get(), 1);
    }

    #[test]
    fn external_reference_keeps_cycle_member_alive_through_collect() {
        let collector = CycleCollector::new();
        let dropped_a = Rc::new(Cell::new(0));
        let dropped_b = Rc::new(Cell::new(0));

        let a = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped_a) }).unwrap();
        let b = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped_b) }).unwrap();
        *a.next.borrow_mut() = Some(b.clone());
        *b.next.borrow_mut() = Some(a.clone());

        let kept_alive = a.clone();
        drop(b);
        collector.collect();
        assert_eq!(dropped_a.get(), 0, "a is still externally referenced");
        assert_eq!(dropped_b.get(), 0, "b is reachable from the externally referenced a");

        drop(a);
        drop(kept_alive);
        collector.collect();
        assert_eq!(dropped_a.get(), 1);
        assert_eq!(dropped_b.get(), 1);
    }

    #[test]
    fn collector_drop_reclaims_remaining_cycles() {
        let dropped = Rc::new(Cell::new(0));
        {
            let collector = CycleCollector::new();
            let node = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped) }).unwrap();
            *node.next.borrow_mut() = Some(node.clone());
            drop(node);
        }
        assert_eq!(dropped.get(), 1, "dropping the collector must collect outstanding cycles");
    }

    #[test]
    #[traced_test]
    fn collecting_a_cycle_emits_a_trace_event() {
        let collector = CycleCollector::new();
        let dropped = Rc::new(Cell::new(0));
        let node = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped) }).unwrap();
        *node.next.borrow_mut() = Some(node.clone());
        drop(node);
        collector.collect();
        assert!(logs_contain("collecting garbage cycles"));
    }

    #[test]
    fn root_buffer_overflow_triggers_an_implicit_collect() {
        let collector = CycleCollector::with_root_buffer_capacity(4);
        let dropped = Rc::new(Cell::new(0));
        let mut cycles = Vec::new();
        for _ in 0..16 {
            let node = collector.alloc(Node { next: RefCell::new(None), dropped: Rc::clone(&dropped) }).unwrap();
            *node.next.borrow_mut() = Some(node.clone());
            cycles.push(node);
        }
        for node in cycles {
            drop(node);
        }
        assert!(
            collector.buffered_root_count() < 16,
            "an overflowing root buffer should have triggered at least one implicit collect"
        );
        collector.collect();
        assert_eq!(dropped.get(), 16);
    }
}
