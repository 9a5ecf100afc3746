// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::collector::CollectorState;
use super::gc_ref::{ErasedGc, Trace};

/// An object's color during a trial-deletion pass.
///
/// Named and ordered to match Bacon & Rajan's presentation, not for any numeric significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    /// In use, or free.
    Black,
    /// Possible member of a garbage cycle.
    Gray,
    /// Confirmed member of a garbage cycle.
    White,
    /// Possible root of a garbage cycle.
    Purple,
}

/// The header every garbage-collected object carries, type-erased via [`GcVTable`].
///
/// Laid out as the first field of `GcBox<T>` (see `gc_ref.rs`), so a `NonNull<GcBox<T>>` and a
/// `NonNull<GcHeader>` name the same address and can be losslessly cast between each other.
pub(crate) struct GcHeader {
    pub(crate) ref_count: Cell<u32>,
    pub(crate) color: Cell<Color>,
    pub(crate) buffered: Cell<bool>,
    pub(crate) collector: NonNull<CollectorState>,
    pub(crate) vtable: &'static GcVTable,
}

/// Type-erased operations on a `GcBox<T>`, resolved once per `T` at allocation time.
///
/// This plays the role a Rust trait object normally would, but a trait object can't be recovered
/// from a type-erased header pointer without already knowing the concrete type, so this crate
/// uses a manual vtable instead — the same shape `bytesbuf`'s `BlockRefVTable` uses to dispatch
/// through an opaque state pointer.
pub(crate) struct GcVTable {
    /// Drops the value in place and deallocates the `GcBox<T>`. Must be called at most once per
    /// object, and only once every live child reference has already been accounted for.
    pub(crate) free: unsafe fn(NonNull<GcHeader>),
    /// Invokes the object's [`Trace`] implementation, calling `visit` once per child.
    pub(crate) trace: unsafe fn(NonNull<GcHeader>, &mut dyn FnMut(NonNull<GcHeader>)),
}

pub(crate) struct VTableOf<T>(PhantomData<fn() -> T>);

impl<T: Trace + 'static> VTableOf<T> {
    pub(crate) const VTABLE: GcVTable = GcVTable { free: free_fn::<T>, trace: trace_fn::<T> };
}

unsafe fn free_fn<T: Trace + 'static>(header: NonNull<GcHeader>) {
    use super::gc_ref::GcBox;
    let box_ptr = header.cast::<GcBox<T>>();
    // SAFETY: `header` always points at the header field of a `GcBox<T>` allocated by
    // `CycleCollector::alloc::<T>`, which installed this exact function as `vtable.free`. The
    // caller guarantees this runs at most once per object.
    let layout = std::alloc::Layout::new::<GcBox<T>>();
    // SAFETY: see above; nothing else still holds a reference into this object.
    unsafe { std::ptr::drop_in_place(box_ptr.as_ptr()) };
    // SAFETY: `box_ptr` was allocated with this exact layout by `new_box`.
    unsafe { std::alloc::dealloc(box_ptr.as_ptr().cast::<u8>(), layout) };
}

unsafe fn trace_fn<T: Trace + 'static>(header: NonNull<GcHeader>, visit: &mut dyn FnMut(NonNull<GcHeader>)) {
    use super::gc_ref::GcBox;
    let box_ptr = header.cast::<GcBox<T>>();
    // SAFETY: see `free_fn`; the box is still fully initialized when this is called (tracing
    // only ever happens before `free`).
    let value = unsafe { &box_ptr.as_ref().value };
    value.trace(&mut |child: &dyn ErasedGc| visit(child.header_ptr()));
}

impl GcHeader {
    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    pub(crate) fn inc_ref_count(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    pub(crate) fn dec_ref_count(&self) {
        self.ref_count.set(self.ref_count.get() - 1);
    }

    pub(crate) fn color(&self) -> Color {
        self.color.get()
    }

    pub(crate) fn set_color(&self, color: Color) {
        self.color.set(color);
    }

    pub(crate) fn buffered(&self) -> bool {
        self.buffered.get()
    }

    pub(crate) fn set_buffered(&self, buffered: bool) {
        self.buffered.set(buffered);
    }

    pub(crate) fn trace(&self, header_ptr: NonNull<GcHeader>, visit: &mut dyn FnMut(NonNull<GcHeader>)) {
        // SAFETY: `header_ptr` points at `self`, which by construction originated from
        // `CycleCollector::alloc`, so `self.vtable.trace` is the matching instantiation.
        unsafe { (self.vtable.trace)(header_ptr, visit) }
    }

    pub(crate) fn free(header_ptr: NonNull<GcHeader>) {
        // SAFETY: the header's own vtable instantiation is always the one `alloc` installed for
        // its concrete type, and callers of `free` guarantee this runs exactly once.
        unsafe {
            let vtable = header_ptr.as_ref().vtable;
            (vtable.free)(header_ptr);
        }
    }
}
