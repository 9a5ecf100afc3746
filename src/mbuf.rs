// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::rc::Rc;

use crate::error::{Result, check_range};
use crate::slice::Slice;

struct Inner {
    bytes: Box<[u8]>,
    finalizer: Option<Box<dyn FnOnce()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer();
        }
    }
}

/// An immutable, reference-counted region of bytes.
///
/// A [`ManagedBuffer`] is the owning half of the buffer/slice pair: it holds the bytes and an
/// optional finalizer that runs exactly once, when the last reference to the buffer is dropped.
/// [`Slice`] is the consumer-facing, range-restricted view over it.
///
/// Cloning a `ManagedBuffer` is cheap (an `Rc` increment) and shares the same underlying bytes —
/// there is no copy-on-write here, since the bytes are immutable for the buffer's entire
/// lifetime.
#[derive(Clone)]
pub struct ManagedBuffer {
    inner: Rc<Inner>,
}

impl fmt::Debug for ManagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBuffer")
            .field("len", &self.inner.bytes.len())
            .field("strong_count", &Rc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

impl ManagedBuffer {
    /// Wraps an owned byte region with no finalizer.
    #[must_use]
    pub fn new(bytes: Box<[u8]>) -> Self {
        Self { inner: Rc::new(Inner { bytes, finalizer: None }) }
    }

    /// Wraps an owned byte region, running `finalizer` exactly once when the last reference to
    /// this buffer (including clones) is dropped.
    ///
    /// This is the hook for cleaning up resources the buffer doesn't itself own but whose
    /// lifetime should track the buffer's — the bytes themselves are freed by `Inner`'s own drop
    /// glue regardless of whether a finalizer is supplied.
    #[must_use]
    pub fn new_with_finalizer(bytes: Box<[u8]>, finalizer: impl FnOnce() + 'static) -> Self {
        Self { inner: Rc::new(Inner { bytes, finalizer: Some(Box::new(finalizer)) }) }
    }

    /// Allocates a new buffer and copies `bytes` into it.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`][crate::CorkError::OutOfMemory] if allocation fails.
    pub fn new_copy(bytes: &[u8]) -> Result<Self> {
        let mut vec = Vec::new();
        vec.try_reserve_exact(bytes.len()).map_err(|_| crate::CorkError::OutOfMemory)?;
        vec.extend_from_slice(bytes);
        Ok(Self::new(vec.into_boxed_slice()))
    }

    /// The number of bytes this buffer holds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.bytes.len()
    }

    /// Whether this buffer holds zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.bytes.is_empty()
    }

    /// The number of outstanding handles to the underlying storage, including this one.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    /// Creates a [`Slice`] viewing `bytes[offset..offset + length]` of this buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::BadRange`][crate::CorkError::BadRange] if the range is not a valid
    /// sub-range of this buffer.
    pub fn slice(&self, offset: usize, length: usize) -> Result<Slice> {
        check_range(offset, length, self.len())?;
        Ok(Slice::from_managed_buffer(self, offset, length))
    }
}
