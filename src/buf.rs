// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::ops::Index;

use crate::error::{CorkError, Result};
use crate::mbuf::ManagedBuffer;

/// A growable, owning byte buffer.
///
/// `Buf` is the producer-facing half of the buffer/slice pair: callers append to it, and once
/// its contents are final it can be [`seal`][Buf::seal]ed into a [`ManagedBuffer`] for sharing via
/// [`Slice`][crate::Slice]. Capacity only ever grows; [`clear`][Buf::clear] and
/// [`truncate`][Buf::truncate] shrink the logical length without releasing the backing storage.
pub struct Buf {
    bytes: Vec<u8>,
}

impl Default for Buf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf").field("len", &self.bytes.len()).field("capacity", &self.bytes.capacity()).finish()
    }
}

impl Buf {
    /// Creates an empty buffer with no initial capacity.
    #[must_use]
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Creates an empty buffer with room for at least `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if the allocation fails.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(capacity).map_err(|_| CorkError::OutOfMemory)?;
        Ok(Self { bytes })
    }

    /// The number of bytes currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer currently holds zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The number of bytes the buffer can hold without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// The buffer's contents as a byte slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Empties the buffer without releasing its capacity.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Shortens the buffer to `len` bytes, dropping any bytes past that point.
    ///
    /// Does nothing if `len` is greater than or equal to the current length.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Ensures the buffer can hold at least `min_capacity` bytes without reallocating, doubling
    /// the current capacity first and only falling back to `min_capacity` if that isn't enough.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if the allocation fails; the buffer is left unchanged
    /// in that case.
    pub fn ensure_capacity(&mut self, min_capacity: usize) -> Result<()> {
        if self.bytes.capacity() >= min_capacity {
            return Ok(());
        }
        let target = self.bytes.capacity().saturating_mul(2).max(min_capacity);
        let additional = target - self.bytes.len();
        self.bytes.try_reserve(additional).map_err(|_| CorkError::OutOfMemory)
    }

    /// Replaces the buffer's contents with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if growing to fit `bytes` fails; the buffer is left
    /// unchanged in that case.
    pub fn set(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        self.bytes.clear();
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends `bytes` to the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if growing to fit `bytes` fails; the buffer is left
    /// unchanged in that case.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(self.bytes.len() + bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Replaces the buffer's contents with the UTF-8 bytes of `s`.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if growing to fit `s` fails; the buffer is left
    /// unchanged in that case.
    pub fn set_str(&mut self, s: &str) -> Result<()> {
        self.set(s.as_bytes())
    }

    /// Appends the UTF-8 bytes of `s` to the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if growing to fit `s` fails; the buffer is left
    /// unchanged in that case.
    pub fn append_str(&mut self, s: &str) -> Result<()> {
        self.append(s.as_bytes())
    }

    /// Appends formatted content, the same way [`write!`] would write into a `String`.
    ///
    /// # Errors
    ///
    /// Returns [`CorkError::OutOfMemory`] if the formatting machinery's internal allocations
    /// fail.
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        use fmt::Write as _;
        struct Adapter<'a> {
            buf: &'a mut Buf,
            error: Option<CorkError>,
        }
        impl fmt::Write for Adapter<'_> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                match self.buf.append_str(s) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        self.error = Some(err);
                        Err(fmt::Error)
                    }
                }
            }
        }
        let mut adapter = Adapter { buf: self, error: None };
        match adapter.write_fmt(args) {
            Ok(()) => Ok(()),
            Err(_) => Err(adapter.error.unwrap_or(CorkError::OutOfMemory)),
        }
    }

    /// Consumes the buffer, transferring its storage into a [`ManagedBuffer`] with a reference
    /// count of one.
    #[must_use]
    pub fn seal(self) -> ManagedBuffer {
        ManagedBuffer::new(self.bytes.into_boxed_slice())
    }
}

impl PartialEq for Buf {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Buf {}

impl Index<usize> for Buf {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.bytes[index]
    }
}

/// Appends formatted content to a [`Buf`], analogous to [`write!`] for a `String`.
///
/// # Errors
///
/// Returns [`CorkError::OutOfMemory`] if the underlying allocation fails.
#[macro_export]
macro_rules! buf_write {
    ($buf:expr, $($arg:tt)*) => {
        $buf.append_fmt(format_args!($($arg)*))
    };
}
