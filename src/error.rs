// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Errors returned by the fallible operations in this crate.
///
/// Programming errors — violations of a type's own invariants, such as destroying a
/// [`Mempool`][crate::Mempool] with outstanding allocations — are not represented here. Those
/// conditions panic, because they indicate a bug in the caller rather than a runtime condition
/// the caller can recover from.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CorkError {
    /// A requested allocation or growth could not be satisfied.
    #[error("out of memory")]
    OutOfMemory,

    /// An `(offset, length)` pair did not describe a valid sub-range of the source.
    #[error("bad range: offset {offset} length {length} exceeds source length {source_len}")]
    BadRange {
        /// The requested starting offset.
        offset: usize,
        /// The requested length.
        length: usize,
        /// The length of the source the range was validated against.
        source_len: usize,
    },
}

/// The `Result` alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CorkError>;

pub(crate) fn check_range(offset: usize, length: usize, source_len: usize) -> Result<()> {
    let Some(end) = offset.checked_add(length) else {
        return Err(CorkError::BadRange { offset, length, source_len });
    };
    if offset > source_len || end > source_len {
        return Err(CorkError::BadRange { offset, length, source_len });
    }
    Ok(())
}
