// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Buf;
use crate::Slice;
use crate::error::Result;

/// A consumer of chunked binary data.
///
/// A *stream episode* begins with a call to [`data`][StreamConsumer::data] where `is_first` is
/// `true` and ends at the next such call or at [`eof`][StreamConsumer::eof]. Implementations may
/// use `is_first` to reset any per-episode state (for example, clearing an accumulation buffer).
///
/// There is no `free` method on this trait: in the original design a stream consumer owned
/// resources that needed an explicit teardown call, but in Rust that role is already played by
/// [`Drop`].
pub trait StreamConsumer {
    /// Delivers the next chunk of a stream episode.
    ///
    /// `is_first` is `true` exactly for the first chunk of a new episode.
    ///
    /// # Errors
    ///
    /// Implementations may fail for their own reasons (for example, a bound sink running out of
    /// memory).
    fn data(&mut self, slice: &Slice, is_first: bool) -> Result<()>;

    /// Signals that the current stream episode has ended with no more data to come.
    ///
    /// # Errors
    ///
    /// Implementations may fail for their own reasons.
    fn eof(&mut self) -> Result<()>;
}

/// A [`StreamConsumer`] that accumulates each episode's chunks into a [`Buf`].
///
/// On `is_first = true`, the target buffer is cleared before the chunk is appended, so only the
/// current episode's bytes ever accumulate in it.
#[derive(Debug)]
pub struct BufSink<'a> {
    target: &'a mut Buf,
}

impl<'a> BufSink<'a> {
    /// Creates a sink that accumulates stream episodes into `target`.
    #[must_use]
    pub fn new(target: &'a mut Buf) -> Self {
        Self { target }
    }
}

impl StreamConsumer for BufSink<'_> {
    fn data(&mut self, slice: &Slice, is_first: bool) -> Result<()> {
        if is_first {
            self.target.clear();
        }
        self.target.append(slice.bytes())
    }

    fn eof(&mut self) -> Result<()> {
        Ok(())
    }
}
