// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Reference-counted memory primitives: a cycle-collecting garbage collector and a
//! buffer/slice/stream toolkit.
//!
//! This crate provides two cores that compose but do not depend on one another:
//!
//! * [`cycle`] — [`CycleCollector`][cycle::CycleCollector] and [`Gc`][cycle::Gc], a
//!   single-threaded reference-counted heap with cycle collection via Bacon & Rajan's
//!   synchronous trial-deletion algorithm.
//! * The buffer/view toolkit — [`Buf`], [`ManagedBuffer`], [`Slice`], and the
//!   [`StreamConsumer`] trait, a coordinated trio (plus one) for producing, sharing, and
//!   consuming binary data without needless copies.
//!
//! A third, lower-level piece, [`Mempool`], is a fixed-size-object arena. It doesn't back
//! [`cycle`]'s root buffer (that's a plain growable vector, like the allocator-backed array it
//! mirrors) but is exposed in its own right as a reusable building block with the same
//! single-owner discipline as everything else here.
//!
//! None of the types in this crate are [`Send`] or [`Sync`]: every component here is confined
//! to a single owning execution context. See the [`cycle`] module for why that choice was made
//! and what a multi-threaded variant would need to change.

mod buf;
pub mod cycle;
mod error;
mod mbuf;
mod pool;
mod slice;
mod stream;

pub use buf::Buf;
pub use error::{CorkError, Result};
pub use mbuf::ManagedBuffer;
pub use pool::{Mempool, PoolHandle};
pub use slice::Slice;
pub use stream::{BufSink, StreamConsumer};
