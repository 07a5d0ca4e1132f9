//! A two-level segregated-fit (TLSF) allocator that carves blocks out of a
//! single, caller-supplied, fixed-size buffer.
//!
//! Unlike a general-purpose allocator, a [`pool::Pool`] never asks the
//! operating system for more memory: the buffer it is given at
//! construction time is the entire arena for the pool's lifetime. This
//! makes it suitable for `no_std` targets, real-time code that cannot
//! tolerate an unbounded-latency `brk`/`mmap` call, and any context where
//! memory use must be bounded and auditable up front.
//!
//! Allocation, deallocation, and reallocation are all O(1) (amortized for
//! `realloc`'s copy path) thanks to the classic two-level segregated free
//! list with a boundary-tag coalescing scheme; see [`pool`] for the data
//! structures and [`map`] for the size-class index.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

pub mod block;
pub mod error;
pub mod int;
pub mod map;
pub mod pool;

#[cfg(feature = "diagnostics")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "diagnostics")))]
pub mod diag;

pub use crate::{
    error::PoolInitError,
    int::MemSize,
    pool::{DefaultPool, NarrowPool, PermaPtr, Pool, PoolHeader},
};

#[cfg(feature = "diagnostics")]
pub use crate::diag::{SanityFlags, Stats};

#[cfg(test)]
mod tests;
