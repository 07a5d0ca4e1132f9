//! Error types surfaced through the fallible parts of the public API
//! (`Pool::try_new`). The allocation operations themselves report failure
//! through `Option`/`Option<PermaPtr>` rather than a richer error type,
//! matching the original single-return-channel contract.
use core::fmt;

/// Why [`crate::pool::Pool::try_new`] refused to initialize a pool over a
/// given buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PoolInitError {
    /// The buffer's base address isn't a multiple of the pool's alignment.
    Misaligned,
    /// The buffer is empty.
    ZeroSize,
    /// The buffer, even after rounding down to the alignment, has no room
    /// for the pool header plus one legal free block and a sentinel.
    TooSmall,
    /// The buffer is larger than the pool's size field (`S`) can address.
    TooLarge,
}

impl fmt::Display for PoolInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Misaligned => "pool buffer is not aligned to the pool's required alignment",
            Self::ZeroSize => "pool buffer is empty",
            Self::TooSmall => "pool buffer is too small to hold a header, one free block, and a sentinel",
            Self::TooLarge => "pool buffer is larger than the pool's size field can address",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PoolInitError {}
