//! The `diagnostics` feature: cumulative statistics, chain sanity checks,
//! allocation profiling, and the debug-only `error_message` channel. None
//! of this is on the hot allocation path when the feature is disabled;
//! `pool.rs` only touches this module behind `#[cfg(feature = "diagnostics")]`.
use core::fmt;

use crate::{int::MemSize, pool::Pool};

/// Cumulative byte counts from a single walk of the physical block chain.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Stats {
    /// Total pool size, header and sentinel included.
    pub total: usize,
    /// Bytes currently held by used blocks (sentinel included).
    pub used: usize,
    /// Bytes currently held by free blocks.
    pub free: usize,
    /// Count of USED/FREE transitions along the chain, minus one — zero
    /// when the free space (if any) forms a single contiguous span.
    pub frag: usize,
}

/// A typed equivalent of the raw sanity-check bitmask.
/// `is_healthy()` is equivalent to the mask being zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SanityFlags {
    pub alignment: bool,
    pub size_too_large: bool,
    pub next_oob: bool,
    pub prev_flag_stale_free: bool,
    pub prev_flag_stale_used: bool,
}

impl SanityFlags {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        *self == Self::empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct DiagState {
    pub profiling: bool,
    pub initial_used: usize,
    pub min_used: usize,
    pub max_used: usize,
    pub error_message: Option<&'static str>,
}

impl<'pool, S: MemSize, const FLLEN: usize, const SLLEN: usize> Pool<'pool, S, FLLEN, SLLEN> {
    /// Walk the physical block chain once and total up used/free bytes and
    /// the number of USED/FREE transitions.
    pub fn take_statistics(&self) -> Stats {
        let total = self.header().len.to_usize();
        let mut used = 0usize;
        let mut free = 0usize;
        let mut transitions = 0usize;
        let mut last_used: Option<bool> = None;

        let mut cur = self.blocks_start();
        let end = self.pool_end().as_ptr() as usize;
        unsafe {
            while (cur.as_ptr() as usize) < end {
                let hdr = cur.cast::<crate::block::BlockHdr<S>>();
                let is_used = hdr.as_ref().is_used();
                let size = hdr.as_ref().block_size();
                if is_used {
                    used += size;
                } else {
                    free += size;
                }
                if let Some(last) = last_used {
                    if last != is_used {
                        transitions += 1;
                    }
                }
                last_used = Some(is_used);
                cur = NonNullExt::add(cur, size);
            }
        }

        let frag = transitions.saturating_sub(1);
        Stats { total, used, free, frag }
    }

    /// Walk the physical block chain and check the structural invariants:
    /// alignment, in-bounds successors, and `PREV_USED` consistency with
    /// the actual predecessor.
    pub fn sanity_check(&self) -> SanityFlags {
        let mut flags = SanityFlags::empty();
        let start = self.blocks_start().as_ptr() as usize;
        let end = self.pool_end().as_ptr() as usize;

        let mut cur = self.blocks_start();
        let mut last_used = true; // the first block's PREV_USED is always 1
        unsafe {
            while (cur.as_ptr() as usize) < end {
                let addr = cur.as_ptr() as usize;
                if addr % S::ALIGN != 0 {
                    flags.alignment = true;
                }

                let hdr = cur.cast::<crate::block::BlockHdr<S>>();
                let size = hdr.as_ref().block_size();
                if size % S::ALIGN != 0 || addr + size > end {
                    flags.size_too_large = true;
                    break;
                }

                let next_addr = addr + size;
                if next_addr < start || next_addr > end {
                    flags.next_oob = true;
                    break;
                }

                let claims_prev_used = hdr.as_ref().prev_is_used();
                if claims_prev_used && !last_used {
                    flags.prev_flag_stale_used = true;
                }
                if !claims_prev_used && last_used {
                    flags.prev_flag_stale_free = true;
                }

                last_used = hdr.as_ref().is_used();
                cur = NonNullExt::add(cur, size);
            }
        }

        if !flags.is_healthy() {
            log::warn!("sanity_check found a corrupted pool: {:?}", flags);
        }
        flags
    }

    /// Begin tracking `{initial, min, max}` used-byte counts across
    /// subsequent mutations.
    pub fn start_profiling(&mut self) {
        let used = self.take_statistics().used;
        let diag = &mut self.header_mut().diag;
        diag.profiling = true;
        diag.initial_used = used;
        diag.min_used = used;
        diag.max_used = used;
    }

    /// Stop tracking; the last observed `{initial, min, max}` remain
    /// readable via [`Self::profiling_stats`].
    pub fn stop_profiling(&mut self) {
        self.header_mut().diag.profiling = false;
    }

    /// The `{initial, min, max}` used-byte counts recorded since the most
    /// recent [`Self::start_profiling`] call.
    pub fn profiling_stats(&self) -> (usize, usize, usize) {
        let diag = &self.header().diag;
        (diag.initial_used, diag.min_used, diag.max_used)
    }

    /// The most recent free-path diagnostic, if any. Cleared
    /// only by being overwritten by a later failed `free`/`realloc` call.
    pub fn error_message(&self) -> Option<&'static str> {
        self.header().diag.error_message
    }
}

impl<'pool, S: MemSize, const FLLEN: usize, const SLLEN: usize> fmt::Debug for Pool<'pool, S, FLLEN, SLLEN> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.take_statistics();
        f.debug_struct("Pool")
            .field("total", &stats.total)
            .field("used", &stats.used)
            .field("free", &stats.free)
            .field("frag", &stats.frag)
            .field("error_message", &self.error_message())
            .finish()
    }
}

/// Pointer-arithmetic shim kept separate from the inherent `Pool` impls so
/// the chain walks above read as plain byte-offset stepping.
struct NonNullExt;
impl NonNullExt {
    #[inline]
    unsafe fn add(ptr: core::ptr::NonNull<u8>, n: usize) -> core::ptr::NonNull<u8> {
        core::ptr::NonNull::new_unchecked(ptr.as_ptr().add(n))
    }
}
