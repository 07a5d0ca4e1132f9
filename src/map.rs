//! Size-class indexing: mapping a block size to the `(fli, sli)` pair that
//! names its free list, and the free-list bitmap masks this implies.
use crate::int::{nlz16, MemSize};

/// The two-level free-list classification parameters for a particular
/// `Pool` instantiation. `fllen`/`sllen` are the pool's `FLI_BITS + 1` and
/// `2.pow(SLI_BITS)` respectively.
#[derive(Copy, Clone)]
pub(crate) struct MapParams {
    ignore_lsbs: u32,
    sli_bits: u32,
    fllen: usize,
    sllen: usize,
}

impl MapParams {
    #[inline]
    pub fn for_mem_size<S: MemSize>(sli_bits: u32, fllen: usize, sllen: usize) -> Self {
        debug_assert_eq!(sllen, 1 << sli_bits);
        Self {
            ignore_lsbs: S::IGNORE_LSBS,
            sli_bits,
            fllen,
            sllen,
        }
    }

    #[inline]
    pub fn fllen(&self) -> usize {
        self.fllen
    }

    #[inline]
    pub fn sllen(&self) -> usize {
        self.sllen
    }

    /// Map a block size (already `ALIGN`-rounded)
    /// to its `(fli, sli)` free-list class. Sizes too large for this
    /// configuration are clamped to the last class rather than rejected,
    /// matching the documented overflow behavior; `Pool` itself refuses
    /// allocation requests whose size exceeds what the pool could ever
    /// serve long before calling this function for an index to insert into.
    #[inline]
    pub fn calc_index(&self, size: usize) -> (usize, usize) {
        let fli_bits = self.fllen - 1;
        let overflow_at = 1usize << (fli_bits as u32 + self.sli_bits + self.ignore_lsbs);
        if size >= overflow_at {
            return (self.fllen - 1, self.sllen - 1);
        }

        let shifted = (size >> (self.sli_bits + self.ignore_lsbs)) as u16;
        let fli = (16 - nlz16(shifted)) as usize;

        let shift = if fli == 0 {
            self.ignore_lsbs
        } else {
            self.ignore_lsbs - 1 + fli as u32
        };
        let sli = (size >> shift) & (self.sllen - 1);

        (fli, sli)
    }

    /// The linear index into a flattened `free_blocks` array, `(fli <<
    /// sli_bits) + sli`.
    #[inline]
    pub fn linear_index(&self, fli: usize, sli: usize) -> usize {
        (fli << self.sli_bits) + sli
    }
}

/// A mask, in the row's MSB-first `u8` bitmap, of every SLI strictly larger
/// than `sli`.
#[inline]
pub(crate) fn sli_mask_above(sli: usize) -> u8 {
    crate::int::sli_above_mask(sli as u32)
}

/// A mask, in the pool's MSB-first `u16` FLI bitmap, of every FLI strictly
/// larger than `fli`.
#[inline]
pub(crate) fn fli_mask_above(fli: usize) -> u16 {
    crate::int::fli_above_mask(fli as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MapParams {
        MapParams::for_mem_size::<u32>(3, 10, 8)
    }

    #[test]
    fn monotone() {
        let p = params();
        let mut last = (0usize, 0usize);
        for size in (32..=1 << 20).step_by(32) {
            let idx = p.calc_index(size);
            assert!(p.linear_index(idx.0, idx.1) >= p.linear_index(last.0, last.1));
            last = idx;
        }
    }

    #[test]
    fn stays_in_bounds() {
        let p = params();
        for size in [0usize, 1, 31, 32, 33, 1 << 20, 1 << 30, usize::MAX] {
            let (fli, sli) = p.calc_index(size);
            assert!(fli < p.fllen());
            assert!(sli < p.sllen());
        }
    }

    #[test]
    fn overflow_routes_to_last_class() {
        let p = params();
        let overflow = 1usize << (9 + 3 + 5);
        assert_eq!(p.calc_index(overflow), (p.fllen() - 1, p.sllen() - 1));
        assert_eq!(p.calc_index(usize::MAX), (p.fllen() - 1, p.sllen() - 1));
    }
}
