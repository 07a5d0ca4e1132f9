//! Integer helpers: the pool's size-field width and MSB-first bitmap
//! operations used by the free-list index (`crate::map`).
use core::fmt::Debug;

/// A type usable as a pool's tagged block-size field.
///
/// Two bits of every value are reserved for the `USED`/`PREV_USED` flags
/// (see [`crate::block`]), so the usable size range is `[0, Self::MAX >> 2]`
/// bits wide in practice, rounded down further by `ALIGN`.
///
/// This crate ships implementations for `u16` (paired with 4-byte alignment,
/// for 32-bit targets) and `u32` (paired with 8-byte alignment, for 64-bit
/// targets). The pairing matters: the boundary tag and free-list pointers
/// are native pointers, so `ALIGN` must be at least the target's pointer
/// alignment for the free-block header's trailing boundary-tag word to land
/// on a properly aligned offset. `Pool::try_new` enforces this with a
/// compile-time check at construction, so pairing `u16`'s 4-byte alignment
/// with a 64-bit target is a build-time error rather than a silent
/// misaligned access.
pub trait MemSize: Copy + Eq + Ord + Debug + Default + 'static {
    /// The pool-wide alignment paired with this width (4 or 8).
    const ALIGN: usize;

    /// `ALIGN`'s base-2 logarithm, i.e. the number of low bits of a size
    /// that `calc_index` ignores.
    const IGNORE_LSBS: u32;

    /// The byte length reserved for a used block's header, including any
    /// padding needed so the payload that follows is `ALIGN`-aligned.
    const USED_HDR_LEN: usize;

    /// The maximum representable value, i.e. the largest pool a value of
    /// this type can address.
    const MAX: usize;

    fn to_usize(self) -> usize;

    /// Truncating conversion. Callers must have already checked `v <=
    /// Self::MAX` where the truncation would be observable.
    fn from_usize(v: usize) -> Self;
}

macro_rules! impl_mem_size {
    ($ty:ty, align = $align:expr, ignore_lsbs = $ignore_lsbs:expr) => {
        impl MemSize for $ty {
            const ALIGN: usize = $align;
            const IGNORE_LSBS: u32 = $ignore_lsbs;
            const USED_HDR_LEN: usize = $align;
            const MAX: usize = <$ty>::MAX as usize;

            #[inline]
            fn to_usize(self) -> usize {
                self as usize
            }

            #[inline]
            fn from_usize(v: usize) -> Self {
                v as $ty
            }
        }
    };
}

impl_mem_size!(u16, align = 4, ignore_lsbs = 4);
impl_mem_size!(u32, align = 8, ignore_lsbs = 5);

/// Count of leading zero bits in a 16-bit word, i.e. the MSB-first index of
/// the highest set bit. Returns `16` for zero.
#[inline]
pub const fn nlz16(x: u16) -> u32 {
    x.leading_zeros()
}

/// Count of leading zero bits in an 8-bit word. Returns `8` for zero.
#[inline]
pub const fn nlz8(x: u8) -> u32 {
    x.leading_zeros()
}

/// The MSB-first bit mask for bit index `i` of a 16-bit bitmap (`i == 0` is
/// the most significant bit).
#[inline]
pub const fn fli_bit(i: u32) -> u16 {
    0x8000u16 >> i
}

/// The MSB-first bit mask for bit index `i` of an 8-bit bitmap.
#[inline]
pub const fn sli_bit(i: u32) -> u8 {
    0x80u8 >> i
}

/// A mask covering every bit whose MSB-first index is strictly greater than
/// `i` (i.e. the "larger class" bits in the row's free-list bitmap).
#[inline]
pub const fn fli_above_mask(i: u32) -> u16 {
    fli_bit(i).wrapping_sub(1)
}

/// The 8-bit counterpart of [`fli_above_mask`].
#[inline]
pub const fn sli_above_mask(i: u32) -> u8 {
    sli_bit(i).wrapping_sub(1)
}
