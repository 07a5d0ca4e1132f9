//! Physical block layout: the tagged size word, the used/free header
//! shapes, and the boundary tag that lets a free block's successor find it
//! in O(1).
use core::{mem, ptr::NonNull};

use crate::int::MemSize;

/// Bit 0 of a block's tagged size field: the block is in use.
pub const USED: usize = 0b01;
/// Bit 1 of a block's tagged size field: the physically preceding block is
/// in use (or this is the first block in the pool).
pub const PREV_USED: usize = 0b10;
const FLAG_MASK: usize = USED | PREV_USED;

/// The header shared by every physical block, used and free alike: just the
/// tagged size word. Everything else (payload, free-list links, boundary
/// tag) lives at a computed offset rather than as a struct field, because a
/// used block's header is only `S::USED_HDR_LEN` bytes and a free block's
/// tail boundary tag floats at the block's *end*, not at a fixed offset from
/// its start.
#[repr(C)]
#[derive(Debug)]
pub struct BlockHdr<S> {
    size: S,
}

/// The header of a free block. `next_free`/`prev_free` immediately follow
/// the size word; the self-pointer boundary tag described in the module
/// documentation lives in the block's last pointer-sized word, which is
/// usually further away and is addressed with [`boundary_tag_ptr`].
#[repr(C)]
#[derive(Debug)]
pub struct FreeBlockHdr<S> {
    pub common: BlockHdr<S>,
    pub next_free: Option<NonNull<FreeBlockHdr<S>>>,
    pub prev_free: Option<NonNull<FreeBlockHdr<S>>>,
}

impl<S: MemSize> BlockHdr<S> {
    #[inline]
    pub fn new(size_bytes: usize, used: bool, prev_used: bool) -> Self {
        debug_assert_eq!(size_bytes & FLAG_MASK, 0);
        let mut flags = 0;
        if used {
            flags |= USED;
        }
        if prev_used {
            flags |= PREV_USED;
        }
        Self {
            size: S::from_usize(size_bytes | flags),
        }
    }

    /// The block's total byte length, header included, with the flag bits
    /// masked off.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.size.to_usize() & !FLAG_MASK
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        (self.size.to_usize() & USED) != 0
    }

    #[inline]
    pub fn prev_is_used(&self) -> bool {
        (self.size.to_usize() & PREV_USED) != 0
    }

    #[inline]
    pub fn set_used(&mut self) {
        self.size = S::from_usize(self.size.to_usize() | USED);
    }

    #[inline]
    pub fn set_free(&mut self) {
        self.size = S::from_usize(self.size.to_usize() & !USED);
    }

    #[inline]
    pub fn set_prev_used(&mut self) {
        self.size = S::from_usize(self.size.to_usize() | PREV_USED);
    }

    #[inline]
    pub fn set_prev_free(&mut self) {
        self.size = S::from_usize(self.size.to_usize() & !PREV_USED);
    }

    /// Overwrite the size bits while preserving the flag bits.
    #[inline]
    pub fn set_block_size(&mut self, size_bytes: usize) {
        debug_assert_eq!(size_bytes & FLAG_MASK, 0);
        let flags = self.size.to_usize() & FLAG_MASK;
        self.size = S::from_usize(size_bytes | flags);
    }

    /// The physically following block. Always dereferenceable: the pool
    /// always ends with a used sentinel block, so callers never walk past
    /// it as long as they stop once `next_phys_block()` returns the
    /// sentinel itself.
    ///
    /// # Safety
    ///
    /// `self_ptr` must point to `*self`, which must be a live block inside
    /// a pool (i.e. not the sentinel).
    #[inline]
    pub unsafe fn next_phys_block(&self, self_ptr: NonNull<u8>) -> NonNull<BlockHdr<S>> {
        NonNull::new_unchecked(self_ptr.as_ptr().add(self.block_size())).cast()
    }
}

impl<S: MemSize> FreeBlockHdr<S> {
    /// Write the boundary tag (this block's own start address) into the
    /// last pointer-sized word of the block.
    ///
    /// # Safety
    ///
    /// `self_ptr` must point to `*self`, and the block must be at least
    /// `size_of::<usize>()` bytes long (guaranteed by `MIN_BLOCK_SIZE`).
    #[inline]
    pub unsafe fn write_boundary_tag(&self, self_ptr: NonNull<u8>) {
        boundary_tag_ptr::<S>(self_ptr, self.common.block_size()).write(self_ptr.as_ptr() as usize);
    }
}

/// The address of the pointer-sized boundary-tag word belonging to the
/// block of size `block_size` starting at `block_ptr`.
///
/// # Safety
///
/// `block_ptr .. block_ptr + block_size` must be valid for reads/writes of
/// `usize`-alignment.
#[inline]
pub unsafe fn boundary_tag_ptr<S>(block_ptr: NonNull<u8>, block_size: usize) -> *mut usize {
    block_ptr
        .as_ptr()
        .add(block_size - mem::size_of::<usize>())
        .cast()
}

/// Read the boundary tag stored immediately before `ptr`, i.e. the start
/// address of the physically preceding block. Only valid to call when that
/// predecessor is free (`PREV_USED` clear).
///
/// # Safety
///
/// The `usize` at `ptr - size_of::<usize>()` must have been written by
/// [`FreeBlockHdr::write_boundary_tag`] for a block that is still free.
#[inline]
pub unsafe fn prev_phys_block_from_boundary_tag<S>(ptr: NonNull<u8>) -> NonNull<BlockHdr<S>> {
    let tag_ptr = (ptr.as_ptr() as *mut usize).sub(1);
    NonNull::new_unchecked(tag_ptr.read() as *mut BlockHdr<S>)
}
