//! The pool header, the physical block chain, and the public allocation
//! API built on top of them.
use core::{marker::PhantomData, mem, mem::MaybeUninit, ptr::NonNull};

use crate::{
    block::{prev_phys_block_from_boundary_tag, BlockHdr, FreeBlockHdr},
    error::PoolInitError,
    int::{nlz16, nlz8, MemSize},
    map::{fli_mask_above, sli_mask_above, MapParams},
};

#[cfg(feature = "diagnostics")]
use crate::diag::{DiagState, SanityFlags, Stats};

#[inline]
fn align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(x.checked_add(align - 1)? & !(align - 1))
}

/// A pointer returned by [`Pool::permalloc`].
///
/// This is a distinct type from the `NonNull<u8>` returned by
/// `malloc`/`calloc`/`realloc` so that a permanent allocation cannot be
/// passed to [`Pool::free`]/[`Pool::realloc`] by accident; those only
/// accept plain `NonNull<u8>`. The raw address is still reachable via
/// [`PermaPtr::as_ptr`] for interop with code that must work in terms of
/// bare pointers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PermaPtr(NonNull<u8>);

impl PermaPtr {
    #[inline]
    pub fn as_ptr(self) -> NonNull<u8> {
        self.0
    }
}

#[cfg_attr(doc, svgbobdoc::transform)]
/// The header written at the start of a pool's backing buffer.
///
/// `FLLEN` is `FLI_BITS + 1` and `SLLEN` is `2.pow(SLI_BITS)`; the
/// defaults are `FLLEN = 10`, `SLLEN = 8`. `fl_bitmap` and each byte of
/// `sl_bitmap` are MSB-first: bit `i` (from the top) reflects class `i`'s
/// occupancy, so [`crate::int::nlz16`]/[`crate::int::nlz8`] applied to a
/// masked bitmap directly yield the lowest non-empty class above a cutoff.
///
/// ```svgbob
///  pool buffer
///  ,-------------,----------------------------------------------,--------,
///  | PoolHeader  |  block  |  block  |  ...  |  block            | tail   |
///  '-------------'----------------------------------------------'--------'
///                ^ blocks_start()                                ^ sentinel,
///                                                                   always used
/// ```
#[repr(C)]
pub struct PoolHeader<S, const FLLEN: usize, const SLLEN: usize> {
    pub(crate) len: S,
    /// Byte offset from the header's own start to the start of the pool's
    /// physical tail block (initially the sentinel written by `try_new`).
    /// `permalloc` is the only operation that ever moves the tail, and it
    /// updates this field whenever it does, so the tail's location is never
    /// rederived from a fixed `pool_end() - USED_HDR_LEN` assumption that a
    /// prior `permalloc` call may have invalidated.
    tail_offset: S,
    fl_bitmap: u16,
    sl_bitmap: [u8; FLLEN],
    free_blocks: [[Option<NonNull<FreeBlockHdr<S>>>; SLLEN]; FLLEN],
    #[cfg(feature = "diagnostics")]
    pub(crate) diag: DiagState,
}

/// A handle to a TLSF pool living inside a caller-supplied buffer.
///
/// `Pool` borrows the buffer for `'pool` and never grows it. All
/// mutating operations take `&mut self`, so the borrow checker enforces the
/// single-writer-at-a-time contract; there is no internal
/// locking.
pub struct Pool<'pool, S, const FLLEN: usize, const SLLEN: usize> {
    header: NonNull<PoolHeader<S, FLLEN, SLLEN>>,
    _phantom: PhantomData<&'pool mut [MaybeUninit<u8>]>,
}

/// [`Pool`] instantiated with the default tuning (`FLI_BITS = 9`,
/// `SLI_BITS = 3`) and a 32-bit size field (8-byte pool-wide alignment).
pub type DefaultPool<'pool> = Pool<'pool, u32, 10, 8>;

/// [`Pool`] instantiated with the default tuning and a 16-bit size
/// field (4-byte pool-wide alignment), for pools that fit in 64 KiB.
pub type NarrowPool<'pool> = Pool<'pool, u16, 10, 8>;

impl<'pool, S: MemSize, const FLLEN: usize, const SLLEN: usize> Pool<'pool, S, FLLEN, SLLEN> {
    const SLI_BITS: u32 = {
        if !SLLEN.is_power_of_two() {
            panic!("`SLLEN` must be a power of two");
        }
        SLLEN.trailing_zeros()
    };

    /// A free block's next/prev list pointers and boundary tag are native
    /// pointers, so `S::ALIGN` must be at least pointer alignment or those
    /// words land on an unaligned offset. `NarrowPool` (`u16`, `ALIGN = 4`)
    /// is only sound on targets with 4-byte pointers; this catches it at
    /// pool-construction time on a target where it isn't, rather than
    /// letting every `free`/coalesce perform an unaligned raw read/write.
    const PTR_ALIGN_OK: () = {
        if S::ALIGN < mem::align_of::<Option<NonNull<u8>>>() {
            panic!("`S::ALIGN` must be at least the target's pointer alignment");
        }
    };

    /// `1 << IGNORE_LSBS`: the minimum legal block size.
    pub const MIN_BLOCK_SIZE: usize = 1 << S::IGNORE_LSBS;

    const HEADER_LEN: usize = {
        let raw = mem::size_of::<PoolHeader<S, FLLEN, SLLEN>>();
        (raw + S::ALIGN - 1) & !(S::ALIGN - 1)
    };

    #[inline]
    fn map(&self) -> MapParams {
        MapParams::for_mem_size::<S>(Self::SLI_BITS, FLLEN, SLLEN)
    }

    #[inline]
    pub(crate) fn header(&self) -> &PoolHeader<S, FLLEN, SLLEN> {
        // Safety: `self.header` always points at a live, initialized
        // `PoolHeader` for as long as `self` exists.
        unsafe { self.header.as_ref() }
    }

    #[inline]
    pub(crate) fn header_mut(&mut self) -> &mut PoolHeader<S, FLLEN, SLLEN> {
        unsafe { self.header.as_mut() }
    }

    #[inline]
    pub(crate) fn blocks_start(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.header.as_ptr().cast::<u8>().add(Self::HEADER_LEN)) }
    }

    #[inline]
    pub(crate) fn pool_end(&self) -> NonNull<u8> {
        let len = self.header().len.to_usize();
        unsafe { NonNull::new_unchecked(self.header.as_ptr().cast::<u8>().add(len)) }
    }

    #[inline]
    fn payload_ptr(block: NonNull<u8>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(block.as_ptr().add(S::USED_HDR_LEN)) }
    }

    #[inline]
    fn block_for_ptr(ptr: NonNull<u8>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(S::USED_HDR_LEN)) }
    }

    /// The pool's current physical tail block (the sentinel, or whatever
    /// `permalloc` has since carved in its place). Always used, and always
    /// ends exactly at `pool_end()`.
    #[inline]
    pub(crate) fn tail_block(&self) -> NonNull<BlockHdr<S>> {
        let offset = self.header().tail_offset.to_usize();
        unsafe { NonNull::new_unchecked(self.header.as_ptr().cast::<u8>().add(offset)).cast() }
    }

    #[inline]
    fn set_tail_offset(&mut self, offset: usize) {
        self.header_mut().tail_offset = S::from_usize(offset);
    }

    /// Asserting constructor, matching `est_init`'s contract: the buffer
    /// must be `S::ALIGN`-aligned and hold at least one legal free block
    /// plus a sentinel. Panics (via `debug_assert!`/`assert!`) on violation,
    /// treating these as programmer errors; see [`Self::try_new`]
    /// for a recoverable alternative.
    #[inline]
    pub fn new(buf: &'pool mut [MaybeUninit<u8>]) -> Self {
        match Self::try_new(buf) {
            Ok(pool) => pool,
            Err(e) => panic!("pool initialization failed: {:?}", e),
        }
    }

    /// Initialize a pool over `buf`. Returns `Err` instead of panicking if
    /// `buf` is misaligned, too small to hold a single free block and a
    /// sentinel, or larger than `S` can address.
    pub fn try_new(buf: &'pool mut [MaybeUninit<u8>]) -> Result<Self, PoolInitError> {
        let () = Self::PTR_ALIGN_OK;

        let base = buf.as_mut_ptr() as usize;
        if base % S::ALIGN != 0 {
            return Err(PoolInitError::Misaligned);
        }
        if buf.is_empty() {
            return Err(PoolInitError::ZeroSize);
        }

        let size = buf.len() & !(S::ALIGN - 1);
        if size > S::MAX {
            return Err(PoolInitError::TooLarge);
        }

        let min_tail = Self::HEADER_LEN + Self::MIN_BLOCK_SIZE + S::USED_HDR_LEN;
        if size < min_tail {
            return Err(PoolInitError::TooSmall);
        }

        // A slice's data pointer is never null, even for a zero-length slice.
        let header_ptr: NonNull<PoolHeader<S, FLLEN, SLLEN>> =
            unsafe { NonNull::new_unchecked(buf.as_mut_ptr()).cast() };

        let tail_offset = size - S::USED_HDR_LEN;
        unsafe {
            header_ptr.as_ptr().write(PoolHeader {
                len: S::from_usize(size),
                tail_offset: S::from_usize(tail_offset),
                fl_bitmap: 0,
                sl_bitmap: [0; FLLEN],
                free_blocks: [[None; SLLEN]; FLLEN],
                #[cfg(feature = "diagnostics")]
                diag: DiagState::default(),
            });
        }

        let mut pool = Self {
            header: header_ptr,
            _phantom: PhantomData,
        };

        let block0 = pool.blocks_start();
        let block0_size = size - Self::HEADER_LEN - S::USED_HDR_LEN;

        unsafe {
            let mut free_hdr = block0.cast::<FreeBlockHdr<S>>();
            free_hdr.as_mut().common = BlockHdr::new(block0_size, false, true);
            pool.link_free_block(free_hdr);

            let sentinel = NonNull::new_unchecked(block0.as_ptr().add(block0_size));
            sentinel
                .cast::<BlockHdr<S>>()
                .as_ptr()
                .write(BlockHdr::new(S::USED_HDR_LEN, true, false));
        }

        Ok(pool)
    }

    /// Release the pool. In release builds this is a no-op; with the
    /// `diagnostics` feature it zero-fills the whole buffer before
    /// returning, matching `est_cleanup`'s debug behavior. The caller still
    /// owns and must release the backing buffer.
    pub fn cleanup(self) {
        #[cfg(feature = "diagnostics")]
        unsafe {
            let len = self.header().len.to_usize();
            core::ptr::write_bytes(self.header.as_ptr().cast::<u8>(), 0, len);
        }
    }

    // ---- free-list bitmap/bookkeeping -------------------------------

    #[inline]
    fn class_head(&self, fli: usize, sli: usize) -> Option<NonNull<FreeBlockHdr<S>>> {
        self.header().free_blocks[fli][sli]
    }

    #[inline]
    fn set_class_head(&mut self, fli: usize, sli: usize, v: Option<NonNull<FreeBlockHdr<S>>>) {
        self.header_mut().free_blocks[fli][sli] = v;
    }

    #[inline]
    fn set_bitmap(&mut self, fli: usize, sli: usize) {
        let h = self.header_mut();
        h.fl_bitmap |= crate::int::fli_bit(fli as u32);
        h.sl_bitmap[fli] |= crate::int::sli_bit(sli as u32);
    }

    #[inline]
    fn clear_bitmap(&mut self, fli: usize, sli: usize) {
        let h = self.header_mut();
        h.sl_bitmap[fli] &= !crate::int::sli_bit(sli as u32);
        if h.sl_bitmap[fli] == 0 {
            h.fl_bitmap &= !crate::int::fli_bit(fli as u32);
        }
    }

    #[inline]
    fn next_class(&self, fli: usize, sli: usize) -> Option<(usize, usize)> {
        if sli + 1 < SLLEN {
            Some((fli, sli + 1))
        } else if fli + 1 < FLLEN {
            Some((fli + 1, 0))
        } else {
            None
        }
    }

    /// Link a free block (its size already written into its header) into
    /// the free-list class its size maps to, writing the boundary tag and
    /// setting the bitmaps.
    ///
    /// # Safety
    ///
    /// `block` must point to a block owned by this pool whose header is
    /// initialized with `USED` clear, and which is not currently linked.
    unsafe fn link_free_block(&mut self, mut block: NonNull<FreeBlockHdr<S>>) {
        let size = block.as_ref().common.block_size();
        block.as_ref().write_boundary_tag(block.cast());

        let (fli, sli) = self.map().calc_index(size);
        let old_head = self.class_head(fli, sli);
        block.as_mut().next_free = old_head;
        block.as_mut().prev_free = None;
        if let Some(mut old_head) = old_head {
            old_head.as_mut().prev_free = Some(block);
        }
        self.set_class_head(fli, sli, Some(block));
        self.set_bitmap(fli, sli);
    }

    /// Remove a free block from its class's list, updating the bitmaps if
    /// it was the class's only member.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into the free list its size maps
    /// to.
    unsafe fn unlink_free_block(&mut self, mut block: NonNull<FreeBlockHdr<S>>) {
        let size = block.as_ref().common.block_size();
        let next_free = block.as_ref().next_free;
        let prev_free = block.as_ref().prev_free;

        if let Some(mut next_free) = next_free {
            next_free.as_mut().prev_free = prev_free;
        }

        if let Some(mut prev_free) = prev_free {
            prev_free.as_mut().next_free = next_free;
        } else {
            let (fli, sli) = self.map().calc_index(size);
            debug_assert_eq!(self.class_head(fli, sli), Some(block));
            self.set_class_head(fli, sli, next_free);
            if next_free.is_none() {
                self.clear_bitmap(fli, sli);
            }
        }
    }

    /// The first-fit search: steps 1-4 find a guaranteed-adequate
    /// class via the fast paths and bitmap probes; step 5 falls back to a
    /// linear scan of the request's own class (the only class whose head
    /// was already checked and found too small, and whose *other* entries
    /// first-fit scanning can still examine; any larger class, if
    /// non-empty, would already have been found by steps 2-4).
    unsafe fn find_and_unlink(&mut self, alloc: usize) -> Option<NonNull<FreeBlockHdr<S>>> {
        let (fli0, sli0) = self.map().calc_index(alloc);

        // 1. same-class fast path
        if let Some(head) = self.class_head(fli0, sli0) {
            if head.as_ref().common.block_size() >= alloc {
                self.unlink_free_block(head);
                return Some(head);
            }
        }

        // 2. next-class fast path, 3. SLI bitmap probe, 4. FLI bitmap probe
        if let Some((fli1, sli1)) = self.next_class(fli0, sli0) {
            if let Some(head) = self.class_head(fli1, sli1) {
                self.unlink_free_block(head);
                return Some(head);
            }

            let sl_row = self.header().sl_bitmap[fli1];
            let masked_sl = sl_row & sli_mask_above(sli1);
            if masked_sl != 0 {
                let sli2 = nlz8(masked_sl) as usize;
                let head = match self.class_head(fli1, sli2) {
                    Some(head) => head,
                    None => unreachable_uc(),
                };
                self.unlink_free_block(head);
                return Some(head);
            }

            let masked_fl = self.header().fl_bitmap & fli_mask_above(fli1);
            if masked_fl != 0 {
                let fli2 = nlz16(masked_fl) as usize;
                let sli2 = nlz8(self.header().sl_bitmap[fli2]) as usize;
                let head = match self.class_head(fli2, sli2) {
                    Some(head) => head,
                    None => unreachable_uc(),
                };
                self.unlink_free_block(head);
                return Some(head);
            }
        }

        // 5. first-fit fallback: scan the request's own class past its head
        let mut cursor = self.class_head(fli0, sli0);
        while let Some(block) = cursor {
            if block.as_ref().common.block_size() >= alloc {
                self.unlink_free_block(block);
                return Some(block);
            }
            cursor = block.as_ref().next_free;
        }

        None
    }

    /// Splits a block at `cut` bytes. Returns `None` ("no split") when the
    /// remainder would be too small to form a legal block.
    #[inline]
    fn try_split_size(block_size: usize, cut: usize) -> Option<usize> {
        let remainder = block_size - cut;
        if remainder <= Self::MIN_BLOCK_SIZE {
            None
        } else {
            Some(remainder)
        }
    }

    #[inline]
    fn effective_alloc_size(&self, size: usize) -> Option<usize> {
        let raw = size.checked_add(S::USED_HDR_LEN)?;
        let rounded = align_up(raw, S::ALIGN)?.max(Self::MIN_BLOCK_SIZE);
        if rounded > S::MAX {
            return None;
        }
        Some(rounded)
    }

    /// Turn a just-unlinked free block into a used allocation of `alloc`
    /// bytes, splitting off and re-indexing a remainder if one is legal.
    unsafe fn commit_allocation(&mut self, block: NonNull<FreeBlockHdr<S>>, alloc: usize) {
        let block_u8 = block.cast::<u8>();
        let mut block_hdr = block.cast::<BlockHdr<S>>();
        let block_size = block_hdr.as_ref().block_size();
        let prev_used = block_hdr.as_ref().prev_is_used();

        if let Some(rem_size) = Self::try_split_size(block_size, alloc) {
            *block_hdr.as_mut() = BlockHdr::new(alloc, true, prev_used);

            let mut rem = NonNull::new_unchecked(block_u8.as_ptr().add(alloc))
                .cast::<FreeBlockHdr<S>>();
            rem.as_mut().common = BlockHdr::new(rem_size, false, true);
            self.link_free_block(rem);
        } else {
            *block_hdr.as_mut() = BlockHdr::new(block_size, true, prev_used);
            let next = block_hdr.as_ref().next_phys_block(block_u8);
            (*next.as_ptr()).set_prev_used();
        }
    }

    /// Attempt to allocate a block of at least `size` bytes. Returns `None`
    /// if no free-list class can satisfy the request after the full search;
    /// the pool is left unchanged on failure.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let alloc = self.effective_alloc_size(size)?;
        unsafe {
            let block = match self.find_and_unlink(alloc) {
                Some(block) => block,
                None => {
                    #[cfg(feature = "diagnostics")]
                    log::trace!("malloc({}): no free block found (alloc = {})", size, alloc);
                    return None;
                }
            };
            self.commit_allocation(block, alloc);
            self.note_mutation();
            let ptr = Self::payload_ptr(block.cast());
            #[cfg(feature = "diagnostics")]
            log::trace!("malloc({}) -> {:p}", size, ptr.as_ptr());
            Some(ptr)
        }
    }

    /// As [`Self::malloc`], but zeroes the first `n * elem` bytes of the
    /// payload. `n * elem` is computed with wrapping arithmetic, matching
    /// the documented original behavior; see
    /// [`Self::checked_calloc`] for an overflow-checked alternative.
    pub fn calloc(&mut self, n: usize, elem: usize) -> Option<NonNull<u8>> {
        let total = n.wrapping_mul(elem);
        let ptr = self.malloc(total)?;
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// As [`Self::calloc`], but returns `None` instead of wrapping if
    /// `n * elem` overflows `usize`.
    pub fn checked_calloc(&mut self, n: usize, elem: usize) -> Option<NonNull<u8>> {
        let total = n.checked_mul(elem)?;
        let ptr = self.malloc(total)?;
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Return a previously allocated block to the pool. A `None` pointer is
    /// a no-op.
    ///
    /// # Safety
    ///
    /// `ptr`, if present, must have been returned by a prior
    /// `malloc`/`calloc`/`realloc` call on this pool and not already freed
    /// or passed to `realloc` since.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return,
        };

        #[cfg(feature = "diagnostics")]
        if !self.validate_used_ptr(ptr) {
            return;
        }

        let mut block = Self::block_for_ptr(ptr).cast::<BlockHdr<S>>();
        let mut block_u8 = block.cast::<u8>();
        debug_assert!(block.as_ref().is_used());
        let mut size = block.as_ref().block_size();

        let next = block.as_ref().next_phys_block(block_u8);
        if next.as_ref().is_used() {
            (*next.as_ptr()).set_prev_free();
        } else {
            let next_free = next.cast::<FreeBlockHdr<S>>();
            size += next.as_ref().block_size();
            self.unlink_free_block(next_free);
        }

        if !block.as_ref().prev_is_used() {
            let prev = prev_phys_block_from_boundary_tag::<S>(block_u8);
            size += prev.as_ref().block_size();
            self.unlink_free_block(prev.cast());
            block = prev;
            block_u8 = block.cast();
        }

        let prev_used = block.as_ref().prev_is_used();
        let mut free_block = block.cast::<FreeBlockHdr<S>>();
        free_block.as_mut().common = BlockHdr::new(size, false, prev_used);
        self.link_free_block(free_block);
        self.note_mutation();

        #[cfg(feature = "diagnostics")]
        log::trace!("free({:p}) -> coalesced free block of {} bytes", ptr.as_ptr(), size);
    }

    /// Grow or shrink a previously allocated block in place, splitting off
    /// or absorbing a remainder as needed. `block`'s size must already be
    /// `>= alloc` when this is called.
    unsafe fn finish_realloc_in_place(&mut self, mut block: NonNull<BlockHdr<S>>, alloc: usize) {
        let block_u8 = block.cast::<u8>();
        let block_size = block.as_ref().block_size();
        let prev_used = block.as_ref().prev_is_used();
        debug_assert!(block_size >= alloc);

        if let Some(rem_size) = Self::try_split_size(block_size, alloc) {
            *block.as_mut() = BlockHdr::new(alloc, true, prev_used);

            let rem_ptr = NonNull::new_unchecked(block_u8.as_ptr().add(alloc));
            let mut rem = rem_ptr.cast::<FreeBlockHdr<S>>();
            let mut rem_size = rem_size;
            rem.as_mut().common = BlockHdr::new(rem_size, false, true);

            let succ = rem.as_ref().common.next_phys_block(rem_ptr);
            if succ.as_ref().is_used() {
                (*succ.as_ptr()).set_prev_free();
            } else {
                rem_size += succ.as_ref().block_size();
                self.unlink_free_block(succ.cast());
                rem.as_mut().common.set_block_size(rem_size);
            }
            self.link_free_block(rem);
        } else {
            *block.as_mut() = BlockHdr::new(block_size, true, prev_used);
            let next = block.as_ref().next_phys_block(block_u8);
            (*next.as_ptr()).set_prev_used();
        }
    }

    /// Shrink or grow a previously allocated block. Returns the new
    /// starting address on success; on failure the original allocation
    /// remains valid and unchanged.
    ///
    /// # Safety
    ///
    /// `ptr`, if present, must have been returned by a prior
    /// `malloc`/`calloc`/`realloc` call on this pool.
    pub unsafe fn realloc(&mut self, ptr: Option<NonNull<u8>>, new_size: usize) -> Option<NonNull<u8>> {
        let ptr = match ptr {
            Some(ptr) => ptr,
            None => return self.malloc(new_size),
        };

        #[cfg(feature = "diagnostics")]
        if !self.validate_used_ptr(ptr) {
            return None;
        }

        let alloc = self.effective_alloc_size(new_size)?;
        let block = Self::block_for_ptr(ptr).cast::<BlockHdr<S>>();
        let block_u8 = block.cast::<u8>();
        let old_block_size = block.as_ref().block_size();

        if alloc > old_block_size {
            let next = block.as_ref().next_phys_block(block_u8);
            if !next.as_ref().is_used() {
                let combined = old_block_size + next.as_ref().block_size();
                if combined >= alloc {
                    self.unlink_free_block(next.cast());
                    let prev_used = block.as_ref().prev_is_used();
                    *block.cast::<BlockHdr<S>>().as_ptr() = BlockHdr::new(combined, true, prev_used);
                    self.finish_realloc_in_place(block, alloc);
                    self.note_mutation();
                    return Some(ptr);
                }
            }

            // Allocate-and-copy.
            let new_ptr = self.malloc(new_size)?;
            let copy_len = (old_block_size - S::USED_HDR_LEN).min(self.usable_size(new_ptr));
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_len);
            self.free(Some(ptr));

            #[cfg(feature = "diagnostics")]
            log::trace!("realloc({:p}, {}) moved to {:p}", ptr.as_ptr(), new_size, new_ptr.as_ptr());

            Some(new_ptr)
        } else {
            self.finish_realloc_in_place(block, alloc);
            self.note_mutation();
            Some(ptr)
        }
    }

    /// Carve a live-forever allocation from the pool's tail free block,
    /// never indexing it in the free lists. Falls back to
    /// [`Self::malloc`] (and its fallible contract) if the tail isn't free
    /// or isn't big enough; the returned [`PermaPtr`] must never be passed
    /// to [`Self::free`]/[`Self::realloc`] either way.
    pub fn permalloc(&mut self, size: usize) -> Option<PermaPtr> {
        unsafe {
            let tail_offset = self.header().tail_offset.to_usize();
            let tail = self.tail_block();

            if tail.as_ref().prev_is_used() {
                return self.malloc(size).map(PermaPtr);
            }

            let prev = prev_phys_block_from_boundary_tag::<S>(tail.cast());
            let prev_size = prev.as_ref().block_size();
            let alloc = align_up(size, S::ALIGN)?;

            if prev_size < S::USED_HDR_LEN || prev_size - S::USED_HDR_LEN < alloc {
                return self.malloc(size).map(PermaPtr);
            }

            self.unlink_free_block(prev.cast());
            let prev_used = prev.as_ref().prev_is_used();

            // Either branch consumes the tail block entirely: the new tail
            // always ends exactly at `pool_end()`, but its start address
            // moves earlier, so `tail_offset` must move with it.
            let result = if prev_size - alloc <= Self::MIN_BLOCK_SIZE {
                let combined = prev_size + S::USED_HDR_LEN;
                *prev.as_ptr() = BlockHdr::new(combined, true, prev_used);
                self.set_tail_offset(tail_offset - prev_size);
                PermaPtr(Self::payload_ptr(prev.cast()))
            } else {
                let new_block_ptr = NonNull::new_unchecked(tail.cast::<u8>().as_ptr().sub(alloc));
                let new_block = new_block_ptr.cast::<BlockHdr<S>>();
                *new_block.as_ptr() = BlockHdr::new(alloc + S::USED_HDR_LEN, true, false);

                *prev.as_ptr() = BlockHdr::new(prev_size - alloc, false, prev_used);
                self.link_free_block(prev.cast());

                self.set_tail_offset(tail_offset - alloc);
                PermaPtr(Self::payload_ptr(new_block_ptr))
            };

            self.note_mutation();
            Some(result)
        }
    }

    /// The usable payload capacity of a previously allocated, still-live
    /// block. Always `>=` the size originally requested and a
    /// multiple of `S::ALIGN`.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe {
            let block = Self::block_for_ptr(ptr).cast::<BlockHdr<S>>();
            block.as_ref().block_size() - S::USED_HDR_LEN
        }
    }

    #[cfg(feature = "diagnostics")]
    fn note_mutation(&mut self) {
        if self.header().diag.profiling {
            let stats = self.take_statistics();
            let diag = &mut self.header_mut().diag;
            diag.max_used = diag.max_used.max(stats.used);
            diag.min_used = diag.min_used.min(stats.used);
        }
    }

    #[cfg(not(feature = "diagnostics"))]
    #[inline]
    fn note_mutation(&mut self) {}

    /// Best-effort validation of a pointer about to be passed to
    /// `free`/`realloc`, recording a human-readable reason on failure.
    /// Catches pointers outside the pool, misaligned
    /// pointers, and the most common double-free shape (the block is
    /// already marked free); anything else is undefined behavior in
    /// release builds as documented on `free`/`realloc`.
    #[cfg(feature = "diagnostics")]
    fn validate_used_ptr(&mut self, ptr: NonNull<u8>) -> bool {
        let lo = self.blocks_start().as_ptr() as usize;
        let hi = self.pool_end().as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;

        if addr % S::ALIGN != 0 || addr < lo + S::USED_HDR_LEN || addr >= hi {
            log::warn!("free/realloc: {:p} is outside the pool or misaligned", ptr.as_ptr());
            self.header_mut().diag.error_message = Some("free/realloc: pointer outside pool bounds or misaligned");
            return false;
        }

        let block = Self::block_for_ptr(ptr).cast::<BlockHdr<S>>();
        if !unsafe { block.as_ref().is_used() } {
            log::warn!("free/realloc: {:p} looks like a double free", ptr.as_ptr());
            self.header_mut().diag.error_message =
                Some("free/realloc: pointer already free (double free?)");
            return false;
        }

        true
    }
}

#[inline]
unsafe fn unreachable_uc() -> ! {
    debug_assert!(false, "bitmap claimed a non-empty class with no head");
    core::hint::unreachable_unchecked()
}
