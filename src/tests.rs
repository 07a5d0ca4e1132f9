use core::mem::MaybeUninit;

use crate::pool::{DefaultPool, Pool};

fn make_buf(size: usize) -> std::boxed::Box<[MaybeUninit<u8>]> {
    vec![MaybeUninit::new(0u8); size].into_boxed_slice()
}

#[test]
fn init_rejects_undersized_buffer() {
    let mut buf = make_buf(8);
    assert!(DefaultPool::try_new(&mut buf).is_err());
}

#[test]
fn init_rejects_misaligned_buffer() {
    let mut buf = make_buf(4097);
    // Force misalignment by starting one byte in, if the allocator didn't
    // already hand back an 8-byte-aligned address.
    let (_, unaligned) = buf.split_at_mut(1);
    if (unaligned.as_ptr() as usize) % 8 != 0 {
        assert!(DefaultPool::try_new(unaligned).is_err());
    }
}

#[test]
fn simple_malloc_free_pair() {
    let mut buf = make_buf(1 << 16);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let a = pool.malloc(64).unwrap();
    let b = pool.malloc(128).unwrap();
    assert_ne!(a, b);
    assert!(pool.usable_size(a) >= 64);
    assert!(pool.usable_size(b) >= 128);

    unsafe {
        pool.free(Some(a));
        pool.free(Some(b));
    }
}

#[test]
fn coalesce_left_and_right() {
    let mut buf = make_buf(1 << 16);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let a = pool.malloc(64).unwrap();
    let b = pool.malloc(64).unwrap();
    let c = pool.malloc(64).unwrap();

    unsafe {
        pool.free(Some(a));
        pool.free(Some(c));
        pool.free(Some(b));
    }

    // The whole region should be usable as one block again: a fresh
    // request comfortably larger than any single original chunk but
    // smaller than the reunited span must succeed.
    let big = pool.malloc(4096).unwrap();
    unsafe { pool.free(Some(big)) };
}

#[test]
fn realloc_grows_in_place_when_next_is_free() {
    let mut buf = make_buf(1 << 16);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let a = pool.malloc(64).unwrap();
    let spacer = pool.malloc(64).unwrap();
    unsafe { pool.free(Some(spacer)) };

    unsafe {
        *a.as_ptr() = 0x42;
        let grown = pool.realloc(Some(a), 96).unwrap();
        assert_eq!(grown, a, "growing into an adjacent free block must not move data");
        assert_eq!(*grown.as_ptr(), 0x42);
        pool.free(Some(grown));
    }
}

#[test]
fn realloc_moves_when_it_must() {
    let mut buf = make_buf(1 << 12);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let a = pool.malloc(32).unwrap();
    let _pin = pool.malloc(32).unwrap(); // keeps `a`'s neighbor used
    unsafe {
        core::ptr::write_bytes(a.as_ptr(), 0xAB, 32);
        let moved = pool.realloc(Some(a), 512).unwrap();
        let mut same = true;
        for i in 0..32 {
            if *moved.as_ptr().add(i) != 0xAB {
                same = false;
            }
        }
        assert!(same, "realloc must preserve the original payload bytes");
        pool.free(Some(moved));
    }
}

#[test]
fn calloc_zeroes_payload() {
    let mut buf = make_buf(1 << 12);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let p = pool.calloc(16, 4).unwrap();
    unsafe {
        for i in 0..64 {
            assert_eq!(*p.as_ptr().add(i), 0);
        }
        pool.free(Some(p));
    }
}

#[test]
fn checked_calloc_rejects_overflow() {
    let mut buf = make_buf(1 << 12);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();
    assert!(pool.checked_calloc(usize::MAX, 2).is_none());
}

#[test]
fn permalloc_carves_from_tail_and_never_frees() {
    let mut buf = make_buf(1 << 16);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let p1 = pool.permalloc(256).unwrap();
    let before = pool.malloc(16).unwrap();
    unsafe { pool.free(Some(before)) };

    // permalloc carves from the tail, so ordinary allocations still work
    // afterward and are independent of it.
    let q = pool.malloc(64).unwrap();
    unsafe { pool.free(Some(q)) };

    let _ = p1.as_ptr();
}

#[test]
fn permalloc_falls_back_to_malloc_when_request_exceeds_pool() {
    let mut buf = make_buf(1 << 12);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();
    assert!(pool.permalloc(1 << 20).is_none());
}

#[test]
fn usable_size_is_monotone_in_requested_size() {
    let mut buf = make_buf(1 << 14);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    let small = pool.malloc(8).unwrap();
    let small_cap = pool.usable_size(small);
    unsafe { pool.free(Some(small)) };

    let large = pool.malloc(800).unwrap();
    let large_cap = pool.usable_size(large);
    unsafe { pool.free(Some(large)) };

    assert!(large_cap >= 800);
    assert!(large_cap > small_cap);
}

#[test]
fn exhaustion_returns_none_without_corrupting_pool() {
    let mut buf = make_buf(1 << 12);
    let mut pool = DefaultPool::try_new(&mut buf).unwrap();

    assert!(pool.malloc(1 << 20).is_none());
    // The pool must still be usable after a failed request.
    let p = pool.malloc(16).unwrap();
    unsafe { pool.free(Some(p)) };
}

#[cfg(feature = "diagnostics")]
mod diagnostic_scenarios {
    use super::make_buf;
    use crate::pool::DefaultPool;

    #[test]
    fn init_statistics_are_consistent() {
        let mut buf = make_buf(1 << 20);
        let pool = DefaultPool::try_new(&mut buf).unwrap();
        assert!(pool.sanity_check().is_healthy());
        let stats = pool.take_statistics();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.frag, 0);
        assert!(stats.free > 0 && stats.free < stats.total);
    }

    #[test]
    fn coalesce_leaves_zero_fragmentation() {
        let mut buf = make_buf(1 << 16);
        let mut pool = DefaultPool::try_new(&mut buf).unwrap();

        let a = pool.malloc(64).unwrap();
        let b = pool.malloc(64).unwrap();
        let c = pool.malloc(64).unwrap();
        unsafe {
            pool.free(Some(a));
            pool.free(Some(c));
            pool.free(Some(b));
        }

        let stats = pool.take_statistics();
        assert_eq!(stats.frag, 0);
        assert!(pool.sanity_check().is_healthy());
    }

    #[test]
    fn double_free_is_caught_and_recorded() {
        let mut buf = make_buf(4096);
        let mut pool = DefaultPool::try_new(&mut buf).unwrap();
        let p = pool.malloc(32).unwrap();
        unsafe {
            pool.free(Some(p));
            pool.free(Some(p));
        }
        assert!(pool.error_message().is_some());
    }

    #[test]
    fn profiling_tracks_extremes() {
        let mut buf = make_buf(1 << 14);
        let mut pool = DefaultPool::try_new(&mut buf).unwrap();
        pool.start_profiling();

        let a = pool.malloc(1024).unwrap();
        let b = pool.malloc(1024).unwrap();
        unsafe { pool.free(Some(a)) };

        pool.stop_profiling();
        let (_initial, _min, max) = pool.profiling_stats();
        assert!(max >= 2048);
        unsafe { pool.free(Some(b)) };
    }

    #[test]
    fn permalloc_leaves_pool_sane() {
        let mut buf = make_buf(1 << 12);
        let mut pool = DefaultPool::try_new(&mut buf).unwrap();
        let _p1 = pool.permalloc(256).unwrap();
        assert!(pool.sanity_check().is_healthy());
    }

    #[test]
    fn repeated_permalloc_leaves_pool_sane() {
        // A second `permalloc` call must find the tail wherever the first
        // one left it, not at a fixed `pool_end() - USED_HDR_LEN` offset.
        let mut buf = make_buf(1 << 12);
        let mut pool = DefaultPool::try_new(&mut buf).unwrap();
        let _p1 = pool.permalloc(64).unwrap();
        let _p2 = pool.permalloc(64).unwrap();
        let _p3 = pool.permalloc(64).unwrap();
        assert!(pool.sanity_check().is_healthy());
    }
}
