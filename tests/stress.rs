//! Randomized operation-replay stress test, grounded on the bytecode-driven
//! fuzzer pattern used for the free-list search logic elsewhere in this
//! lineage, and on the five-way malloc/calloc/realloc/permalloc/free mix in
//! `original_source/test.c`: a byte stream is decoded into a sequence of
//! calls, replayed against a real pool, and checked against the pool's own
//! sanity and statistics machinery every so often.
use std::{boxed::Box, mem::MaybeUninit, vec::Vec};

use quickcheck_macros::quickcheck;
use tlsfpool::{DefaultPool, Pool};

struct Live {
    ptr: core::ptr::NonNull<u8>,
    size: usize,
}

#[quickcheck]
fn random_ops(bytecode: Vec<u8>) {
    let _ = env_logger::builder().is_test(true).try_init();
    random_ops_inner(bytecode);
}

fn random_ops_inner(bytecode: Vec<u8>) -> Option<()> {
    let mut buf: Box<[MaybeUninit<u8>]> = vec![MaybeUninit::new(0u8); 1 << 18].into_boxed_slice();
    let mut pool = DefaultPool::try_new(&mut buf).ok()?;

    let mut live: Vec<Live> = Vec::new();
    // Addresses handed out by `permalloc`: never freed, never reallocated,
    // but tracked so we can assert a live `malloc` pointer never aliases one.
    let mut perma: Vec<core::ptr::NonNull<u8>> = Vec::new();
    let mut it = bytecode.iter().copied();
    let mut step = 0u32;

    loop {
        let op = match it.next() {
            Some(b) => b % 10,
            None => break,
        };
        step += 1;

        match op {
            0..=3 => {
                // malloc: 40%
                let lo = it.next()?;
                let hi = it.next()?;
                let size = (u16::from_le_bytes([lo, hi]) as usize) % 4096;
                if let Some(ptr) = pool.malloc(size) {
                    let cap = pool.usable_size(ptr);
                    assert!(cap >= size, "usable_size must honor the request");
                    assert!(!perma.contains(&ptr), "malloc must never reuse a permalloc address");
                    live.push(Live { ptr, size: cap });
                }
            }
            4..=5 => {
                // calloc: 20%
                let n = (it.next()? as usize) % 64 + 1;
                let elem = (it.next()? as usize) % 64 + 1;
                let total = n * elem;
                if let Some(ptr) = pool.calloc(n, elem) {
                    let check_len = total.min(64);
                    for i in 0..check_len {
                        assert_eq!(unsafe { *ptr.as_ptr().add(i) }, 0, "calloc must zero the payload");
                    }
                    let cap = pool.usable_size(ptr);
                    assert!(cap >= total);
                    live.push(Live { ptr, size: cap });
                }
            }
            6..=7 => {
                // realloc: 20%
                if !live.is_empty() {
                    let idx = (it.next()? as usize) % live.len();
                    let lo = it.next()?;
                    let hi = it.next()?;
                    let new_size = (u16::from_le_bytes([lo, hi]) as usize) % 4096;
                    let victim = &mut live[idx];
                    if let Some(new_ptr) = unsafe { pool.realloc(Some(victim.ptr), new_size) } {
                        victim.ptr = new_ptr;
                        victim.size = pool.usable_size(new_ptr);
                        assert!(victim.size >= new_size);
                    }
                }
            }
            8 => {
                // permalloc: 10%
                let lo = it.next()?;
                let hi = it.next()?;
                let size = (u16::from_le_bytes([lo, hi]) as usize) % 512;
                if let Some(p) = pool.permalloc(size) {
                    let ptr = p.as_ptr();
                    assert!(!live.iter().any(|l| l.ptr == ptr), "permalloc must never reuse a live malloc address");
                    perma.push(ptr);
                }
            }
            9 => {
                // free: 10%
                if !live.is_empty() {
                    let idx = (it.next()? as usize) % live.len();
                    let victim = live.swap_remove(idx);
                    unsafe { pool.free(Some(victim.ptr)) };
                }
            }
            _ => unreachable!(),
        }

        #[cfg(feature = "diagnostics")]
        if step % 200 == 0 {
            assert!(pool.sanity_check().is_healthy(), "pool invariants violated after {} ops", step);
            let stats = pool.take_statistics();
            assert!(
                stats.used + stats.free <= stats.total,
                "block accounting must never exceed the pool's total size"
            );
        }
    }

    #[cfg(feature = "diagnostics")]
    assert!(pool.sanity_check().is_healthy());

    for live in live {
        unsafe { pool.free(Some(live.ptr)) };
    }

    Some(())
}
