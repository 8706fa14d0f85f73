use crate::mappers::arena_mapper::ArenaMapper;

use self::format::init;

use super::*;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};


fn heap(capacity: usize, granularity: usize, multiplier: usize) -> RawChunkMalloc<ArenaMapper> {
    init();
    let config = Config::new().with_multiplier(multiplier);
    RawChunkMalloc::with_config(ArenaMapper::new(capacity, granularity), config)
}

fn snapshot(heap: &RawChunkMalloc<ArenaMapper>) -> Vec<ChunkInfo> {
    heap.chunks().collect()
}

fn info_of(heap: &RawChunkMalloc<ArenaMapper>, payload: *mut u8) -> ChunkInfo {
    heap.chunks()
        .find(|info| info.payload() == payload as usize)
        .expect("Payload should belong to a chunk.")
}

/// Merges sorted, possibly touching `[start, end)` ranges.
fn union(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = vec![];
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if last.1 == start => last.1 = end,
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn check_invariants(heap: &RawChunkMalloc<ArenaMapper>) {
    let infos = snapshot(heap);

    if let Some(head) = infos.first() {
        assert_eq!(head.prev, 0, "Head should have no predecessor.");
    }
    if let Some(tail) = infos.last() {
        assert_eq!(tail.next, 0, "Tail should have no successor.");
    }
    for pair in infos.windows(2) {
        assert_eq!(pair[0].next, pair[1].addr);
        assert_eq!(pair[1].prev, pair[0].addr, "Links should be doubly consistent.");
        if pair[0].end() == pair[1].addr {
            assert!(
                !(pair[0].available && pair[1].available),
                "Adjacent chunks {} and {} are both free.",
                pair[0],
                pair[1]
            );
        }
    }

    let mut by_addr = infos.clone();
    by_addr.sort_unstable_by_key(|info| info.addr);
    for pair in by_addr.windows(2) {
        assert!(pair[0].end() <= pair[1].addr, "Chunks {} and {} overlap.", pair[0], pair[1]);
    }

    let chunk_ranges = union(infos.iter().map(|info| (info.addr, info.end())).collect());
    let region_ranges = union(
        heap.mapper()
            .regions()
            .iter()
            .map(|&(start, len)| (start, start + len))
            .collect(),
    );
    assert_eq!(chunk_ranges, region_ranges, "Chunks should tile the mapped regions.");

    for info in &infos {
        assert_eq!(info.payload() % WORD_ALIGN, 0);
    }
}

#[test]
fn test_growth_sizing() {
    let mut heap = heap(4096, 1, 10);

    let p = heap.allocate(8);
    assert!(!p.is_null());

    let region = 10 * (8 + HEADER_SIZE);
    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].payload(), p as usize);
    assert_eq!(infos[0].size, 8);
    assert!(!infos[0].available);
    assert_eq!(infos[1].size, region - HEADER_SIZE - 8 - HEADER_SIZE);
    assert!(infos[1].available);
    assert_eq!(heap.mapper().regions(), &[(infos[0].addr, region)]);

    if cfg!(target_pointer_width = "64") {
        assert_eq!(region, 320);
        assert_eq!(infos[1].size, 264);
    }
    check_invariants(&heap);
}

#[test]
fn test_sequential_alloc_release_converges() {
    let mut heap = heap(4096, 1, 10);

    let p1 = heap.allocate(64);
    let p2 = heap.allocate(64);
    assert!(!p1.is_null() && !p2.is_null());
    assert_eq!(p2 as usize - p1 as usize, 64 + HEADER_SIZE);

    unsafe {
        assert_eq!(heap.release(p1), Ok(()));
        check_invariants(&heap);
        assert_eq!(heap.release(p2), Ok(()));
    }
    check_invariants(&heap);

    let infos = snapshot(&heap);
    let stats = heap.stats();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].available);
    assert_eq!(infos[0].payload(), p1 as usize);
    assert_eq!(infos[0].size, stats.mapped_bytes - HEADER_SIZE);
}

#[test]
fn test_release_null() {
    let mut heap = heap(4096, 1, 10);
    assert_eq!(unsafe { heap.release(null_mut()) }, Err(ReleaseError::Null));
    assert!(snapshot(&heap).is_empty());

    let _p = heap.allocate(24);
    let before = snapshot(&heap);
    for _ in 0..3 {
        assert_eq!(unsafe { heap.release(null_mut()) }, Err(ReleaseError::Null));
    }
    assert_eq!(snapshot(&heap), before);
}

#[test]
fn test_alignment() {
    let mut heap = heap(1 << 20, 1, 10);

    for size in (0..300).step_by(7) {
        let p = heap.allocate(size);
        assert!(!p.is_null());
        assert_eq!(p as usize % WORD_ALIGN, 0, "Payload for {size} bytes is misaligned.");

        let info = info_of(&heap, p);
        assert!(info.size >= size);
        assert_eq!(info.size % WORD_ALIGN, 0);
        assert!(!info.available);
    }
    check_invariants(&heap);
}

#[test]
fn test_zero_size() {
    let mut heap = heap(4096, 1, 10);

    let p1 = heap.allocate(0);
    let p2 = heap.allocate(0);
    assert!(!p1.is_null() && !p2.is_null());
    assert_ne!(p1, p2);
    assert_eq!(info_of(&heap, p1).size, 0);

    unsafe {
        assert_eq!(heap.release(p2), Ok(()));
        assert_eq!(heap.release(p1), Ok(()));
    }
    check_invariants(&heap);
    assert_eq!(snapshot(&heap).len(), 1);
}

#[test]
fn test_first_fit_reuses_released_chunk() {
    let mut heap = heap(1 << 14, 1, 10);

    let a = heap.allocate(64);
    let b = heap.allocate(128);
    let c = heap.allocate(64);
    unsafe { heap.release(b).unwrap() };

    let d = heap.allocate(64);
    assert_eq!(d, b, "The first fitting free chunk should be reused.");

    let infos = snapshot(&heap);
    assert_eq!(infos[0].payload(), a as usize);
    assert_eq!(infos[1].size, 64);
    assert!(infos[2].available);
    assert_eq!(infos[2].size, 128 - 64 - HEADER_SIZE);
    assert_eq!(infos[3].payload(), c as usize);
    check_invariants(&heap);
}

#[test]
fn test_exact_fit_chunk_is_skipped() {
    let mut heap = heap(1 << 14, 1, 10);

    let _a = heap.allocate(64);
    let b = heap.allocate(64);
    let c = heap.allocate(64);
    unsafe { heap.release(b).unwrap() };

    // A free chunk must also fit the header of the remainder it would be split into.
    let d = heap.allocate(64);
    assert_ne!(d, b);
    assert!(d > c);
    assert!(info_of(&heap, b).available);
    check_invariants(&heap);
}

#[test]
fn test_growth_appends_after_tail() {
    let mut heap = heap(1 << 14, 1, 2);

    let a = heap.allocate(64);
    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[1].size, 2 * (64 + HEADER_SIZE) - HEADER_SIZE - 64 - HEADER_SIZE);

    let b = heap.allocate(64);
    let stats = heap.stats();
    assert_eq!(stats.regions, 2);

    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 4);
    assert_eq!(infos[0].payload(), a as usize);
    assert_eq!(infos[2].payload(), b as usize);
    assert_eq!(infos[2].prev, infos[1].addr, "New region should follow the old tail.");
    assert!(infos[3].available);
    check_invariants(&heap);
}

#[test]
fn test_exhaustion() {
    let mut heap = heap(512, 1, 10);

    let p = heap.allocate(8);
    assert!(!p.is_null());
    let before = snapshot(&heap);

    assert!(heap.allocate(1000).is_null());
    assert_eq!(snapshot(&heap), before, "A failed growth should not change the directory.");
    assert_eq!(heap.stats().regions, 1);

    let q = heap.allocate(16);
    assert!(!q.is_null(), "Smaller requests should still be served.");
    check_invariants(&heap);
}

#[test]
fn test_too_large() {
    let mut heap = heap(4096, 1, 10);

    assert!(heap.allocate(usize::MAX).is_null());
    assert!(heap.allocate(MAX_CHUNK_SIZE + 1).is_null());
    // Fits a header but not the arena.
    assert!(heap.allocate(MAX_CHUNK_SIZE).is_null());
    assert!(heap.mapper().regions().is_empty());
    assert_eq!(heap.stats(), HeapStats::default());
}

#[test]
fn test_double_release() {
    let mut heap = heap(4096, 1, 10);

    let a = heap.allocate(32);
    let _b = heap.allocate(32);
    unsafe {
        assert_eq!(heap.release(a), Ok(()));
        let before = snapshot(&heap);
        assert_eq!(
            heap.release(a),
            Err(ReleaseError::AlreadyReleased { addr: a as usize })
        );
        assert_eq!(snapshot(&heap), before);
    }
}

#[test]
fn test_release_absorbed_chunk() {
    let mut heap = heap(4096, 1, 10);

    let a = heap.allocate(32);
    let b = heap.allocate(32);
    unsafe {
        heap.release(a).unwrap();
        heap.release(b).unwrap();
        let before = snapshot(&heap);
        assert_eq!(before.len(), 1);

        assert_eq!(heap.release(b), Err(ReleaseError::Corrupted { addr: b as usize }));
        assert_eq!(snapshot(&heap), before);
    }
}

#[test]
fn test_release_bad_pointers() {
    #[repr(C, align(8))]
    struct Garbage([u8; 128]);

    let mut heap = heap(4096, 1, 10);
    let a = heap.allocate(32);
    let before = snapshot(&heap);

    let mut garbage = Garbage([0x5A; 128]);
    let foreign = unsafe { garbage.0.as_mut_ptr().add(64) };
    unsafe {
        assert_eq!(
            heap.release(a.add(1)),
            Err(ReleaseError::Corrupted {
                addr: a as usize + 1
            })
        );
        assert_eq!(
            heap.release(foreign),
            Err(ReleaseError::Corrupted {
                addr: foreign as usize
            })
        );
    }
    assert_eq!(snapshot(&heap), before);
}

#[test]
fn test_coalesce_both_sides() {
    let mut heap = heap(4096, 1, 10);

    let a = heap.allocate(64);
    let b = heap.allocate(64);
    let c = heap.allocate(64);
    assert_eq!(snapshot(&heap).len(), 4);

    unsafe {
        heap.release(a).unwrap();
        check_invariants(&heap);
        assert_eq!(snapshot(&heap).len(), 4);

        heap.release(c).unwrap();
        check_invariants(&heap);
        let infos = snapshot(&heap);
        assert_eq!(infos.len(), 3, "c should absorb the free tail.");

        heap.release(b).unwrap();
    }
    check_invariants(&heap);

    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 1, "Releasing b should fuse everything into a.");
    assert_eq!(infos[0].payload(), a as usize);
    assert_eq!(infos[0].size, heap.stats().mapped_bytes - HEADER_SIZE);
}

#[test]
fn test_no_merge_across_detached_regions() {
    let mut heap = heap(4 * 4096, 4096, 1);

    let a = heap.allocate(64);
    let b = heap.allocate(64);
    assert_eq!(info_of(&heap, a).size, 64, "Multiplier 1 leaves nothing to split.");
    assert_eq!(heap.stats().regions, 2);

    unsafe {
        heap.release(a).unwrap();
        heap.release(b).unwrap();
    }
    check_invariants(&heap);

    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|info| info.available && info.size == 64));
}

#[test]
fn test_merge_across_touching_regions() {
    let mut heap = heap(4096, 1, 1);

    let a = heap.allocate(64);
    let b = heap.allocate(64);
    assert_eq!(b as usize - a as usize, 64 + HEADER_SIZE);

    unsafe {
        heap.release(a).unwrap();
        heap.release(b).unwrap();
    }
    check_invariants(&heap);

    let infos = snapshot(&heap);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].size, 64 + HEADER_SIZE + 64);
}

#[test]
fn test_round_trip() {
    let mut heap = heap(1 << 16, 1, 10);

    let warmup = heap.allocate(256);
    unsafe { heap.release(warmup).unwrap() };
    assert_eq!(heap.stats().chunks, 1);
    let before = heap.stats();

    let sizes = [8, 24, 40, 16, 64, 8, 32];
    let mut ptrs: Vec<*mut u8> = sizes.iter().map(|&s| heap.allocate(s)).collect();
    assert_eq!(heap.stats().regions, before.regions);

    ptrs.shuffle(&mut StdRng::seed_from_u64(7));
    for p in ptrs {
        unsafe { heap.release(p).unwrap() };
        check_invariants(&heap);
    }

    let after = heap.stats();
    assert_eq!(after.used_bytes, 0);
    assert_eq!(
        after.free_bytes + after.header_bytes(),
        before.free_bytes + before.header_bytes()
    );
}

#[test]
fn test_random_operations() {
    let mut heap = heap(8 << 20, 64, 10);
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut live: Vec<(*mut u8, usize, u8)> = vec![];

    for round in 0..2000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let size = rng.gen_range(1..512);
            let p = heap.allocate(size);
            assert!(!p.is_null());
            let fill = round as u8;
            unsafe { p.write_bytes(fill, size) };
            live.push((p, size, fill));
        } else {
            let (p, size, fill) = live.swap_remove(rng.gen_range(0..live.len()));
            unsafe {
                assert!(
                    (0..size).all(|i| *p.add(i) == fill),
                    "Payload was overwritten while in use."
                );
                assert_eq!(heap.release(p), Ok(()));
            }
        }
        check_invariants(&heap);
    }

    live.shuffle(&mut rng);
    for (p, _, _) in live {
        unsafe { heap.release(p).unwrap() };
    }
    check_invariants(&heap);

    let stats = heap.stats();
    assert_eq!(stats.used_bytes, 0);
    assert_eq!(stats.free_chunks, stats.chunks);
    assert_eq!(stats.free_bytes + stats.header_bytes(), stats.mapped_bytes);
}
