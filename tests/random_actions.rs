use core::ptr::NonNull;

use tagheap::*;

#[derive(Debug, Clone, Copy)]
enum Action {
    /// Allocate `size` bytes
    Malloc { size: usize },
    /// Allocate `size` zeroed bytes
    Calloc { size: usize },
    /// Free the ith allocation
    Free { index: usize },
    /// Move the ith allocation into `new_size` bytes
    Realloc { index: usize, new_size: usize },
}
use Action::*;

struct Allocation {
    ptr: NonNull<u8>,
    size: usize,
    fill: u8,
}

fn new_heap(capacity: usize, config: Config) -> (Heap<Brk>, Vec<u64>) {
    let mut memory = vec![0u64; capacity / 8];
    let span = Span::from_base_size(memory.as_mut_ptr().cast(), capacity);
    (Heap::with_config(unsafe { Brk::new(span) }, config), memory)
}

fn random_action(rng: &fastrand::Rng, live: usize) -> Action {
    let size = if rng.u8(..) < 16 { rng.usize(1..20_000) } else { rng.usize(1..512) };

    match rng.u8(..4) {
        0 | 1 if live > 0 => Free { index: rng.usize(..live) },
        2 if live > 0 => Realloc { index: rng.usize(..live), new_size: size },
        3 => Calloc { size },
        _ => Malloc { size },
    }
}

fn check_contents(allocations: &[Allocation]) {
    for allocation in allocations {
        let bytes = unsafe { core::slice::from_raw_parts(allocation.ptr.as_ptr(), allocation.size) };
        assert!(bytes.iter().all(|&byte| byte == allocation.fill), "allocation at {:p} was clobbered", allocation.ptr);
    }
}

fn check_disjoint(heap: &Heap<Brk>, allocations: &[Allocation]) {
    let mut spans: Vec<_> = allocations
        .iter()
        .map(|a| Span::from_base_size(a.ptr.as_ptr(), unsafe { heap.payload_size(a.ptr) }))
        .collect();
    spans.sort_by_key(|span| span.base() as usize);

    for pair in spans.windows(2) {
        assert!(!pair[0].overlaps(pair[1]), "{} overlaps {}", pair[0], pair[1]);
    }
    for span in &spans {
        assert!(heap.arena().contains_span(*span));
        assert_eq!(span.base() as usize % ALIGNMENT, 0);
    }
}

fn run(seed: u64, config: Config) {
    let rng = fastrand::Rng::with_seed(seed);
    let (mut heap, _memory) = new_heap(1 << 20, config);
    let mut allocations: Vec<Allocation> = Vec::new();

    for step in 0..2000 {
        let action = random_action(&rng, allocations.len());
        log::trace!("step {}: {:?}", step, action);

        match action {
            Malloc { size } => {
                if let Some(ptr) = heap.malloc(size) {
                    let fill = rng.u8(..);
                    unsafe { ptr.as_ptr().write_bytes(fill, size) };
                    allocations.push(Allocation { ptr, size, fill });
                }
            }
            Calloc { size } => {
                if let Some(ptr) = heap.calloc(1, size) {
                    allocations.push(Allocation { ptr, size, fill: 0 });
                }
            }
            Free { index } => {
                let allocation = allocations.swap_remove(index);
                unsafe { heap.free(Some(allocation.ptr)) };
            }
            Realloc { index, new_size } => {
                let allocation = &mut allocations[index];

                if let Some(ptr) = unsafe { heap.realloc(Some(allocation.ptr), new_size) } {
                    let kept = allocation.size.min(new_size);
                    let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), kept) };
                    assert!(bytes.iter().all(|&byte| byte == allocation.fill));

                    unsafe { ptr.as_ptr().add(kept).write_bytes(allocation.fill, new_size - kept) };
                    allocation.ptr = ptr;
                    allocation.size = new_size;
                }
            }
        }

        if step % 50 == 0 {
            check_contents(&allocations);
            check_disjoint(&heap, &allocations);

            let mut findings = Vec::new();
            heap.audit(|finding| findings.push(finding));
            assert!(findings.is_empty(), "step {}: {:?}", step, findings);
        }
    }

    check_contents(&allocations);
    check_disjoint(&heap, &allocations);

    for allocation in allocations.drain(..) {
        unsafe { heap.free(Some(allocation.ptr)) };
    }

    heap.verify(line!());
    assert_eq!(heap.free_blocks().count(), 1);
    assert_eq!(heap.free_blocks().map(|(_, size)| size).sum::<usize>(), heap.arena().size() - 16);
}

#[test_log::test]
fn random_actions_default_config() {
    for seed in 0..8 {
        run(seed, Config::new());
    }
}

#[test_log::test]
fn random_actions_exhaustive_best_fit() {
    for seed in 100..104 {
        run(seed, Config::new().with_fit_slack(0).with_chunk_size(64));
    }
}

#[test_log::test]
fn fifo_workload_reaches_a_high_water_mark() {
    let (mut heap, _memory) = new_heap(1 << 20, Config::new());
    let mut queue = std::collections::VecDeque::new();

    for i in 0..10_000 {
        queue.push_back(heap.malloc(100).unwrap());

        if queue.len() > 50 {
            unsafe { heap.free(queue.pop_front()) };
        }

        if i % 1000 == 0 {
            heap.verify(line!());
        }
    }

    // 51 live blocks of 112 bytes fit within the sentinels and two chunks
    assert!(heap.arena().size() <= 16 + 2 * Config::DEFAULT_CHUNK_SIZE, "{}", heap.arena());

    while let Some(ptr) = queue.pop_front() {
        unsafe { heap.free(Some(ptr)) };
    }
    assert_eq!(heap.free_blocks().count(), 1);
}

#[test_log::test]
fn exhausting_the_source_fails_cleanly() {
    let (mut heap, _memory) = new_heap(1 << 16, Config::new());
    let mut ptrs = Vec::new();

    while let Some(ptr) = heap.malloc(1000) {
        ptrs.push(ptr);
    }

    assert!(!ptrs.is_empty());
    assert!(heap.arena().size() <= 1 << 16);

    let mut findings = Vec::new();
    heap.audit(|finding| findings.push(finding));
    assert!(findings.is_empty(), "{:?}", findings);

    // whatever is left is too small for another 1000 bytes, but smaller requests still succeed
    let small = heap.malloc(8);
    for ptr in ptrs {
        unsafe { heap.free(Some(ptr)) };
    }
    unsafe { heap.free(small) };

    assert_eq!(heap.free_blocks().count(), 1);
    assert!(heap.malloc(1000).is_some());
}
