//! Randomized mixed workloads: every thread both pushes and pops with
//! jittered interleaving, then the main thread drains the remainder.
//! Checks that the multiset of values coming out equals the multiset
//! that went in: nothing lost, nothing duplicated, nothing invented.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::{Arc, Barrier};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ring_queues::{
    BoundedItemCrq, BoundedItemPrq, BoundedMtQueue, BoundedSegmentCrq, FaaQueue, LcrQueue,
    LmtQueue, LprQueue, MpmcQueue,
};

/// Value tagged with its origin thread so every push is unique.
fn tag(tid: usize, seq: usize) -> u64 {
    ((tid as u64) << 32) | seq as u64
}

fn mixed_workload<Q>(queue: Q, threads: usize, ops_per_thread: usize, seed: u64)
where
    Q: MpmcQueue<u64> + 'static,
{
    let queue = Arc::new(queue);
    let barrier = Arc::new(Barrier::new(threads));

    let mut handles = Vec::new();
    for tid in 0..threads {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed ^ tid as u64);
            let mut next_seq = 0usize;
            let mut pushed = Vec::new();
            let mut popped = Vec::new();

            barrier.wait();
            for _ in 0..ops_per_thread {
                if rng.gen_bool(0.55) {
                    let value = tag(tid, next_seq);
                    let item = NonNull::new(Box::into_raw(Box::new(value))).unwrap();
                    if queue.push(item, tid).is_ok() {
                        pushed.push(value);
                        next_seq += 1;
                    } else {
                        // bounded and full: the item stays ours
                        unsafe { drop(Box::from_raw(item.as_ptr())) };
                    }
                } else if let Ok(p) = queue.pop(tid) {
                    popped.push(unsafe { *Box::from_raw(p.as_ptr()) });
                }
                if rng.gen_ratio(1, 64) {
                    thread::yield_now();
                }
            }
            (pushed, popped)
        }));
    }

    let mut pushed_all = Vec::new();
    let mut popped_all = Vec::new();
    for handle in handles {
        let (pushed, popped) = handle.join().unwrap();
        pushed_all.extend(pushed);
        popped_all.extend(popped);
    }

    // the rest is still queued; drain it from the main thread
    while let Ok(p) = queue.pop(0) {
        popped_all.push(unsafe { *Box::from_raw(p.as_ptr()) });
    }

    assert_eq!(popped_all.len(), pushed_all.len());

    let unique: HashSet<u64> = popped_all.iter().copied().collect();
    assert_eq!(unique.len(), popped_all.len(), "duplicated item observed");

    pushed_all.sort_unstable();
    popped_all.sort_unstable();
    assert_eq!(pushed_all, popped_all);

    assert!(queue.pop(0).is_err());
}

const THREADS: usize = 4;
const OPS: usize = 40_000;

macro_rules! stress_suite {
    ($name:ident, $make:expr, $make_small:expr) => {
        mod $name {
            use super::*;

            #[test]
            fn survives_mixed_workload() {
                mixed_workload($make, THREADS, OPS, 0x5eed);
            }

            #[test]
            fn survives_tiny_segments() {
                mixed_workload($make_small, THREADS, OPS / 2, 0xfeed);
            }
        }
    };
}

stress_suite!(
    lcr,
    LcrQueue::<u64>::new(64, THREADS),
    LcrQueue::<u64>::new(8, THREADS)
);
stress_suite!(
    lpr,
    LprQueue::<u64>::new(64, THREADS),
    LprQueue::<u64>::new(8, THREADS)
);
stress_suite!(
    lmt,
    LmtQueue::<u64>::new(64, THREADS),
    LmtQueue::<u64>::new(8, THREADS)
);
stress_suite!(
    faa,
    FaaQueue::<u64>::new(64, THREADS),
    FaaQueue::<u64>::new(8, THREADS)
);
stress_suite!(
    bounded_item_crq,
    BoundedItemCrq::<u64>::new(128, THREADS),
    BoundedItemCrq::<u64>::new(16, THREADS)
);
stress_suite!(
    bounded_item_prq,
    BoundedItemPrq::<u64>::new(128, THREADS),
    BoundedItemPrq::<u64>::new(16, THREADS)
);
stress_suite!(
    bounded_seg_crq,
    BoundedSegmentCrq::<u64>::new(128, THREADS),
    BoundedSegmentCrq::<u64>::new(16, THREADS)
);
stress_suite!(
    bounded_mtq,
    BoundedMtQueue::<u64>::new(128, THREADS),
    BoundedMtQueue::<u64>::new(16, THREADS)
);
