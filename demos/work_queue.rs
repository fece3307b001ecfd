//! A small job/result pipeline: one dispatcher fans jobs out to a
//! pool of workers over a bounded queue, workers report back over an
//! unbounded one.

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use ring_queues::{BoundedItemCrq, LcrQueue, MpmcQueue};

const WORKERS: usize = 4;
const JOBS: usize = 64;

struct Job {
    id: usize,
    payload: u64,
}

struct Done {
    id: usize,
    result: u64,
    worker: usize,
}

fn main() {
    // tid layout: 0 = dispatcher, 1..=WORKERS = workers
    let jobs = Arc::new(BoundedItemCrq::<Job>::new(16, WORKERS + 1));
    let results = Arc::new(LcrQueue::<Done>::new(64, WORKERS + 1));

    let dispatcher = {
        let jobs = jobs.clone();
        thread::spawn(move || {
            for id in 0..JOBS {
                let job = NonNull::new(Box::into_raw(Box::new(Job {
                    id,
                    payload: id as u64 * 3,
                })))
                .unwrap();
                // bounded: spin while the pool is saturated
                while jobs.push(job, 0).is_err() {
                    thread::yield_now();
                }
            }
        })
    };

    let mut workers = Vec::new();
    for worker in 1..=WORKERS {
        let jobs = jobs.clone();
        let results = results.clone();
        workers.push(thread::spawn(move || loop {
            match jobs.pop(worker) {
                Ok(p) => {
                    let job = unsafe { Box::from_raw(p.as_ptr()) };
                    let done = NonNull::new(Box::into_raw(Box::new(Done {
                        id: job.id,
                        result: job.payload * job.payload,
                        worker,
                    })))
                    .unwrap();
                    results.push(done, worker).unwrap();
                }
                Err(_) => {
                    // dispatcher never blocks for long: an empty queue
                    // after all jobs means we are finished
                    if results.len(worker) >= JOBS {
                        break;
                    }
                    thread::yield_now();
                }
            }
        }));
    }

    dispatcher.join().unwrap();
    for handle in workers {
        handle.join().unwrap();
    }

    let mut seen = vec![false; JOBS];
    let mut total = 0u64;
    while let Ok(p) = results.pop(0) {
        let done = unsafe { Box::from_raw(p.as_ptr()) };
        assert!(!seen[done.id], "job {} completed twice", done.id);
        seen[done.id] = true;
        total += done.result;
        println!("job {:02} -> {} (worker {})", done.id, done.result, done.worker);
    }
    assert!(seen.iter().all(|&s| s));
    println!("all {JOBS} jobs accounted for, checksum {total}");
}
