//! MPMC emulation over a producers-by-consumers matrix of SPSC rings.
//!
//! Each (producer, consumer) pair owns a private ring, so no operation
//! ever contends on a cell. A producer with `tid` works row `tid % P`
//! and scans the columns starting from the last one that accepted a
//! push; a consumer symmetrically scans its column's rows. The rotation
//! state lives per row/column inside the queue, which is equivalent to
//! thread-local state under the unique-tid contract. Two producers
//! sharing a tid silently break FIFO.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{Empty, Full};
use crate::spsc::SpscRing;
use crate::MpmcQueue;

pub struct All2All<T> {
    // row-major: rings[p * consumers + c]
    rings: Box<[SpscRing<T>]>,
    producers: usize,
    consumers: usize,
    // per producer row: column of the last successful push
    next_col: Box<[CachePadded<AtomicUsize>]>,
    // per consumer column: row of the last successful pop
    next_row: Box<[CachePadded<AtomicUsize>]>,
}

impl<T> All2All<T> {
    /// Splits `total_capacity` evenly over a `producers` by `consumers`
    /// matrix of SPSC rings.
    pub fn new(total_capacity: usize, producers: usize, consumers: usize) -> Self {
        assert!(producers > 0 && consumers > 0, "matrix must be nonempty");
        let per_ring = total_capacity / (producers * consumers);
        assert!(
            per_ring > 0,
            "capacity must cover at least one slot per ring"
        );

        let rings = (0..producers * consumers)
            .map(|_| SpscRing::new(per_ring))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let next_col = (0..producers)
            .map(|_| CachePadded::new(AtomicUsize::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let next_row = (0..consumers)
            .map(|_| CachePadded::new(AtomicUsize::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            rings,
            producers,
            consumers,
            next_col,
            next_row,
        }
    }

    #[inline]
    fn ring(&self, p: usize, c: usize) -> &SpscRing<T> {
        &self.rings[p * self.consumers + c]
    }

    pub fn producers(&self) -> usize {
        self.producers
    }

    pub fn consumers(&self) -> usize {
        self.consumers
    }
}

impl<T: Send> MpmcQueue<T> for All2All<T> {
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        let p = tid % self.producers;
        let start = self.next_col[p].load(Ordering::Relaxed);

        if self.ring(p, start).push(item).is_ok() {
            return Ok(());
        }
        // wrap around the row, remembering who took the item
        for c in (start + 1..self.consumers).chain(0..start) {
            if self.ring(p, c).push(item).is_ok() {
                self.next_col[p].store(c, Ordering::Relaxed);
                return Ok(());
            }
        }
        Err(Full)
    }

    fn pop(&self, tid: usize) -> Result<NonNull<T>, Empty> {
        let c = tid % self.consumers;
        let start = self.next_row[c].load(Ordering::Relaxed);

        if let Ok(item) = self.ring(start, c).pop() {
            return Ok(item);
        }
        for p in (start + 1..self.producers).chain(0..start) {
            if let Ok(item) = self.ring(p, c).pop() {
                self.next_row[c].store(p, Ordering::Relaxed);
                return Ok(item);
            }
        }
        Err(Empty)
    }

    /// Sum of the per-ring fill levels; approximate under concurrency.
    fn len(&self, _tid: usize) -> usize {
        self.rings.iter().map(|r| r.len()).sum()
    }

    fn capacity(&self) -> usize {
        self.rings.iter().map(|r| r.capacity()).sum()
    }

    fn class_name(_padded: bool) -> String {
        "All2All".to_string()
    }
}
