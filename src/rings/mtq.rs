//! CAS-loop ticket ring (no fetch-and-add).
//!
//! Producers and consumers race a plain CAS on the tail/head instead of
//! burning tickets speculatively, with a bounded NOP backoff between
//! failed attempts. `BOUNDED = true` turns the ring into a stand-alone
//! bounded queue that never closes; `BOUNDED = false` closes when full
//! so a linked adapter can chain a successor.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::backoff::Backoff;
use crate::cell::{alloc_cells, dealloc_cells, ring_size, FullCell};
use crate::error::{Empty, Full};
use crate::pad::{PadMode, Padded};
use crate::remap::CacheRemap;
use crate::segment::{flagged, RingSegment, SegmentHeader};
use crate::MpmcQueue;

const TRY_CLOSE_MTQ: u32 = 10;

pub struct MtqRing<T, M: PadMode = Padded, const BOUNDED: bool = false> {
    hdr: SegmentHeader<Self>,
    size: usize,
    #[cfg(feature = "pow2")]
    mask: u64,
    remap: CacheRemap,
    cells: *mut FullCell<T, M>,
    _marker: PhantomData<*mut T>,
}

/// Single-segment bounded queue: a never-closing CAS-loop ring.
pub type BoundedMtQueue<T, M = Padded> = MtqRing<T, M, true>;

unsafe impl<T: Send, M: PadMode, const B: bool> Send for MtqRing<T, M, B> {}
unsafe impl<T: Send, M: PadMode, const B: bool> Sync for MtqRing<T, M, B> {}

impl<T: Send, M: PadMode, const B: bool> MtqRing<T, M, B> {
    pub fn new(capacity: usize, max_threads: usize) -> Self {
        <Self as RingSegment<T>>::with_start(capacity, max_threads, 0)
    }

    #[inline(always)]
    fn cell(&self, ticket: u64) -> &FullCell<T, M> {
        #[cfg(feature = "pow2")]
        let i = (ticket & self.mask) as usize;
        #[cfg(not(feature = "pow2"))]
        let i = (ticket % self.size as u64) as usize;
        unsafe { &*self.cells.add(self.remap.slot(i)) }
    }
}

impl<T: Send, M: PadMode, const B: bool> RingSegment<T> for MtqRing<T, M, B> {
    fn with_start(requested: usize, _max_threads: usize, start: u64) -> Self {
        assert!(requested > 0, "ring capacity must be nonzero");
        let size = ring_size(requested);
        let remap = CacheRemap::new(size, std::mem::size_of::<FullCell<T, M>>());

        let cells = unsafe { alloc_cells::<FullCell<T, M>>(size) };
        for i in start..start + size as u64 {
            #[cfg(feature = "pow2")]
            let slot = remap.slot((i & (size as u64 - 1)) as usize);
            #[cfg(not(feature = "pow2"))]
            let slot = remap.slot((i % size as u64) as usize);
            unsafe { ptr::write(cells.add(slot), FullCell::new(i)) };
        }

        Self {
            hdr: SegmentHeader::new(start),
            size,
            #[cfg(feature = "pow2")]
            mask: size as u64 - 1,
            remap,
            cells,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn header(&self) -> &SegmentHeader<Self> {
        &self.hdr
    }

    fn push(&self, item: NonNull<T>, _tid: usize) -> bool {
        let mut try_close = 0u32;
        let mut backoff = Backoff::new();

        let (cell, idx) = loop {
            let tail_ticket = self.hdr.tail.load(Ordering::Relaxed);
            if !B && flagged(tail_ticket) {
                return false;
            }
            let cell = self.cell(tail_ticket);
            let idx = cell.idx.load(Ordering::Acquire);

            if tail_ticket == idx {
                if self
                    .hdr
                    .tail
                    .compare_exchange_weak(
                        tail_ticket,
                        tail_ticket + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break (cell, idx);
                }
                backoff.spin();
            } else if tail_ticket > idx {
                if B {
                    // the cell ahead has not been recycled: ring full
                    return false;
                }
                try_close += 1;
                if self
                    .hdr
                    .close_segment(tail_ticket.wrapping_sub(1), try_close > TRY_CLOSE_MTQ)
                {
                    return false;
                }
            }
        };

        cell.val.store(item.as_ptr(), Ordering::Relaxed);
        cell.idx.store(idx + 1, Ordering::Release);
        true
    }

    fn pop(&self, _tid: usize) -> Option<NonNull<T>> {
        let mut backoff = Backoff::new();

        let (cell, head_ticket) = loop {
            let head_ticket = self.hdr.head.load(Ordering::Relaxed);
            let cell = self.cell(head_ticket);
            let idx = cell.idx.load(Ordering::Acquire);
            let diff = idx as i64 - (head_ticket + 1) as i64;

            if diff == 0 {
                if self
                    .hdr
                    .head
                    .compare_exchange_weak(
                        head_ticket,
                        head_ticket + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break (cell, head_ticket);
                }
                backoff.spin();
            } else if diff < 0 && self.hdr.is_empty() {
                return None;
            }
        };

        let item = cell.val.load(Ordering::Acquire);
        cell.idx
            .store(head_ticket + self.size as u64, Ordering::Release);
        NonNull::new(item)
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.size
    }

    fn class_name(padded: bool) -> String {
        let mut name = String::from(if B { "BoundedMTQueue" } else { "MTQueue" });
        if M::PADDED && padded {
            name.push_str("/padded");
        }
        name
    }
}

impl<T, M: PadMode, const B: bool> Drop for MtqRing<T, M, B> {
    fn drop(&mut self) {
        unsafe { dealloc_cells(self.cells, self.size) };
    }
}

impl<T: Send, M: PadMode> MpmcQueue<T> for BoundedMtQueue<T, M> {
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        if RingSegment::push(self, item, tid) {
            Ok(())
        } else {
            Err(Full)
        }
    }

    fn pop(&self, tid: usize) -> Result<NonNull<T>, Empty> {
        RingSegment::pop(self, tid).ok_or(Empty)
    }

    fn len(&self, _tid: usize) -> usize {
        self.hdr.len()
    }

    fn capacity(&self) -> usize {
        self.size
    }

    fn class_name(padded: bool) -> String {
        <Self as RingSegment<T>>::class_name(padded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(v: u64) -> NonNull<u64> {
        NonNull::from(Box::leak(Box::new(v)))
    }

    #[test]
    fn bounded_ring_never_closes() {
        let ring = BoundedMtQueue::<u64>::new(8, 4);
        let items: Vec<_> = (0..8).map(|i| item(i)).collect();

        for &p in &items {
            assert!(RingSegment::push(&ring, p, 0));
        }
        assert!(!RingSegment::push(&ring, items[0], 0));
        assert!(!ring.header().is_closed());

        assert_eq!(RingSegment::pop(&ring, 0), Some(items[0]));
        // one slot recycled: a push fits again
        assert!(RingSegment::push(&ring, items[0], 0));
    }

    #[test]
    fn unbounded_ring_closes_when_full() {
        let ring = MtqRing::<u64, Padded, false>::new(8, 4);
        let items: Vec<_> = (0..8).map(|i| item(i)).collect();

        for &p in &items {
            assert!(RingSegment::push(&ring, p, 0));
        }
        assert!(!RingSegment::push(&ring, items[0], 0));
        assert!(ring.header().is_closed());

        for &p in &items {
            assert_eq!(RingSegment::pop(&ring, 0), Some(p));
        }
        assert_eq!(RingSegment::pop(&ring, 0), None);
    }

    #[test]
    fn continues_a_foreign_ticket_space() {
        let ring = MtqRing::<u64, Padded, false>::with_start(8, 4, 31);
        let a = item(5);
        assert!(RingSegment::push(&ring, a, 0));
        assert_eq!(ring.header().tail_index(), 32);
        assert_eq!(RingSegment::pop(&ring, 0), Some(a));
        assert_eq!(RingSegment::pop(&ring, 0), None);
    }
}
