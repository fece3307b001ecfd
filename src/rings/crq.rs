//! Ticket ring committing value and epoch with one 128-bit CAS.
//!
//! Every cell advertises the ticket it is waiting for in its `idx`
//! half. A producer that wins the fetch-and-add on the tail deposits
//! `(item, ticket)` atomically; a consumer swaps the pair back to
//! `(nil, ticket + ring)` to hand the cell to the next epoch.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::cell::{
    alloc_cells, dealloc_cells, idx_of, pack, ring_size, val_of, WideCell,
};
use crate::pad::{PadMode, Padded};
use crate::remap::CacheRemap;
use crate::segment::{flagged, index_of, set_flag, RingSegment, SegmentHeader};

/// Failed close attempts tolerated before the close is forced.
const TRY_CLOSE_CRQ: u32 = 10;

/// Empty-cell spins between reloads of the tail in a pop.
const TAIL_RELOAD_MASK: u32 = (1 << 8) - 1;

/// Empty-cell spins tolerated before the pop advances the cell's epoch.
const POP_SPIN_LIMIT: u32 = 4 * 1024;

pub struct CrqRing<T, M: PadMode = Padded> {
    hdr: SegmentHeader<Self>,
    size: usize,
    #[cfg(feature = "pow2")]
    mask: u64,
    remap: CacheRemap,
    cells: *mut WideCell<M>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, M: PadMode> Send for CrqRing<T, M> {}
unsafe impl<T: Send, M: PadMode> Sync for CrqRing<T, M> {}

impl<T: Send, M: PadMode> CrqRing<T, M> {
    #[inline(always)]
    fn cell(&self, ticket: u64) -> &WideCell<M> {
        #[cfg(feature = "pow2")]
        let i = (ticket & self.mask) as usize;
        #[cfg(not(feature = "pow2"))]
        let i = (ticket % self.size as u64) as usize;
        unsafe { &*self.cells.add(self.remap.slot(i)) }
    }
}

impl<T: Send, M: PadMode> RingSegment<T> for CrqRing<T, M> {
    fn with_start(requested: usize, _max_threads: usize, start: u64) -> Self {
        assert!(requested > 0, "ring capacity must be nonzero");
        let size = ring_size(requested);
        let remap = CacheRemap::new(size, std::mem::size_of::<WideCell<M>>());

        let cells = unsafe { alloc_cells::<WideCell<M>>(size) };
        for i in start..start + size as u64 {
            #[cfg(feature = "pow2")]
            let slot = remap.slot((i & (size as u64 - 1)) as usize);
            #[cfg(not(feature = "pow2"))]
            let slot = remap.slot((i % size as u64) as usize);
            unsafe { ptr::write(cells.add(slot), WideCell::new(i)) };
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

        loop {
            let tail_ticket = self.hdr.tail.fetch_add(1, Ordering::SeqCst);
            if flagged(tail_ticket) {
                return false;
            }
            let cell = self.cell(tail_ticket);
            let pair = cell.pair.load(Ordering::SeqCst);
            let cell_idx = idx_of(pair);
            let val = val_of(pair);

            if val == 0
                && index_of(cell_idx) <= tail_ticket
                && (!flagged(cell_idx) || self.hdr.head.load(Ordering::SeqCst) < tail_ticket)
            {
                let new = pack(tail_ticket, item.as_ptr() as u64);
                if cell
                    .pair
                    .compare_exchange(pair, new, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return true;
                }
            }

            if tail_ticket >= self.hdr.head.load(Ordering::SeqCst) + self.size as u64 {
                try_close += 1;
                if self.hdr.close_segment(tail_ticket, try_close > TRY_CLOSE_CRQ) {
                    return false;
                }
            }
        }
    }

    fn pop(&self, _tid: usize) -> Option<NonNull<T>> {
        loop {
            let head_ticket = self.hdr.head.fetch_add(1, Ordering::SeqCst);
            let cell = self.cell(head_ticket);

            let mut spins = 0u32;
            let mut tail_snapshot = 0u64;

            loop {
                let pair = cell.pair.load(Ordering::SeqCst);
                let cell_idx = idx_of(pair);
                let unsafe_flag = cell_idx & crate::segment::CLOSED_BIT;
                let idx = index_of(cell_idx);
                let val = val_of(pair) as *mut T;

                if idx > head_ticket {
                    // future epoch: this ticket lost its cell
                    break;
                }

                if !val.is_null() {
                    if idx == head_ticket {
                        // dequeue transition
                        let new = pack(unsafe_flag | (head_ticket + self.size as u64), 0);
                        if cell
                            .pair
                            .compare_exchange(pair, new, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                        {
                            return Some(unsafe { NonNull::new_unchecked(val) });
                        }
                    } else {
                        // stale occupant: mark the cell unsafe and move on
                        let new = pack(set_flag(idx), val as u64);
                        if cell
                            .pair
                            .compare_exchange(pair, new, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                        {
                            break;
                        }
                    }
                } else {
                    if spins & TAIL_RELOAD_MASK == 0 {
                        tail_snapshot = self.hdr.tail.load(Ordering::SeqCst);
                    }
                    let closed = flagged(tail_snapshot);
                    let t = index_of(tail_snapshot);
                    if unsafe_flag != 0
                        || t < head_ticket + 1
                        || closed
                        || spins > POP_SPIN_LIMIT
                    {
                        let new = pack(unsafe_flag | (head_ticket + self.size as u64), 0);
                        if cell
                            .pair
                            .compare_exchange(pair, new, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                        {
                            break;
                        }
                    }
                    spins += 1;
                }
            }

            if self.hdr.tail_index() <= head_ticket + 1 {
                self.hdr.fix_state();
                return None;
            }
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.size
    }

    fn class_name(padded: bool) -> String {
        let mut name = String::from("CRQueue");
        if M::PADDED && padded {
            name.push_str("/padded");
        }
        name
    }
}

impl<T, M: PadMode> Drop for CrqRing<T, M> {
    fn drop(&mut self) {
        unsafe { dealloc_cells(self.cells, self.size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::Dense;

    fn item(v: u64) -> NonNull<u64> {
        NonNull::from(Box::leak(Box::new(v)))
    }

    #[test]
    fn closes_when_full_and_still_drains() {
        let ring = CrqRing::<u64, Padded>::with_start(8, 4, 0);
        let items: Vec<_> = (0..8).map(|i| item(i)).collect();

        for &p in &items {
            assert!(ring.push(p, 0));
        }
        assert!(!ring.push(items[0], 0));
        assert!(ring.is_closed());

        for &p in &items {
            assert_eq!(ring.pop(0), Some(p));
        }
        assert_eq!(ring.pop(0), None);
    }

    #[test]
    fn continues_a_foreign_ticket_space() {
        let ring = CrqRing::<u64, Dense>::with_start(8, 4, 32);
        assert_eq!(ring.header().head_index(), 32);
        assert_eq!(ring.header().tail_index(), 32);

        let a = item(1);
        let b = item(2);
        assert!(ring.push(a, 0));
        assert!(ring.push(b, 0));
        assert_eq!(ring.pop(0), Some(a));
        assert_eq!(ring.pop(0), Some(b));
        assert_eq!(ring.pop(0), None);
        assert!(ring.header().head_index() > 32);
    }

    #[test]
    fn empty_pops_leave_the_ring_usable() {
        let ring = CrqRing::<u64, Padded>::with_start(8, 4, 0);
        for _ in 0..16 {
            assert_eq!(ring.pop(0), None);
        }
        let a = item(7);
        assert!(ring.push(a, 0));
        assert_eq!(ring.pop(0), Some(a));
    }

    #[test]
    fn reports_length_within_one_segment() {
        let ring = CrqRing::<u64, Padded>::with_start(16, 4, 0);
        assert!(RingSegment::<u64>::is_empty(&ring));
        let items: Vec<_> = (0..5).map(|i| item(i)).collect();
        for (i, &p) in items.iter().enumerate() {
            assert!(ring.push(p, 0));
            assert_eq!(RingSegment::<u64>::len(&ring), i + 1);
        }
    }
}
