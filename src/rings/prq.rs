//! Ticket ring built from single-word CAS and per-thread reserved
//! sentinels.
//!
//! The 2-word transition of the CAS2 ring is emulated in three steps:
//! the producer parks the sentinel `(tid << 1) | 1` in the value slot,
//! advances the cell's epoch, then swaps the sentinel for the real
//! item. Consumers treat sentinels as "not yet committed". Item
//! pointers must therefore never have their low bit set; `NonNull<T>`
//! with `T` of alignment >= 2 satisfies this for free.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::cell::{alloc_cells, dealloc_cells, ring_size, FullCell};
use crate::pad::{PadMode, Padded};
use crate::remap::CacheRemap;
use crate::segment::{flagged, index_of, set_flag, RingSegment, SegmentHeader, CLOSED_BIT};

const TRY_CLOSE_PRQ: u32 = 10;
const TAIL_RELOAD_MASK: u32 = (1 << 8) - 1;
const POP_SPIN_LIMIT: u32 = 4 * 1024;

pub struct PrqRing<T, M: PadMode = Padded> {
    hdr: SegmentHeader<Self>,
    size: usize,
    #[cfg(feature = "pow2")]
    mask: u64,
    remap: CacheRemap,
    cells: *mut FullCell<T, M>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, M: PadMode> Send for PrqRing<T, M> {}
unsafe impl<T: Send, M: PadMode> Sync for PrqRing<T, M> {}

/// Non-item marker owned by thread `tid`; the low bit tags it.
#[inline(always)]
fn reserved<T>(tid: usize) -> *mut T {
    ((tid << 1) | 1) as *mut T
}

#[inline(always)]
fn is_reserved<T>(p: *mut T) -> bool {
    (p as usize) & 1 != 0
}

impl<T: Send, M: PadMode> PrqRing<T, M> {
    #[inline(always)]
    fn cell(&self, ticket: u64) -> &FullCell<T, M> {
        #[cfg(feature = "pow2")]
        let i = (ticket & self.mask) as usize;
        #[cfg(not(feature = "pow2"))]
        let i = (ticket % self.size as u64) as usize;
        unsafe { &*self.cells.add(self.remap.slot(i)) }
    }
}

impl<T: Send, M: PadMode> RingSegment<T> for PrqRing<T, M> {
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

    fn push(&self, item: NonNull<T>, tid: usize) -> bool {
        debug_assert!(
            !is_reserved(item.as_ptr()),
            "item pointers must not have their low bit set"
        );
        debug_assert!(tid < (1 << 31));

        let mut try_close = 0u32;

        loop {
            let tail_ticket = self.hdr.tail.fetch_add(1, Ordering::SeqCst);
            if flagged(tail_ticket) {
                return false;
            }
            let cell = self.cell(tail_ticket);
            let idx = cell.idx.load(Ordering::SeqCst);
            let val = cell.val.load(Ordering::SeqCst);

            if val.is_null()
                && index_of(idx) <= tail_ticket
                && (!flagged(idx) || self.hdr.head.load(Ordering::SeqCst) <= tail_ticket)
            {
                let bottom = reserved::<T>(tid);
                if cell
                    .val
                    .compare_exchange(ptr::null_mut(), bottom, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    if cell
                        .idx
                        .compare_exchange(
                            idx,
                            tail_ticket + self.size as u64,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        if cell
                            .val
                            .compare_exchange(
                                bottom,
                                item.as_ptr(),
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            )
                            .is_ok()
                        {
                            return true;
                        }
                    } else {
                        // lost the epoch race: withdraw the sentinel
                        let _ = cell.val.compare_exchange(
                            bottom,
                            ptr::null_mut(),
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                    }
                }
            }

            if tail_ticket >= self.hdr.head.load(Ordering::SeqCst) + self.size as u64 {
                try_close += 1;
                if self.hdr.close_segment(tail_ticket, try_close > TRY_CLOSE_PRQ) {
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
                let cell_idx = cell.idx.load(Ordering::SeqCst);
                let unsafe_flag = cell_idx & CLOSED_BIT;
                let idx = index_of(cell_idx);
                let val = cell.val.load(Ordering::SeqCst);

                // inconsistent view of the cell
                if cell_idx != cell.idx.load(Ordering::SeqCst) {
                    continue;
                }

                if idx > head_ticket + self.size as u64 {
                    break;
                }

                if !val.is_null() && !is_reserved(val) {
                    if idx == head_ticket + self.size as u64 {
                        // only one dequeuer passes this condition
                        cell.val.store(ptr::null_mut(), Ordering::SeqCst);
                        return Some(unsafe { NonNull::new_unchecked(val) });
                    } else if unsafe_flag != 0 {
                        if cell.idx.load(Ordering::SeqCst) == cell_idx {
                            break;
                        }
                    } else if cell
                        .idx
                        .compare_exchange(
                            cell_idx,
                            set_flag(idx),
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        break;
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
                        // a parked sentinel has to be withdrawn before
                        // the epoch can advance
                        if is_reserved(val)
                            && cell
                                .val
                                .compare_exchange(
                                    val,
                                    ptr::null_mut(),
                                    Ordering::SeqCst,
                                    Ordering::SeqCst,
                                )
                                .is_err()
                        {
                            continue;
                        }
                        if cell
                            .idx
                            .compare_exchange(
                                cell_idx,
                                unsafe_flag | (head_ticket + self.size as u64),
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            )
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
        let mut name = String::from("PRQueue");
        if M::PADDED && padded {
            name.push_str("/padded");
        }
        name
    }
}

impl<T, M: PadMode> Drop for PrqRing<T, M> {
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
    fn sentinels_are_tagged_and_never_escape() {
        assert!(is_reserved(reserved::<u64>(0)));
        assert!(is_reserved(reserved::<u64>(41)));
        assert!(!is_reserved(item(3).as_ptr()));

        let ring = PrqRing::<u64, Padded>::with_start(8, 4, 0);
        let items: Vec<_> = (0..8).map(|i| item(i)).collect();
        for (tid, &p) in items.iter().enumerate() {
            assert!(ring.push(p, tid));
        }
        for &p in &items {
            assert_eq!(ring.pop(0), Some(p));
        }
        assert_eq!(ring.pop(0), None);
    }

    #[test]
    fn closes_when_full_and_still_drains() {
        let ring = PrqRing::<u64, Padded>::with_start(8, 4, 0);
        let items: Vec<_> = (0..8).map(|i| item(i)).collect();

        for &p in &items {
            assert!(ring.push(p, 1));
        }
        assert!(!ring.push(items[0], 1));
        assert!(ring.is_closed());

        for &p in &items {
            assert_eq!(ring.pop(2), Some(p));
        }
        assert_eq!(ring.pop(2), None);
    }

    #[test]
    fn continues_a_foreign_ticket_space() {
        let ring = PrqRing::<u64, Dense>::with_start(8, 4, 100);
        let a = item(1);
        assert!(ring.push(a, 0));
        assert_eq!(ring.pop(0), Some(a));
        assert_eq!(ring.pop(0), None);
        assert!(ring.header().head_index() > 100);
    }

    #[test]
    fn empty_pops_leave_the_ring_usable() {
        let ring = PrqRing::<u64, Padded>::with_start(8, 4, 0);
        for _ in 0..16 {
            assert_eq!(ring.pop(0), None);
        }
        let a = item(9);
        assert!(ring.push(a, 0));
        assert_eq!(ring.pop(0), Some(a));
    }
}
