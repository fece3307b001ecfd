//! Unbounded queue chaining ring segments.
//!
//! Only the last segment takes pushes and only the first takes pops. A
//! push that finds its segment closed allocates a successor continuing
//! the ticket space; a pop that drains a segment with a successor CASes
//! the global head past it and retires it through the hazard registry.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

use crate::cell::ring_size;
use crate::error::{Empty, Full};
use crate::hazard::HazardRegistry;
use crate::segment::RingSegment;
use crate::{MpmcQueue, MAX_THREADS};

pub(crate) const HP_TAIL: usize = 0;
pub(crate) const HP_HEAD: usize = 1;

pub struct LinkedRingQueue<T, S: RingSegment<T>> {
    ring_size: usize,
    max_threads: usize,
    head: CachePadded<AtomicPtr<S>>,
    tail: CachePadded<AtomicPtr<S>>,
    hp: HazardRegistry<S>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, S: RingSegment<T>> Send for LinkedRingQueue<T, S> {}
unsafe impl<T: Send, S: RingSegment<T>> Sync for LinkedRingQueue<T, S> {}

impl<T: Send, S: RingSegment<T>> LinkedRingQueue<T, S> {
    pub fn new(segment_capacity: usize, max_threads: usize) -> Self {
        assert!(segment_capacity > 0, "segment capacity must be nonzero");
        assert!(max_threads > 0 && max_threads <= MAX_THREADS);

        let sentinel = Box::into_raw(Box::new(S::with_start(segment_capacity, max_threads, 0)));
        Self {
            ring_size: segment_capacity,
            max_threads,
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            hp: HazardRegistry::new(2, max_threads),
            _marker: PhantomData,
        }
    }
}

impl<T: Send, S: RingSegment<T>> MpmcQueue<T> for LinkedRingQueue<T, S> {
    /// Never fails: a closed tail segment is replaced by a fresh one.
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        debug_assert!(tid < self.max_threads);

        let mut ltail = self
            .hp
            .protect_ptr(HP_TAIL, self.tail.load(Ordering::Acquire), tid);
        loop {
            let ltail2 = self.tail.load(Ordering::Acquire);
            if ltail2 != ltail {
                ltail = self.hp.protect_ptr(HP_TAIL, ltail2, tid);
                continue;
            }
            let seg = unsafe { &*ltail };

            let lnext = seg.header().load_next();
            if !lnext.is_null() {
                // someone already chained a successor; help advance
                ltail = match self
                    .tail
                    .compare_exchange(ltail, lnext, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => self.hp.protect_ptr(HP_TAIL, lnext, tid),
                    Err(_) => self
                        .hp
                        .protect_ptr(HP_TAIL, self.tail.load(Ordering::Acquire), tid),
                };
                continue;
            }

            if seg.push(item, tid) {
                self.hp.clear_slot(HP_TAIL, tid);
                return Ok(());
            }

            // tail closed: chain a successor carrying the item
            let new_tail = Box::into_raw(Box::new(S::with_start(
                self.ring_size,
                self.max_threads,
                seg.header().next_start_index(),
            )));
            let pushed = unsafe { (*new_tail).push(item, tid) };
            debug_assert!(pushed, "push into a private fresh segment cannot fail");

            match seg.header().link_next(new_tail) {
                Ok(()) => {
                    let _ = self.tail.compare_exchange(
                        ltail,
                        new_tail,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    self.hp.clear_slot(HP_TAIL, tid);
                    return Ok(());
                }
                Err(winner) => {
                    unsafe { drop(Box::from_raw(new_tail)) };
                    ltail = self.hp.protect_ptr(HP_TAIL, winner, tid);
                }
            }
        }
    }

    fn pop(&self, tid: usize) -> Result<NonNull<T>, Empty> {
        debug_assert!(tid < self.max_threads);

        let mut lhead = self
            .hp
            .protect_ptr(HP_HEAD, self.head.load(Ordering::Acquire), tid);
        loop {
            let lhead2 = self.head.load(Ordering::Acquire);
            if lhead2 != lhead {
                lhead = self.hp.protect_ptr(HP_HEAD, lhead2, tid);
                continue;
            }
            let seg = unsafe { &*lhead };

            let mut item = seg.pop(tid);
            if item.is_none() {
                let lnext = seg.header().load_next();
                if !lnext.is_null() {
                    // a successor exists: one more try, then step over
                    item = seg.pop(tid);
                    if item.is_none() {
                        lhead = match self.head.compare_exchange(
                            lhead,
                            lnext,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                self.hp.retire(lhead, tid);
                                self.hp.protect_ptr(HP_HEAD, lnext, tid)
                            }
                            Err(current) => self.hp.protect_ptr(HP_HEAD, current, tid),
                        };
                        continue;
                    }
                }
            }

            self.hp.clear_slot(HP_HEAD, tid);
            return item.ok_or(Empty);
        }
    }

    /// Ticket distance between the protected tail and head segments;
    /// approximate while operations are in flight.
    fn len(&self, tid: usize) -> usize {
        let lhead = self.hp.protect(HP_HEAD, &self.head, tid);
        let ltail = self.hp.protect(HP_TAIL, &self.tail, tid);
        let t = unsafe { (*ltail).header().tail_index() };
        let h = unsafe { (*lhead).header().head_index() };
        self.hp.clear(tid);
        t.saturating_sub(h) as usize
    }

    fn capacity(&self) -> usize {
        ring_size(self.ring_size)
    }

    fn class_name(padded: bool) -> String {
        format!("Linked{}", S::class_name(padded))
    }
}

impl<T, S: RingSegment<T>> Drop for LinkedRingQueue<T, S> {
    fn drop(&mut self) {
        // items stay with their owners; only the chain is freed
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let next = unsafe { (*cur).header().load_next() };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
    }
}
