//! Linked segments capped by the number of live segments.
//!
//! Two counters track the chain: linking bumps `seg_tail`, retiring a
//! drained head bumps `seg_head`; live segments = `tail - head + 1`
//! (head and tail may sit on the same segment). A push that would need
//! one segment too many fails instead. If a stale counter read lets an
//! allocation slip through, the post-link recheck force-closes the
//! fresh segment so the chain never grows past the cap for long.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::cell::ring_size;
use crate::error::{Empty, Full};
use crate::hazard::HazardRegistry;
use crate::linked::unbounded::{HP_HEAD, HP_TAIL};
use crate::segment::RingSegment;
use crate::{MpmcQueue, MAX_THREADS};

pub const DEFAULT_MAX_SEGMENTS: usize = 4;

pub struct BoundedSegmentQueue<T, S: RingSegment<T>> {
    max_segments: usize,
    ring_size: usize,
    max_threads: usize,
    head: CachePadded<AtomicPtr<S>>,
    tail: CachePadded<AtomicPtr<S>>,
    seg_tail: CachePadded<AtomicU64>,
    seg_head: CachePadded<AtomicU64>,
    // per-tid: last push attempt found the tail segment closed
    check_push: Box<[CachePadded<AtomicBool>]>,
    hp: HazardRegistry<S>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, S: RingSegment<T>> Send for BoundedSegmentQueue<T, S> {}
unsafe impl<T: Send, S: RingSegment<T>> Sync for BoundedSegmentQueue<T, S> {}

impl<T: Send, S: RingSegment<T>> BoundedSegmentQueue<T, S> {
    pub fn new(capacity: usize, max_threads: usize) -> Self {
        Self::with_segments(capacity, max_threads, DEFAULT_MAX_SEGMENTS)
    }

    /// Splits `capacity` across `max_segments` equally sized rings.
    pub fn with_segments(capacity: usize, max_threads: usize, max_segments: usize) -> Self {
        assert!(capacity > 0, "capacity must be nonzero");
        assert!(max_segments > 0, "segment cap must be nonzero");
        assert!(max_threads > 0 && max_threads <= MAX_THREADS);

        let per_segment = ring_size(capacity) / max_segments;
        assert!(
            per_segment > 0,
            "capacity must cover at least one cell per segment"
        );

        let sentinel = Box::into_raw(Box::new(S::with_start(per_segment, max_threads, 0)));
        let check_push = (0..max_threads)
            .map(|_| CachePadded::new(AtomicBool::new(false)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            max_segments,
            ring_size: per_segment,
            max_threads,
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            seg_tail: CachePadded::new(AtomicU64::new(0)),
            seg_head: CachePadded::new(AtomicU64::new(0)),
            check_push,
            hp: HazardRegistry::new(2, max_threads),
            _marker: PhantomData,
        }
    }

    /// Segments currently in the chain.
    pub fn segment_count(&self) -> u64 {
        let t = self.seg_tail.load(Ordering::Acquire);
        let h = self.seg_head.load(Ordering::Acquire);
        t.saturating_sub(h) + 1
    }
}

impl<T: Send, S: RingSegment<T>> MpmcQueue<T> for BoundedSegmentQueue<T, S> {
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        debug_assert!(tid < self.max_threads);
        let skip_flag = &self.check_push[tid];

        let mut ltail = self
            .hp
            .protect_ptr(HP_TAIL, self.tail.load(Ordering::Acquire), tid);
        loop {
            let ltail2 = self.tail.load(Ordering::Acquire);
            if ltail2 != ltail {
                skip_flag.store(false, Ordering::Relaxed);
                ltail = self.hp.protect_ptr(HP_TAIL, ltail2, tid);
                continue;
            }
            let seg = unsafe { &*ltail };

            let lnext = seg.header().load_next();
            if !lnext.is_null() {
                ltail = match self
                    .tail
                    .compare_exchange(ltail, lnext, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => self.hp.protect_ptr(HP_TAIL, lnext, tid),
                    Err(_) => self
                        .hp
                        .protect_ptr(HP_TAIL, self.tail.load(Ordering::Acquire), tid),
                };
                skip_flag.store(false, Ordering::Relaxed);
                continue;
            }

            let mut skip = skip_flag.load(Ordering::Relaxed);
            if skip {
                skip = seg.is_closed();
                skip_flag.store(skip, Ordering::Relaxed);
            }
            if !skip {
                if seg.push(item, tid) {
                    self.hp.clear_slot(HP_TAIL, tid);
                    return Ok(());
                }
                skip_flag.store(true, Ordering::Relaxed);
            }

            // the chain is at its cap: reject instead of chaining
            if self.segment_count() >= self.max_segments as u64 {
                self.hp.clear_slot(HP_TAIL, tid);
                return Err(Full);
            }

            let new_tail = Box::into_raw(Box::new(S::with_start(
                self.ring_size,
                self.max_threads,
                seg.header().next_start_index(),
            )));
            let pushed = unsafe { (*new_tail).push(item, tid) };
            debug_assert!(pushed, "push into a private fresh segment cannot fail");

            match seg.header().link_next(new_tail) {
                Ok(()) => {
                    let t = self.seg_tail.fetch_add(1, Ordering::AcqRel) + 1;
                    let h = self.seg_head.load(Ordering::Acquire);
                    // a stale counter read raced us past the cap: the
                    // fresh segment takes no more items
                    if t.saturating_sub(h) + 1 > self.max_segments as u64 {
                        unsafe { (*new_tail).header().force_close() };
                    }
                    let _ = self.tail.compare_exchange(
                        ltail,
                        new_tail,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    skip_flag.store(false, Ordering::Relaxed);
                    self.hp.clear_slot(HP_TAIL, tid);
                    return Ok(());
                }
                Err(winner) => {
                    unsafe { drop(Box::from_raw(new_tail)) };
                    skip_flag.store(false, Ordering::Relaxed);
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
                                self.seg_head.fetch_add(1, Ordering::Release);
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

    fn len(&self, tid: usize) -> usize {
        let lhead = self.hp.protect(HP_HEAD, &self.head, tid);
        let ltail = self.hp.protect(HP_TAIL, &self.tail, tid);
        let t = unsafe { (*ltail).header().tail_index() };
        let h = unsafe { (*lhead).header().head_index() };
        self.hp.clear(tid);
        t.saturating_sub(h) as usize
    }

    fn capacity(&self) -> usize {
        self.ring_size * self.max_segments
    }

    fn class_name(padded: bool) -> String {
        format!("BoundedSegment{}", S::class_name(padded))
    }
}

impl<T, S: RingSegment<T>> Drop for BoundedSegmentQueue<T, S> {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let next = unsafe { (*cur).header().load_next() };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
    }
}
