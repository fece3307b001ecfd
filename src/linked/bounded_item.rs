//! Linked segments capped by a global item counter.
//!
//! Two counters gate admission: a push first reserves a slot by a CAS
//! bump of `pushed` while `pushed - popped < capacity`, and only then
//! touches the segments. Once admitted the linked push cannot fail, so
//! the live item count never exceeds the advertised capacity even
//! under producer races. A per-thread `check_push` flag remembers that
//! the last attempt hit a closed segment so follow-up pushes skip
//! straight to chaining instead of inflating the closed ring's ticket
//! space.

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

pub struct BoundedItemQueue<T, S: RingSegment<T>> {
    capacity: usize,
    max_threads: usize,
    head: CachePadded<AtomicPtr<S>>,
    tail: CachePadded<AtomicPtr<S>>,
    items_pushed: CachePadded<AtomicU64>,
    items_popped: CachePadded<AtomicU64>,
    // per-tid: last push attempt found the tail segment closed
    check_push: Box<[CachePadded<AtomicBool>]>,
    hp: HazardRegistry<S>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, S: RingSegment<T>> Send for BoundedItemQueue<T, S> {}
unsafe impl<T: Send, S: RingSegment<T>> Sync for BoundedItemQueue<T, S> {}

impl<T: Send, S: RingSegment<T>> BoundedItemQueue<T, S> {
    pub fn new(capacity: usize, max_threads: usize) -> Self {
        assert!(capacity > 0, "capacity must be nonzero");
        assert!(max_threads > 0 && max_threads <= MAX_THREADS);

        let effective = ring_size(capacity);
        let sentinel = Box::into_raw(Box::new(S::with_start(effective, max_threads, 0)));
        let check_push = (0..max_threads)
            .map(|_| CachePadded::new(AtomicBool::new(false)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            capacity: effective,
            max_threads,
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            items_pushed: CachePadded::new(AtomicU64::new(0)),
            items_popped: CachePadded::new(AtomicU64::new(0)),
            check_push,
            hp: HazardRegistry::new(2, max_threads),
            _marker: PhantomData,
        }
    }

    /// Claims one of the `capacity` slots or reports the queue full.
    #[inline]
    fn reserve_slot(&self) -> Result<(), Full> {
        loop {
            let pushed = self.items_pushed.load(Ordering::Acquire);
            let popped = self.items_popped.load(Ordering::Acquire);
            if pushed.saturating_sub(popped) >= self.capacity as u64 {
                return Err(Full);
            }
            if self
                .items_pushed
                .compare_exchange_weak(pushed, pushed + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }
}

impl<T: Send, S: RingSegment<T>> MpmcQueue<T> for BoundedItemQueue<T, S> {
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        debug_assert!(tid < self.max_threads);
        let skip_flag = &self.check_push[tid];

        self.reserve_slot()?;

        // admitted: from here the push cannot fail
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

            // tail closed: chain a successor carrying the item
            let new_tail = Box::into_raw(Box::new(S::with_start(
                self.capacity,
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
        let item = loop {
            let lhead2 = self.head.load(Ordering::Acquire);
            if lhead2 != lhead {
                lhead = self.hp.protect_ptr(HP_HEAD, lhead2, tid);
                continue;
            }
            let seg = unsafe { &*lhead };

            if let Some(item) = seg.pop(tid) {
                break item;
            }

            let lnext = seg.header().load_next();
            if lnext.is_null() {
                self.hp.clear_slot(HP_HEAD, tid);
                return Err(Empty);
            }

            if let Some(item) = seg.pop(tid) {
                break item;
            }

            lhead = match self
                .head
                .compare_exchange(lhead, lnext, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.hp.retire(lhead, tid);
                    self.hp.protect_ptr(HP_HEAD, lnext, tid)
                }
                Err(current) => self.hp.protect_ptr(HP_HEAD, current, tid),
            };
        };

        self.hp.clear_slot(HP_HEAD, tid);
        self.items_popped.fetch_add(1, Ordering::Release);
        Ok(item)
    }

    /// Exact when quiescent; may briefly count a reserved push whose
    /// item is not yet visible, and never undershoots below zero.
    fn len(&self, _tid: usize) -> usize {
        let pushed = self.items_pushed.load(Ordering::Relaxed);
        let popped = self.items_popped.load(Ordering::Relaxed);
        pushed.saturating_sub(popped) as usize
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn class_name(padded: bool) -> String {
        format!("BoundedItem{}", S::class_name(padded))
    }
}

impl<T, S: RingSegment<T>> Drop for BoundedItemQueue<T, S> {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let next = unsafe { (*cur).header().load_next() };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
    }
}
