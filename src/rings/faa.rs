//! Fetch-and-add array queue: a linked chain of generational arrays.
//!
//! Unlike the ticket rings this queue chains its own nodes instead of
//! going through a linked adapter; a drained cell is stamped with a
//! per-queue `taken` sentinel so late producers cannot resurrect it.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::cell::{alloc_cells, dealloc_cells, ValCell};
use crate::error::{Empty, Full};
use crate::hazard::HazardRegistry;
use crate::pad::{PadMode, Padded};
use crate::MpmcQueue;

const HP_TAIL: usize = 0;
const HP_HEAD: usize = 1;

/// Reads tolerated while waiting out a producer that reserved the cell
/// but has not deposited yet.
const POP_SPIN_LIMIT: usize = 4 * 1024;

pub struct FaaNode<T, M: PadMode> {
    deq_idx: CachePadded<AtomicU64>,
    enq_idx: CachePadded<AtomicU64>,
    next: CachePadded<AtomicPtr<FaaNode<T, M>>>,
    start_offset: u64,
    size: usize,
    cells: *mut ValCell<T, M>,
}

impl<T, M: PadMode> FaaNode<T, M> {
    /// Node with its first entry prefilled; the allocating producer's
    /// item travels with the node.
    fn new(first: *mut T, start_offset: u64, size: usize) -> Self {
        let cells = unsafe { alloc_cells::<ValCell<T, M>>(size) };
        unsafe {
            ptr::write(cells, ValCell::new());
            (*cells).val.store(first, Ordering::Relaxed);
            for i in 1..size {
                ptr::write(cells.add(i), ValCell::new());
            }
        }
        Self {
            deq_idx: CachePadded::new(AtomicU64::new(0)),
            enq_idx: CachePadded::new(AtomicU64::new(1)),
            next: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            start_offset,
            size,
            cells,
        }
    }

    #[inline]
    fn cell(&self, i: usize) -> &ValCell<T, M> {
        debug_assert!(i < self.size);
        unsafe { &*self.cells.add(i) }
    }
}

impl<T, M: PadMode> Drop for FaaNode<T, M> {
    fn drop(&mut self) {
        unsafe { dealloc_cells(self.cells, self.size) };
    }
}

pub struct FaaArrayQueue<T, M: PadMode = Padded> {
    size: usize,
    max_threads: usize,
    hp: HazardRegistry<FaaNode<T, M>>,
    head: CachePadded<AtomicPtr<FaaNode<T, M>>>,
    tail: CachePadded<AtomicPtr<FaaNode<T, M>>>,
    taken: *mut T,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send, M: PadMode> Send for FaaArrayQueue<T, M> {}
unsafe impl<T: Send, M: PadMode> Sync for FaaArrayQueue<T, M> {}

impl<T: Send, M: PadMode> FaaArrayQueue<T, M> {
    pub fn new(buffer_size: usize, max_threads: usize) -> Self {
        assert!(buffer_size > 0, "ring capacity must be nonzero");

        let sentinel = Box::into_raw(Box::new(FaaNode::new(ptr::null_mut(), 0, buffer_size)));
        unsafe { (*sentinel).enq_idx.store(0, Ordering::Relaxed) };

        // never dereferenced; only ever compared against cell contents
        let taken = Box::into_raw(Box::new(0u64)) as *mut T;

        Self {
            size: buffer_size,
            max_threads,
            hp: HazardRegistry::new(2, max_threads),
            head: CachePadded::new(AtomicPtr::new(sentinel)),
            tail: CachePadded::new(AtomicPtr::new(sentinel)),
            taken,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn cas_tail(&self, cmp: *mut FaaNode<T, M>, new: *mut FaaNode<T, M>) -> bool {
        self.tail
            .compare_exchange(cmp, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[inline]
    fn cas_head(&self, cmp: *mut FaaNode<T, M>, new: *mut FaaNode<T, M>) -> bool {
        self.head
            .compare_exchange(cmp, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn enqueue(&self, item: NonNull<T>, tid: usize) {
        debug_assert!(tid < self.max_threads);
        loop {
            let ltail = self.hp.protect(HP_TAIL, &self.tail, tid);
            let node = unsafe { &*ltail };
            let idx = node.enq_idx.fetch_add(1, Ordering::SeqCst);

            if idx as usize > self.size - 1 {
                // node full: link or chase the successor
                if ltail != self.tail.load(Ordering::SeqCst) {
                    continue;
                }
                let lnext = node.next.load(Ordering::SeqCst);
                if lnext.is_null() {
                    let new_node = Box::into_raw(Box::new(FaaNode::new(
                        item.as_ptr(),
                        node.start_offset + self.size as u64,
                        self.size,
                    )));
                    if node
                        .next
                        .compare_exchange(
                            ptr::null_mut(),
                            new_node,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        self.cas_tail(ltail, new_node);
                        self.hp.clear_slot(HP_TAIL, tid);
                        return;
                    }
                    unsafe { drop(Box::from_raw(new_node)) };
                } else {
                    self.cas_tail(ltail, lnext);
                }
                continue;
            }

            let cell = node.cell(idx as usize);
            if cell
                .val
                .compare_exchange(
                    ptr::null_mut(),
                    item.as_ptr(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.hp.clear_slot(HP_TAIL, tid);
                return;
            }
        }
    }

    pub fn dequeue(&self, tid: usize) -> Option<NonNull<T>> {
        debug_assert!(tid < self.max_threads);
        let mut item: *mut T = ptr::null_mut();
        let mut lhead = self.hp.protect(HP_HEAD, &self.head, tid);

        loop {
            let node = unsafe { &*lhead };
            let idx = node.deq_idx.fetch_add(1, Ordering::SeqCst);

            if idx as usize > self.size - 1 {
                // drained: move to the successor if there is one
                let lnext = node.next.load(Ordering::SeqCst);
                if lnext.is_null() {
                    break;
                }
                if self.cas_head(lhead, lnext) {
                    self.hp.retire(lhead, tid);
                }
                lhead = self.hp.protect(HP_HEAD, &self.head, tid);
                continue;
            }

            let cell = node.cell(idx as usize);
            if cell.val.load(Ordering::SeqCst).is_null()
                && idx < node.enq_idx.load(Ordering::SeqCst)
            {
                for _ in 0..POP_SPIN_LIMIT {
                    if !cell.val.load(Ordering::SeqCst).is_null() {
                        break;
                    }
                }
            }

            item = cell.val.swap(self.taken, Ordering::SeqCst);
            if !item.is_null() {
                break;
            }

            let t = node.enq_idx.load(Ordering::SeqCst);
            if idx + 1 >= t {
                if !node.next.load(Ordering::SeqCst).is_null() {
                    continue;
                }
                let _ = node
                    .enq_idx
                    .compare_exchange(t, idx + 1, Ordering::SeqCst, Ordering::SeqCst);
                break;
            }
        }

        self.hp.clear_slot(HP_HEAD, tid);
        NonNull::new(item)
    }

    /// Best-effort element count across the node chain.
    pub fn length(&self, tid: usize) -> usize {
        let lhead = self.hp.protect(HP_HEAD, &self.head, tid);
        let ltail = self.hp.protect(HP_TAIL, &self.tail, tid);
        let (t, h) = unsafe {
            (
                (self.size as u64).min((*ltail).enq_idx.load(Ordering::SeqCst))
                    + (*ltail).start_offset,
                (self.size as u64).min((*lhead).deq_idx.load(Ordering::SeqCst))
                    + (*lhead).start_offset,
            )
        };
        self.hp.clear(tid);
        t.saturating_sub(h) as usize
    }
}

impl<T: Send, M: PadMode> MpmcQueue<T> for FaaArrayQueue<T, M> {
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full> {
        self.enqueue(item, tid);
        Ok(())
    }

    fn pop(&self, tid: usize) -> Result<NonNull<T>, Empty> {
        self.dequeue(tid).ok_or(Empty)
    }

    fn len(&self, tid: usize) -> usize {
        self.length(tid)
    }

    fn capacity(&self) -> usize {
        self.size
    }

    fn class_name(padded: bool) -> String {
        let mut name = String::from("FAAArrayQueue");
        if M::PADDED && padded {
            name.push_str("/padded");
        }
        name
    }
}

impl<T, M: PadMode> Drop for FaaArrayQueue<T, M> {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
        unsafe { drop(Box::from_raw(self.taken as *mut u64)) };
    }
}
