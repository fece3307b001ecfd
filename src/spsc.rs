//! Single-producer/single-consumer pointer ring.
//!
//! Emptiness and fullness are carried by the slots themselves: a nil
//! slot at `tail` means room, a nil slot at `head` means empty. The
//! indices are owner-private cursors, so the only cross-thread edge is
//! the slot pointer (release store, acquire load) and no CAS is needed.
//! The single-producer/single-consumer discipline is the caller's
//! invariant; concurrent use of either endpoint is undefined.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{Empty, Full};
use crate::pad::CACHE_LINE;

pub struct SpscRing<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    buf: *mut AtomicPtr<T>,
    size: usize,
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "ring capacity must be nonzero");

        // round the allocation up to whole cache lines so the buffer
        // can sit on a line boundary; only `size` slots are used
        let bytes = size * std::mem::size_of::<AtomicPtr<T>>();
        let bytes = (bytes + CACHE_LINE - 1) & !(CACHE_LINE - 1);
        let layout = Layout::from_size_align(bytes, CACHE_LINE).expect("ring layout overflow");

        let buf = unsafe { alloc::alloc(layout) } as *mut AtomicPtr<T>;
        if buf.is_null() {
            alloc::handle_alloc_error(layout);
        }
        for i in 0..size {
            unsafe { ptr::write(buf.add(i), AtomicPtr::new(ptr::null_mut())) };
        }

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            buf,
            size,
        }
    }

    #[inline]
    fn slot(&self, i: u64) -> &AtomicPtr<T> {
        unsafe { &*self.buf.add(i as usize) }
    }

    /// True when a push would currently succeed.
    #[inline]
    pub fn available(&self) -> bool {
        self.slot(self.tail.load(Ordering::Relaxed))
            .load(Ordering::Acquire)
            .is_null()
    }

    /// True when a pop would currently fail.
    #[inline]
    pub fn empty(&self) -> bool {
        self.slot(self.head.load(Ordering::Relaxed))
            .load(Ordering::Acquire)
            .is_null()
    }

    #[inline]
    pub fn push(&self, item: NonNull<T>) -> Result<(), Full> {
        let t = self.tail.load(Ordering::Relaxed);
        let slot = self.slot(t);
        if !slot.load(Ordering::Acquire).is_null() {
            return Err(Full);
        }
        slot.store(item.as_ptr(), Ordering::Release);
        let next = if t + 1 == self.size as u64 { 0 } else { t + 1 };
        self.tail.store(next, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    pub fn pop(&self) -> Result<NonNull<T>, Empty> {
        let h = self.head.load(Ordering::Relaxed);
        let slot = self.slot(h);
        let item = slot.load(Ordering::Acquire);
        if item.is_null() {
            return Err(Empty);
        }
        slot.store(ptr::null_mut(), Ordering::Release);
        let next = if h + 1 == self.size as u64 { 0 } else { h + 1 };
        self.head.store(next, Ordering::Relaxed);
        // the slot pointer was produced by a release store
        Ok(unsafe { NonNull::new_unchecked(item) })
    }

    /// Approximate fill level from the wrapped cursors.
    pub fn len(&self) -> usize {
        let t = self.tail.load(Ordering::Relaxed);
        let h = self.head.load(Ordering::Relaxed);
        if t >= h {
            (t - h) as usize
        } else {
            self.size - (h - t) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    pub fn class_name(_padded: bool) -> String {
        "SPSCQueue".to_string()
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        let bytes = self.size * std::mem::size_of::<AtomicPtr<T>>();
        let bytes = (bytes + CACHE_LINE - 1) & !(CACHE_LINE - 1);
        let layout = Layout::from_size_align(bytes, CACHE_LINE).expect("ring layout overflow");
        unsafe { alloc::dealloc(self.buf as *mut u8, layout) };
    }
}
