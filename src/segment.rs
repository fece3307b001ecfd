//! Shared state and behaviour of all ring segments.
//!
//! A segment's `tail` word packs a monotonically increasing ticket in
//! the 63 low bits and a closed flag in the top bit. Cell `idx` words
//! reuse the same split, with the top bit meaning "unsafe: a consumer
//! overtook this cell, skip it".

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

#[cfg(feature = "numa-hint")]
use std::sync::atomic::AtomicI32;

use crossbeam_utils::CachePadded;

pub const CLOSED_BIT: u64 = 1 << 63;

/// Ticket portion of a tail or cell-index word.
#[inline(always)]
pub fn index_of(t: u64) -> u64 {
    t & !CLOSED_BIT
}

/// Closed/unsafe flag of a tail or cell-index word.
#[inline(always)]
pub fn flagged(t: u64) -> bool {
    t & CLOSED_BIT != 0
}

#[inline(always)]
pub fn set_flag(t: u64) -> u64 {
    t | CLOSED_BIT
}

/// Head/tail tickets and the link to the successor segment.
#[repr(C)]
pub struct SegmentHeader<S> {
    pub(crate) head: CachePadded<AtomicU64>,
    pub(crate) tail: CachePadded<AtomicU64>,
    pub(crate) next: CachePadded<AtomicPtr<S>>,
    #[cfg(feature = "numa-hint")]
    cluster: AtomicI32,
}

impl<S> SegmentHeader<S> {
    /// A fresh segment starts with coinciding head and tail so its
    /// length reads zero; linked adapters continue the previous
    /// segment's ticket space through `start`.
    pub fn new(start: u64) -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(start)),
            tail: CachePadded::new(AtomicU64::new(start)),
            next: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            #[cfg(feature = "numa-hint")]
            cluster: AtomicI32::new(-1),
        }
    }

    #[inline]
    pub fn head_index(&self) -> u64 {
        self.head.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn tail_index(&self) -> u64 {
        index_of(self.tail.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        flagged(self.tail.load(Ordering::SeqCst))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head_index() >= self.tail_index()
    }

    /// Element count; approximate while operations are in flight.
    #[inline]
    pub fn len(&self) -> usize {
        let t = self.tail_index();
        let h = self.head_index();
        t.saturating_sub(h) as usize
    }

    /// Start ticket for the successor segment. Minus one compensates
    /// for the ticket burnt by the push that found this segment closed.
    #[inline]
    pub fn next_start_index(&self) -> u64 {
        self.tail_index().saturating_sub(1)
    }

    /// Sets the closed bit. The CAS path expects the tail to still be
    /// `tail_ticket + 1` (fetch-and-add rings pre-advance the ticket);
    /// `force` ORs the bit in unconditionally and always succeeds.
    #[inline]
    pub fn close_segment(&self, tail_ticket: u64, force: bool) -> bool {
        if force {
            self.tail.fetch_or(CLOSED_BIT, Ordering::SeqCst);
            return true;
        }
        let expected = tail_ticket.wrapping_add(1);
        self.tail
            .compare_exchange(
                expected,
                set_flag(expected),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Unconditional close at whatever the tail currently is.
    #[inline]
    pub fn force_close(&self) {
        self.tail.fetch_or(CLOSED_BIT, Ordering::SeqCst);
    }

    /// Repairs `head > tail` after speculative fetch-and-adds left the
    /// indices crossed; pops call this once they observe emptiness.
    pub fn fix_state(&self) {
        loop {
            let t = self.tail.load(Ordering::SeqCst);
            let h = self.head.load(Ordering::SeqCst);
            if self.tail.load(Ordering::SeqCst) != t {
                continue;
            }
            if h > t {
                if self
                    .tail
                    .compare_exchange(t, h, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    break;
                }
                continue;
            }
            break;
        }
    }

    #[inline]
    pub fn load_next(&self) -> *mut S {
        self.next.load(Ordering::Acquire)
    }

    /// Links `new` as the successor if none exists yet; on failure
    /// returns the segment that won the race.
    #[inline]
    pub fn link_next(&self, new: *mut S) -> Result<(), *mut S> {
        self.next
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// Cluster hint consumed by an external NUMA dispatcher; negative
    /// means unowned.
    #[cfg(feature = "numa-hint")]
    #[inline]
    pub fn cluster(&self) -> i32 {
        self.cluster.load(Ordering::Relaxed)
    }

    #[cfg(feature = "numa-hint")]
    #[inline]
    pub fn set_cluster(&self, cluster: i32) {
        self.cluster.store(cluster, Ordering::Relaxed);
    }
}

/// A fixed-size MPMC ring usable stand-alone or chained by the linked
/// adapters.
pub trait RingSegment<T>: Send + Sync + Sized {
    /// Builds a ring of (at least) `ring_size` cells whose ticket space
    /// begins at `start`.
    fn with_start(ring_size: usize, max_threads: usize, start: u64) -> Self;

    fn header(&self) -> &SegmentHeader<Self>;

    /// False once the segment is closed (or, for never-closing bounded
    /// rings, while it is full).
    fn push(&self, item: NonNull<T>, tid: usize) -> bool;

    fn pop(&self, tid: usize) -> Option<NonNull<T>>;

    fn capacity(&self) -> usize;

    fn class_name(padded: bool) -> String;

    #[inline]
    fn len(&self) -> usize {
        self.header().len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.header().is_empty()
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.header().is_closed()
    }
}
