//! Lock-free MPMC FIFO queues of pointer-sized elements.
//!
//! The catalogue covers four ring-segment protocols (a 128-bit-CAS
//! ticket ring, a single-word-CAS ring with reserved sentinels, a
//! CAS-loop ring and a fetch-and-add array), three linked adapters
//! over them (unbounded, item-bounded, segment-bounded), an SPSC ring
//! with an all-to-all fan-in/out matrix, and a mutex baseline.
//!
//! Queues carry raw `NonNull<T>` items owned by the caller: nothing is
//! ever dropped by a queue, a pop transfers the pointer back. Every
//! operation takes the caller's thread id, which must be unique per
//! live thread and below the queue's `max_threads`; the linked
//! adapters index their hazard-pointer table with it.
//!
//! All operations are non-blocking and fail fast: a full bounded queue
//! refuses the push, an empty queue returns nothing. Only the mutex
//! baseline blocks, briefly.

use std::ptr::NonNull;

pub mod all2all;
pub mod backoff;
pub mod catalog;
pub mod cell;
pub mod error;
pub mod hazard;
pub mod linked;
pub mod mux;
pub mod pad;
pub mod remap;
pub mod rings;
pub mod segment;
pub mod spsc;

pub use all2all::All2All;
pub use catalog::QueueKind;
pub use error::{Empty, Full};
pub use hazard::{HazardRegistry, MAX_THREADS};
pub use linked::{BoundedItemQueue, BoundedSegmentQueue, LinkedRingQueue};
pub use mux::{BoundedMuxQueue, LinkedMuxQueue, MuxQueue};
pub use pad::{Dense, PadMode, Padded};
pub use rings::{BoundedMtQueue, CrqRing, FaaArrayQueue, MtqRing, PrqRing};
pub use segment::{RingSegment, SegmentHeader};
pub use spsc::SpscRing;

/// Common contract of every concrete MPMC queue.
///
/// `tid` is the caller's stable thread id, unique per live thread and
/// `< max_threads` of the queue; violations are undefined behaviour in
/// release builds and assert in debug builds.
pub trait MpmcQueue<T: Send>: Send + Sync {
    /// Enqueues a caller-owned pointer. Unbounded variants always
    /// succeed; bounded variants refuse when full.
    fn push(&self, item: NonNull<T>, tid: usize) -> Result<(), Full>;

    /// Dequeues the oldest available item, transferring the pointer
    /// back to the caller.
    fn pop(&self, tid: usize) -> Result<NonNull<T>, Empty>;

    /// Best-effort element count: exact for item-counted variants,
    /// a ticket-distance approximation for the others.
    fn len(&self, tid: usize) -> usize;

    #[inline]
    fn is_empty(&self, tid: usize) -> bool {
        self.len(tid) == 0
    }

    /// Effective configured capacity; may exceed the requested one
    /// under the `pow2` feature.
    fn capacity(&self) -> usize;

    /// Stable queue-family identifier for dispatch-by-name harnesses.
    fn class_name(padded: bool) -> String
    where
        Self: Sized;
}

/// Unbounded queue over 128-bit-CAS ring segments.
pub type LcrQueue<T, M = Padded> = LinkedRingQueue<T, CrqRing<T, M>>;

/// Unbounded queue over single-word-CAS ring segments.
pub type LprQueue<T, M = Padded> = LinkedRingQueue<T, PrqRing<T, M>>;

/// Unbounded queue over CAS-loop ring segments.
pub type LmtQueue<T, M = Padded> = LinkedRingQueue<T, MtqRing<T, M, false>>;

/// Unbounded fetch-and-add array queue.
pub type FaaQueue<T, M = Padded> = FaaArrayQueue<T, M>;

/// Item-counted bounded queues.
pub type BoundedItemCrq<T, M = Padded> = BoundedItemQueue<T, CrqRing<T, M>>;
pub type BoundedItemPrq<T, M = Padded> = BoundedItemQueue<T, PrqRing<T, M>>;

/// Segment-counted bounded queues.
pub type BoundedSegmentCrq<T, M = Padded> = BoundedSegmentQueue<T, CrqRing<T, M>>;
pub type BoundedSegmentPrq<T, M = Padded> = BoundedSegmentQueue<T, PrqRing<T, M>>;
