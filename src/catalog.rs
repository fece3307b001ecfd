//! Uniform enumeration of the concrete queues for dispatch-by-name
//! drivers.

use crate::all2all::All2All;
use crate::error::{Empty, Full};
use crate::linked::{BoundedItemQueue, BoundedSegmentQueue, LinkedRingQueue};
use crate::mux::{BoundedMuxQueue, LinkedMuxQueue};
use crate::pad::Padded;
use crate::rings::{BoundedMtQueue, CrqRing, FaaArrayQueue, MtqRing, PrqRing};
use crate::MpmcQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Faa,
    LinkedCrq,
    LinkedPrq,
    LinkedMtq,
    LinkedMux,
    BoundedItemCrq,
    BoundedItemPrq,
    BoundedSegmentCrq,
    BoundedSegmentPrq,
    BoundedMtq,
    BoundedMux,
}

impl QueueKind {
    pub const ALL: &'static [QueueKind] = &[
        QueueKind::Faa,
        QueueKind::LinkedCrq,
        QueueKind::LinkedPrq,
        QueueKind::LinkedMtq,
        QueueKind::LinkedMux,
        QueueKind::BoundedItemCrq,
        QueueKind::BoundedItemPrq,
        QueueKind::BoundedSegmentCrq,
        QueueKind::BoundedSegmentPrq,
        QueueKind::BoundedMtq,
        QueueKind::BoundedMux,
    ];

    pub const UNBOUNDED: &'static [QueueKind] = &[
        QueueKind::Faa,
        QueueKind::LinkedCrq,
        QueueKind::LinkedPrq,
        QueueKind::LinkedMtq,
        QueueKind::LinkedMux,
    ];

    pub const BOUNDED: &'static [QueueKind] = &[
        QueueKind::BoundedItemCrq,
        QueueKind::BoundedItemPrq,
        QueueKind::BoundedSegmentCrq,
        QueueKind::BoundedSegmentPrq,
        QueueKind::BoundedMtq,
        QueueKind::BoundedMux,
    ];

    /// Stable family identifier used by dispatch-by-name harnesses.
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Faa => "FAAArrayQueue",
            QueueKind::LinkedCrq => "LinkedCRQueue",
            QueueKind::LinkedPrq => "LinkedPRQueue",
            QueueKind::LinkedMtq => "LinkedMTQueue",
            QueueKind::LinkedMux => "LinkedMuxQueue",
            QueueKind::BoundedItemCrq => "BoundedItemCRQueue",
            QueueKind::BoundedItemPrq => "BoundedItemPRQueue",
            QueueKind::BoundedSegmentCrq => "BoundedSegmentCRQueue",
            QueueKind::BoundedSegmentPrq => "BoundedSegmentPRQueue",
            QueueKind::BoundedMtq => "BoundedMTQueue",
            QueueKind::BoundedMux => "BoundedMuxQueue",
        }
    }

    pub fn by_name(name: &str) -> Option<QueueKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn is_bounded(&self) -> bool {
        Self::BOUNDED.contains(self)
    }

    /// Builds the queue with padded cells, ready for `max_threads`
    /// concurrent callers.
    pub fn build<T: Send + 'static>(
        &self,
        capacity: usize,
        max_threads: usize,
    ) -> Box<dyn MpmcQueue<T>> {
        match self {
            QueueKind::Faa => Box::new(FaaArrayQueue::<T, Padded>::new(capacity, max_threads)),
            QueueKind::LinkedCrq => Box::new(LinkedRingQueue::<T, CrqRing<T, Padded>>::new(
                capacity,
                max_threads,
            )),
            QueueKind::LinkedPrq => Box::new(LinkedRingQueue::<T, PrqRing<T, Padded>>::new(
                capacity,
                max_threads,
            )),
            QueueKind::LinkedMtq => Box::new(
                LinkedRingQueue::<T, MtqRing<T, Padded, false>>::new(capacity, max_threads),
            ),
            QueueKind::LinkedMux => {
                Box::new(LinkedMuxQueue::<T>::new(capacity, max_threads))
            }
            QueueKind::BoundedItemCrq => Box::new(
                BoundedItemQueue::<T, CrqRing<T, Padded>>::new(capacity, max_threads),
            ),
            QueueKind::BoundedItemPrq => Box::new(
                BoundedItemQueue::<T, PrqRing<T, Padded>>::new(capacity, max_threads),
            ),
            QueueKind::BoundedSegmentCrq => Box::new(
                BoundedSegmentQueue::<T, CrqRing<T, Padded>>::new(capacity, max_threads),
            ),
            QueueKind::BoundedSegmentPrq => Box::new(
                BoundedSegmentQueue::<T, PrqRing<T, Padded>>::new(capacity, max_threads),
            ),
            QueueKind::BoundedMtq => {
                Box::new(BoundedMtQueue::<T, Padded>::new(capacity, max_threads))
            }
            QueueKind::BoundedMux => Box::new(BoundedMuxQueue::<T>::new(capacity, max_threads)),
        }
    }
}

/// Builds the SPSC fan-in/out matrix; not part of the uniform
/// catalogue because its constructor takes the thread counts.
pub fn build_all2all<T: Send + 'static>(
    total_capacity: usize,
    producers: usize,
    consumers: usize,
) -> All2All<T> {
    All2All::new(total_capacity, producers, consumers)
}

// keep the trait methods nameable on the boxed form
impl<T: Send> MpmcQueue<T> for Box<dyn MpmcQueue<T>> {
    fn push(&self, item: std::ptr::NonNull<T>, tid: usize) -> Result<(), Full> {
        (**self).push(item, tid)
    }

    fn pop(&self, tid: usize) -> Result<std::ptr::NonNull<T>, Empty> {
        (**self).pop(tid)
    }

    fn len(&self, tid: usize) -> usize {
        (**self).len(tid)
    }

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn class_name(_padded: bool) -> String {
        "dyn".to_string()
    }
}
