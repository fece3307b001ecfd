pub mod bounded_item;
pub mod bounded_seg;
pub mod unbounded;

pub use bounded_item::BoundedItemQueue;
pub use bounded_seg::{BoundedSegmentQueue, DEFAULT_MAX_SEGMENTS};
pub use unbounded::LinkedRingQueue;
