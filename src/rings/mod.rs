pub mod crq;
pub mod faa;
pub mod mtq;
pub mod prq;

pub use crq::CrqRing;
pub use faa::FaaArrayQueue;
pub use mtq::{BoundedMtQueue, MtqRing};
pub use prq::PrqRing;
