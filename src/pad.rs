//! Type-level cell padding.
//!
//! Every ring can be instantiated with cache-line-sized cells (one cell
//! per line, no false sharing between neighbouring tickets) or densely
//! packed cells. The choice is a type parameter rather than a cargo
//! feature so both variants can coexist in one binary.

pub const CACHE_LINE: usize = 64;

/// Filler placed after a cell body to grow it to one cache line.
pub trait Pad: Send + Sync + 'static {
    fn new() -> Self;
}

#[repr(C)]
pub struct NoPad;

impl Pad for NoPad {
    #[inline]
    fn new() -> Self {
        NoPad
    }
}

/// Pads a 16-byte cell body (value + index, or one 128-bit word).
#[repr(C)]
pub struct Pad48 {
    _pad: [u8; 48],
}

impl Pad for Pad48 {
    #[inline]
    fn new() -> Self {
        Self { _pad: [0u8; 48] }
    }
}

/// Pads an 8-byte cell body (value only).
#[repr(C)]
pub struct Pad56 {
    _pad: [u8; 56],
}

impl Pad for Pad56 {
    #[inline]
    fn new() -> Self {
        Self { _pad: [0u8; 56] }
    }
}

/// Selects the padding shape for each cell body.
pub trait PadMode: Send + Sync + 'static {
    /// Padding for two-word cells (`FullCell`, `WideCell`).
    type FullPad: Pad;
    /// Padding for one-word cells (`ValCell`).
    type ValPad: Pad;
    /// Whether cells occupy a full cache line; only used for naming.
    const PADDED: bool;
}

/// One cell per cache line.
pub struct Padded;

/// Cells packed back to back.
pub struct Dense;

impl PadMode for Padded {
    type FullPad = Pad48;
    type ValPad = Pad56;
    const PADDED: bool = true;
}

impl PadMode for Dense {
    type FullPad = NoPad;
    type ValPad = NoPad;
    const PADDED: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{FullCell, ValCell, WideCell};

    #[test]
    fn padded_cells_fill_a_cache_line() {
        assert_eq!(std::mem::size_of::<FullCell<u64, Padded>>(), CACHE_LINE);
        assert_eq!(std::mem::size_of::<WideCell<Padded>>(), CACHE_LINE);
        assert_eq!(std::mem::size_of::<ValCell<u64, Padded>>(), CACHE_LINE);
    }

    #[test]
    fn dense_cells_stay_small() {
        assert_eq!(std::mem::size_of::<FullCell<u64, Dense>>(), 16);
        assert_eq!(std::mem::size_of::<WideCell<Dense>>(), 16);
        assert_eq!(std::mem::size_of::<ValCell<u64, Dense>>(), 8);
    }
}
