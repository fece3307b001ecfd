//! Bounded exponential spin backoff for CAS retry loops.

use std::hint;

const MIN_DELAY: u32 = 128;
const MAX_DELAY: u32 = 1024;

/// Doubles a NOP delay between `MIN_DELAY` and `MAX_DELAY` iterations on
/// every failed attempt. Never yields to the OS; callers stay on-core.
pub struct Backoff {
    delay: u32,
}

impl Backoff {
    #[inline]
    pub fn new() -> Self {
        Self { delay: MIN_DELAY }
    }

    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.delay {
            hint::spin_loop();
        }
        if self.delay < MAX_DELAY {
            self.delay <<= 1;
        }
    }

    #[inline]
    pub fn reset(&mut self) {
        self.delay = MIN_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
