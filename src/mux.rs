//! Mutex-guarded baseline queue.
//!
//! The correctness and performance reference for the lock-free
//! catalogue: a deque behind a mutex, optionally capacity-checked.

use std::collections::VecDeque;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{Empty, Full};
use crate::MpmcQueue;

pub struct MuxQueue<T, const BOUNDED: bool> {
    queue: Mutex<VecDeque<*mut T>>,
    capacity: usize,
}

/// Capacity-checked baseline.
pub type BoundedMuxQueue<T> = MuxQueue<T, true>;

/// Grow-forever baseline.
pub type LinkedMuxQueue<T> = MuxQueue<T, false>;

unsafe impl<T: Send, const B: bool> Send for MuxQueue<T, B> {}
unsafe impl<T: Send, const B: bool> Sync for MuxQueue<T, B> {}

impl<T, const B: bool> MuxQueue<T, B> {
    pub fn new(capacity: usize, _max_threads: usize) -> Self {
        assert!(capacity > 0, "capacity must be nonzero");
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
        }
    }
}

impl<T: Send, const B: bool> MpmcQueue<T> for MuxQueue<T, B> {
    fn push(&self, item: NonNull<T>, _tid: usize) -> Result<(), Full> {
        let mut queue = self.queue.lock();
        if B && queue.len() >= self.capacity {
            return Err(Full);
        }
        queue.push_back(item.as_ptr());
        Ok(())
    }

    fn pop(&self, _tid: usize) -> Result<NonNull<T>, Empty> {
        let mut queue = self.queue.lock();
        match queue.pop_front() {
            // only non-null pointers ever enter the deque
            Some(p) => Ok(unsafe { NonNull::new_unchecked(p) }),
            None => Err(Empty),
        }
    }

    fn len(&self, _tid: usize) -> usize {
        self.queue.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn class_name(_padded: bool) -> String {
        if B {
            "BoundedMuxQueue".to_string()
        } else {
            "LinkedMuxQueue".to_string()
        }
    }
}
