//! Hazard-pointer registry for segment reclamation.
//!
//! Threads publish any segment pointer they are about to dereference
//! into a slot indexed by their `tid`; `retire` scans every slot before
//! freeing. One registry lives inside each linked queue and dies with
//! it, freeing whatever is still parked on the retired lists.

#[cfg(feature = "hazard")]
use std::cell::UnsafeCell;
#[cfg(feature = "hazard")]
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

#[cfg(feature = "hazard")]
use crossbeam_utils::CachePadded;

/// Hard cap on caller-supplied thread ids, across every queue.
pub const MAX_THREADS: usize = 256;

/// Protection slots available per thread. The linked adapters use two.
pub const MAX_HP_PER_THREAD: usize = 11;

/// Retired-list length above which `retire` scans. Zero scans on every
/// call; raising it trades reclamation latency for fewer table sweeps.
const THRESHOLD_R: usize = 0;

#[cfg(feature = "hazard")]
pub struct HazardRegistry<S> {
    hps: usize,
    max_threads: usize,
    slots: Box<[CachePadded<[AtomicPtr<S>; MAX_HP_PER_THREAD]>]>,
    retired: Box<[CachePadded<UnsafeCell<Vec<*mut S>>>]>,
}

#[cfg(feature = "hazard")]
unsafe impl<S> Send for HazardRegistry<S> {}
#[cfg(feature = "hazard")]
unsafe impl<S> Sync for HazardRegistry<S> {}

#[cfg(feature = "hazard")]
impl<S> HazardRegistry<S> {
    pub fn new(hps: usize, max_threads: usize) -> Self {
        assert!(hps <= MAX_HP_PER_THREAD);
        assert!(max_threads > 0 && max_threads <= MAX_THREADS);

        let slots = (0..max_threads)
            .map(|_| CachePadded::new(std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut()))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let retired = (0..max_threads)
            .map(|_| CachePadded::new(UnsafeCell::new(Vec::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            hps,
            max_threads,
            slots,
            retired,
        }
    }

    /// Reads `src`, publishes the value, and re-reads until two
    /// consecutive reads agree, so the protection cannot be stale.
    #[inline]
    pub fn protect(&self, slot: usize, src: &AtomicPtr<S>, tid: usize) -> *mut S {
        let row = &self.slots[tid];
        let mut prev = ptr::null_mut();
        loop {
            let cur = src.load(Ordering::SeqCst);
            if cur == prev {
                return cur;
            }
            row[slot].store(cur, Ordering::SeqCst);
            prev = cur;
        }
    }

    /// Publishes an already-loaded pointer. The caller re-checks the
    /// source afterwards.
    #[inline]
    pub fn protect_ptr(&self, slot: usize, p: *mut S, tid: usize) -> *mut S {
        self.slots[tid][slot].store(p, Ordering::SeqCst);
        p
    }

    /// As `protect_ptr` with release ordering, for callers that already
    /// established a happens-before on `p`.
    #[inline]
    pub fn protect_release(&self, slot: usize, p: *mut S, tid: usize) -> *mut S {
        self.slots[tid][slot].store(p, Ordering::Release);
        p
    }

    #[inline]
    pub fn clear(&self, tid: usize) {
        let row = &self.slots[tid];
        for slot in row.iter().take(self.hps) {
            slot.store(ptr::null_mut(), Ordering::Release);
        }
    }

    #[inline]
    pub fn clear_slot(&self, slot: usize, tid: usize) {
        self.slots[tid][slot].store(ptr::null_mut(), Ordering::Release);
    }

    /// Parks `p` on the calling thread's retired list, then frees every
    /// listed pointer that no slot in the table still references.
    pub fn retire(&self, p: *mut S, tid: usize) {
        // Only `tid` ever touches its own list.
        let list = unsafe { &mut *self.retired[tid].get() };
        if !p.is_null() {
            list.push(p);
        }
        if list.len() < THRESHOLD_R {
            return;
        }
        let mut i = 0;
        while i < list.len() {
            let obj = list[i];
            if self.in_use(obj) {
                i += 1;
            } else {
                list.remove(i);
                unsafe { drop(Box::from_raw(obj)) };
            }
        }
    }

    fn in_use(&self, obj: *mut S) -> bool {
        for tid in 0..self.max_threads {
            let row = &self.slots[tid];
            for slot in (0..self.hps).rev() {
                if row[slot].load(Ordering::SeqCst) == obj {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(feature = "hazard")]
impl<S> Drop for HazardRegistry<S> {
    fn drop(&mut self) {
        for row in self.retired.iter() {
            let list = unsafe { &mut *row.get() };
            for &p in list.iter() {
                unsafe { drop(Box::from_raw(p)) };
            }
            list.clear();
        }
    }
}

/// Stub registry: protection is a no-op and retired segments leak. Only
/// valid when segments are never recycled.
#[cfg(not(feature = "hazard"))]
pub struct HazardRegistry<S> {
    _marker: std::marker::PhantomData<fn(S)>,
}

#[cfg(not(feature = "hazard"))]
unsafe impl<S> Send for HazardRegistry<S> {}
#[cfg(not(feature = "hazard"))]
unsafe impl<S> Sync for HazardRegistry<S> {}

#[cfg(not(feature = "hazard"))]
impl<S> HazardRegistry<S> {
    pub fn new(_hps: usize, max_threads: usize) -> Self {
        assert!(max_threads > 0 && max_threads <= MAX_THREADS);
        Self {
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn protect(&self, _slot: usize, src: &AtomicPtr<S>, _tid: usize) -> *mut S {
        src.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn protect_ptr(&self, _slot: usize, p: *mut S, _tid: usize) -> *mut S {
        p
    }

    #[inline]
    pub fn protect_release(&self, _slot: usize, p: *mut S, _tid: usize) -> *mut S {
        p
    }

    #[inline]
    pub fn clear(&self, _tid: usize) {}

    #[inline]
    pub fn clear_slot(&self, _slot: usize, _tid: usize) {}

    #[inline]
    pub fn retire(&self, _p: *mut S, _tid: usize) {}
}

#[cfg(all(test, feature = "hazard"))]
mod tests {
    use super::*;

    #[test]
    fn protect_returns_stable_value() {
        let hp = HazardRegistry::<u64>::new(2, 4);
        let target = Box::into_raw(Box::new(7u64));
        let src = AtomicPtr::new(target);
        let got = hp.protect(0, &src, 0);
        assert_eq!(got, target);
        assert_eq!(hp.slots[0][0].load(Ordering::SeqCst), target);
        hp.clear(0);
        assert!(hp.slots[0][0].load(Ordering::SeqCst).is_null());
        unsafe { drop(Box::from_raw(target)) };
    }

    #[test]
    fn retire_defers_while_protected() {
        let hp = HazardRegistry::<u64>::new(2, 4);
        let obj = Box::into_raw(Box::new(1u64));
        hp.protect_ptr(1, obj, 2);
        hp.retire(obj, 0);
        // still parked: thread 2 holds it
        let list = unsafe { &*hp.retired[0].get() };
        assert_eq!(list.len(), 1);
        hp.clear_slot(1, 2);
        hp.retire(ptr::null_mut(), 0);
        let list = unsafe { &*hp.retired[0].get() };
        assert!(list.is_empty());
    }

    #[test]
    fn drop_frees_leftovers() {
        let hp = HazardRegistry::<u64>::new(2, 4);
        let obj = Box::into_raw(Box::new(3u64));
        hp.protect_ptr(0, obj, 1);
        hp.retire(obj, 1);
        // dropped while still "protected": the destructor frees it
        drop(hp);
    }

    #[test]
    #[should_panic]
    fn rejects_oversized_thread_count() {
        let _ = HazardRegistry::<u64>::new(2, MAX_THREADS + 1);
    }
}
