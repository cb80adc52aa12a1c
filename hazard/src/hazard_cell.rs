//! A single hazard cell: one slot in a thread's guard array.

use std::ptr::NonNull;

use crate::sync::{AtomicBool, AtomicUsize, Ordering};

const FREE: usize = 0;

/// A pointer protected from reclamation because some hazard cell currently
/// holds it.
///
/// Type information is stripped deliberately: `scan()` only ever needs to
/// compare addresses, never to dereference through a `Protected` value.
/// Grounded on `oliver-giersch/hazptr`'s `Protected` wrapper.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Protected(usize);

impl Protected {
    /// The raw address being protected.
    pub fn address(self) -> usize {
        self.0
    }
}

/// One hazard slot: an atomic cell holding either `FREE` or a protected
/// address, plus a separate `checked_out` flag tracking whether some
/// `Guard` currently owns the slot.
///
/// `protected` is written only by the owning thread but read (with
/// `Acquire`/`SeqCst`) by any thread running `scan()`. This is the "guard"
/// of spec §3.1.
#[derive(Debug)]
pub struct Hazard {
    protected: AtomicUsize,
    checked_out: AtomicBool,
}

impl Default for Hazard {
    fn default() -> Self {
        Hazard::new()
    }
}

impl Hazard {
    /// Creates a hazard cell in the free, unprotected state.
    pub const fn new() -> Self {
        Hazard {
            protected: AtomicUsize::new(FREE),
            checked_out: AtomicBool::new(false),
        }
    }

    /// Claims this cell for a new `Guard`, if it is not already checked out.
    #[inline]
    pub fn try_check_out(&self) -> bool {
        self.checked_out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases this cell back to the thread's free-guard pool. Clears the
    /// protected value first so the cell is safe to reuse.
    #[inline]
    pub fn check_in(&self, order: Ordering) {
        self.protected.store(FREE, order);
        self.checked_out.store(false, Ordering::Release);
    }

    /// Marks the cell unused without touching the checked-out flag (used
    /// when the whole `ThreadRecord` is released back to the free pool, so
    /// every guard it ever handed out is implicitly revoked).
    #[inline]
    pub fn set_free(&self, order: Ordering) {
        self.protected.store(FREE, order);
    }

    /// Stores a pointer as actively protected.
    ///
    /// Uses `SeqCst` unconditionally: the publication protocol in
    /// `Guard::protect` relies on this store being totally ordered with
    /// respect to the data structure's own pointer loads, which is the
    /// fence the spec's memory-ordering section calls for.
    #[inline]
    pub fn set_protected(&self, ptr: NonNull<()>) {
        self.protected.store(ptr.as_ptr() as usize, Ordering::SeqCst);
    }

    /// Returns the currently protected address, if any.
    #[inline]
    pub fn protected(&self, order: Ordering) -> Option<Protected> {
        match self.protected.load(order) {
            FREE => None,
            addr => Some(Protected(addr)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    #[test]
    fn free_then_protect() {
        let h = Hazard::new();
        assert_eq!(h.protected(Ordering::Relaxed), None);

        let x = 1usize;
        let ptr = NonNull::from(&x).cast::<()>();
        h.set_protected(ptr);
        assert_eq!(
            h.protected(Ordering::Relaxed).unwrap().address(),
            ptr.as_ptr() as usize
        );

        h.set_free(Ordering::Relaxed);
        assert_eq!(h.protected(Ordering::Relaxed), None);
    }

    #[test]
    fn check_out_is_exclusive() {
        let h = Hazard::new();
        assert!(h.try_check_out());
        assert!(!h.try_check_out());
        h.check_in(Ordering::Relaxed);
        assert!(h.try_check_out());
    }
}
