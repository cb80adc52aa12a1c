//! Guard handles: the public face of a hazard cell.

use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::HazardError;
use crate::hazard_cell::Hazard;
use crate::registry;
use crate::sync::{AtomicPtr, Ordering};

/// A handle to one hazard cell, scoped to the lifetime of this value.
///
/// Dropping a `Guard` clears its cell and returns it to the owning thread's
/// free-guard pool. A guard may only be written by the thread that acquired
/// it (enforced here by `Guard` being `!Send`), though its stored value may
/// be *read* by any thread running `scan()`.
pub struct Guard {
    hazard: &'static Hazard,
    // `Hazard` is `Sync` but a `Guard` must not be moved to another thread,
    // since the owning `ThreadRecord`'s free-pool bookkeeping is per-thread.
    _not_send: PhantomData<*const ()>,
}

impl Guard {
    /// Wraps an already-checked-out hazard cell. Callers go through
    /// `registry::acquire_guards`, which performs the check-out.
    pub(crate) fn new(hazard: &'static Hazard) -> Self {
        Guard {
            hazard,
            _not_send: PhantomData,
        }
    }

    /// The publication primitive (spec §4.1): reads `src`, stores it in this
    /// guard, re-reads `src`, and repeats until the two reads agree. Once
    /// this returns, the returned pointer cannot be freed by any thread's
    /// `scan()` until the guard is cleared, reassigned, or dropped.
    pub fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        loop {
            let first = src.load(Ordering::Acquire);
            self.assign(first);
            let second = src.load(Ordering::Acquire);
            if first == second {
                return first;
            }
        }
    }

    /// Stores a raw pointer already in hand as this guard's protected value.
    pub fn assign<T>(&mut self, ptr: *mut T) {
        match NonNull::new(ptr) {
            Some(nn) => self.hazard.set_protected(nn.cast()),
            None => self.hazard.set_free(Ordering::SeqCst),
        }
    }

    /// Returns the pointer currently held by this guard, or null.
    pub fn get<T>(&self) -> *mut T {
        self.hazard
            .protected(Ordering::Relaxed)
            .map(|p| p.address() as *mut T)
            .unwrap_or(std::ptr::null_mut())
    }

    /// Stores null, releasing whatever this guard was protecting (without
    /// returning the cell to the free pool — it stays reserved for reuse
    /// within the same scope).
    pub fn clear(&mut self) {
        self.hazard.set_free(Ordering::SeqCst);
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.hazard.check_in(Ordering::Release);
    }
}

/// A scoped batch of `N` guards drawn from the calling thread's pool,
/// acquired atomically (all or none).
pub struct GuardArray<const N: usize> {
    guards: Vec<Guard>,
}

impl<const N: usize> GuardArray<N> {
    pub fn acquire() -> Result<Self, HazardError> {
        let guards = registry::acquire_guards(N)?;
        Ok(GuardArray { guards })
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Guard {
        &mut self.guards[index]
    }
}

/// Acquires a single guard from the calling thread's pool.
pub fn acquire_guard() -> Result<Guard, HazardError> {
    registry::acquire_guards(1).map(|mut v| v.pop().unwrap())
}
