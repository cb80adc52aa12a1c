//! Per-thread state: a fixed guard array plus a bounded retired-pointer bag.

use std::cell::UnsafeCell;

use crate::hazard_cell::Hazard;
use crate::retired::RetiredBag;
use crate::sync::{AtomicPtr, AtomicU8, Ordering};

/// Hard upper bound on guards per thread. `Config::hazards_per_thread` must
/// not exceed this; `registry::init` panics if it does. Fixed-size rather
/// than a `Vec<Hazard>` so that every `ThreadRecord` can be leaked as a
/// `'static` reference into the registry's intrusive list without any
/// per-record heap allocation beyond the single boxed record itself.
pub const MAX_HAZARDS: usize = 32;

const FREE: u8 = 0;
const OWNED: u8 = 1;
/// A free record currently being drained by another thread's `help_scan`.
/// Excluded from `attach_thread`'s search until it flips back to `FREE`.
const CLAIMED: u8 = 2;

/// Per-thread record in the hazard-pointer registry (spec §3.1).
///
/// `ThreadRecord`s are allocated once, leaked for the life of the process,
/// and recycled across threads via the `state` flag: `attach_thread` claims
/// a `FREE` record (or allocates a new one), `detach_thread` drains its
/// retired bag into another live thread and marks it `FREE` again.
pub struct ThreadRecord {
    guards: [Hazard; MAX_HAZARDS],
    hazards_per_thread: usize,
    retired: UnsafeCell<RetiredBag>,
    state: AtomicU8,
    next: AtomicPtr<ThreadRecord>,
}

// SAFETY: `retired` is only ever accessed by the thread that holds the
// record in `OWNED` state, or by a single helper thread that has
// successfully CAS'd the state from `FREE` to `CLAIMED` (see
// `try_claim_free`/`release_claim`). These two cases are mutually
// exclusive by construction, so `&UnsafeCell<RetiredBag>` access never
// races.
unsafe impl Sync for ThreadRecord {}

impl ThreadRecord {
    pub fn new(hazards_per_thread: usize, retired_capacity: usize) -> Self {
        assert!(
            hazards_per_thread <= MAX_HAZARDS,
            "hazards_per_thread ({hazards_per_thread}) exceeds MAX_HAZARDS ({MAX_HAZARDS})"
        );
        ThreadRecord {
            guards: Default::default(),
            hazards_per_thread,
            retired: UnsafeCell::new(RetiredBag::with_capacity(retired_capacity)),
            state: AtomicU8::new(OWNED),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub fn hazards_per_thread(&self) -> usize {
        self.hazards_per_thread
    }

    pub fn guard_slot(&self, index: usize) -> &Hazard {
        &self.guards[index]
    }

    pub fn guards(&self) -> &[Hazard] {
        &self.guards[..self.hazards_per_thread]
    }

    pub fn next(&self) -> &AtomicPtr<ThreadRecord> {
        &self.next
    }

    pub fn is_owned(&self) -> bool {
        self.state.load(Ordering::Acquire) == OWNED
    }

    /// Attempts to claim this record for a newly attaching thread.
    pub fn try_claim_free(&self) -> bool {
        self.state
            .compare_exchange(FREE, OWNED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Attempts to claim this *free* record for a help-scan drain, distinct
    /// from a normal attach so the two never race on the same record.
    pub fn try_claim_for_help_scan(&self) -> bool {
        self.state
            .compare_exchange(FREE, CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release_help_scan_claim(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    /// Marks the record free, clearing every guard first so a later owner
    /// starts from a clean slate.
    pub fn release_to_free(&self) {
        for hazard in &self.guards {
            hazard.check_in(Ordering::Release);
        }
        self.state.store(FREE, Ordering::Release);
    }

    /// # Safety
    /// Caller must hold the record in `OWNED` state (i.e. be the thread that
    /// owns it) or have won `try_claim_for_help_scan`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn retired_mut(&self) -> &mut RetiredBag {
        &mut *self.retired.get()
    }
}
