//! The elimination back-off path used by [`super::Stack`] on CAS contention
//! (spec §4.3): colliding push/pop pairs exchange a value directly through a
//! small array of rendezvous slots, bypassing `top` entirely.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

use rand::Rng;

use crate::backoff::{Backoff, PredicateBackoff, Spin};

/// How many times a thread spins attempting to acquire a slot's lock before
/// giving up on elimination for this attempt and falling back to the CAS
/// loop on `top`.
const LOCK_SPIN_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Push,
    Pop,
}

const FREE: u8 = 0;
const BUSY: u8 = 1;
const COLLIDED: u8 = 2;

/// A published push or pop awaiting a collision partner.
///
/// Lives on the publishing thread's stack for the duration of the call —
/// the thread that installs an `OpRecord` does not return until either a
/// partner collides with it or it times out and removes the record, so the
/// pointer other threads read through `EliminationSlot::record` stays valid
/// for as long as it is reachable.
struct OpRecord<T> {
    kind: OpKind,
    /// For a `Push`, the value being offered. For a `Pop`, null until a
    /// colliding push fills it in.
    value: AtomicPtr<T>,
    status: AtomicU8,
}

impl<T> OpRecord<T> {
    fn new(kind: OpKind, value: *mut T) -> Self {
        OpRecord {
            kind,
            value: AtomicPtr::new(value),
            status: AtomicU8::new(BUSY),
        }
    }
}

/// One rendezvous point. Access to `record` is serialized by `lock`, a
/// tiny spinlock rather than a kernel mutex — critical sections here are a
/// handful of loads and stores.
struct EliminationSlot<T> {
    lock: AtomicBool,
    record: AtomicPtr<OpRecord<T>>,
}

impl<T> EliminationSlot<T> {
    fn new() -> Self {
        EliminationSlot {
            lock: AtomicBool::new(false),
            record: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

/// Outcome of an elimination attempt. `active` distinguishes the thread
/// that found a waiting partner and completed the rendezvous immediately
/// from the one that published its own record and was collided with.
pub struct Eliminated<T> {
    pub value: T,
    pub active: bool,
}

pub enum PushOutcome<T> {
    Eliminated { active: bool },
    TimedOut(T),
}

pub enum PopOutcome<T> {
    Eliminated(Eliminated<T>),
    TimedOut,
}

/// A fixed-size array of elimination slots, one per `Stack`.
pub struct EliminationArray<T> {
    slots: Vec<EliminationSlot<T>>,
}

impl<T> EliminationArray<T> {
    pub fn new(slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, EliminationSlot::new);
        EliminationArray { slots }
    }

    fn random_slot(&self) -> &EliminationSlot<T> {
        let idx = rand::thread_rng().gen_range(0..self.slots.len());
        &self.slots[idx]
    }

    fn try_lock_slot(&self) -> Option<&EliminationSlot<T>> {
        let slot = self.random_slot();
        let mut spin = Spin;
        for _ in 0..LOCK_SPIN_ATTEMPTS {
            if slot.try_lock() {
                return Some(slot);
            }
            spin.wait();
        }
        None
    }

    /// Attempts to pair `value` with a waiting pop. On timeout, hands the
    /// value back to the caller so it can retry the CAS loop on `top`.
    pub fn try_push(&self, value: T, wait: &mut PredicateBackoff) -> PushOutcome<T> {
        let slot = match self.try_lock_slot() {
            Some(slot) => slot,
            None => return PushOutcome::TimedOut(value),
        };

        let existing = slot.record.load(Ordering::Acquire);
        // SAFETY: a non-null `record` always points at a live `OpRecord` on
        // some other thread's stack frame, which has not returned yet
        // (see the type-level safety note on `OpRecord`).
        if !existing.is_null() && unsafe { (*existing).kind } == OpKind::Pop {
            let waiting_pop = unsafe { &*existing };
            let boxed = Box::into_raw(Box::new(value));
            waiting_pop.value.store(boxed, Ordering::Release);
            waiting_pop.status.store(COLLIDED, Ordering::Release);
            slot.record.store(std::ptr::null_mut(), Ordering::Release);
            slot.unlock();
            return PushOutcome::Eliminated { active: true };
        }

        let boxed_value = Box::into_raw(Box::new(value));
        let record = OpRecord::new(OpKind::Push, boxed_value);
        let record_ptr = &record as *const OpRecord<T> as *mut OpRecord<T>;
        slot.record.store(record_ptr, Ordering::Release);
        slot.unlock();

        let collided = wait.wait(|| record.status.load(Ordering::Acquire) == COLLIDED);

        if collided {
            // The colliding pop already consumed `boxed_value`; nothing
            // left for us to free.
            return PushOutcome::Eliminated { active: false };
        }

        // Timed out: remove our own record if it is still the one published
        // (a late collision could have beaten us to it).
        while !slot.try_lock() {
            std::hint::spin_loop();
        }
        let still_ours = slot.record.load(Ordering::Acquire) == record_ptr;
        if still_ours {
            slot.record.store(std::ptr::null_mut(), Ordering::Relaxed);
        }
        slot.unlock();

        if record.status.load(Ordering::Acquire) == COLLIDED {
            PushOutcome::Eliminated { active: false }
        } else {
            // SAFETY: never published to anyone but this record, and the
            // record was removed from the slot above, so `boxed_value` is
            // exclusively ours again.
            let value = unsafe { *Box::from_raw(boxed_value) };
            PushOutcome::TimedOut(value)
        }
    }

    /// Attempts to pair with a waiting push. On timeout, returns
    /// `PopOutcome::TimedOut` so the caller can retry the CAS loop.
    pub fn try_pop(&self, wait: &mut PredicateBackoff) -> PopOutcome<T> {
        let slot = match self.try_lock_slot() {
            Some(slot) => slot,
            None => return PopOutcome::TimedOut,
        };

        let existing = slot.record.load(Ordering::Acquire);
        if !existing.is_null() && unsafe { (*existing).kind } == OpKind::Push {
            let waiting_push = unsafe { &*existing };
            let boxed = waiting_push.value.swap(std::ptr::null_mut(), Ordering::AcqRel);
            waiting_push.status.store(COLLIDED, Ordering::Release);
            slot.record.store(std::ptr::null_mut(), Ordering::Release);
            slot.unlock();
            // SAFETY: `boxed` was produced by `Box::into_raw` in `try_push`
            // and has not been read by anyone else.
            let value = unsafe { *Box::from_raw(boxed) };
            return PopOutcome::Eliminated(Eliminated { value, active: true });
        }

        let record = OpRecord::new(OpKind::Pop, std::ptr::null_mut());
        let record_ptr = &record as *const OpRecord<T> as *mut OpRecord<T>;
        slot.record.store(record_ptr, Ordering::Release);
        slot.unlock();

        let collided = wait.wait(|| record.status.load(Ordering::Acquire) == COLLIDED);

        if collided {
            let boxed = record.value.load(Ordering::Acquire);
            debug_assert!(!boxed.is_null());
            // SAFETY: the colliding push stored exactly this pointer via
            // `Box::into_raw` and will not touch it again.
            let value = unsafe { *Box::from_raw(boxed) };
            return PopOutcome::Eliminated(Eliminated { value, active: false });
        }

        while !slot.try_lock() {
            std::hint::spin_loop();
        }
        let still_ours = slot.record.load(Ordering::Acquire) == record_ptr;
        if still_ours {
            slot.record.store(std::ptr::null_mut(), Ordering::Relaxed);
        }
        slot.unlock();

        if record.status.load(Ordering::Acquire) == COLLIDED {
            let boxed = record.value.load(Ordering::Acquire);
            let value = unsafe { *Box::from_raw(boxed) };
            PopOutcome::Eliminated(Eliminated { value, active: false })
        } else {
            PopOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn budget() -> PredicateBackoff {
        PredicateBackoff::new(2000)
    }

    #[test]
    fn push_and_pop_collide() {
        let array = Arc::new(EliminationArray::<u32>::new(4));

        let a = Arc::clone(&array);
        let pusher = thread::spawn(move || loop {
            match a.try_push(7, &mut budget()) {
                PushOutcome::Eliminated { .. } => return,
                PushOutcome::TimedOut(_) => continue,
            }
        });

        let b = Arc::clone(&array);
        let popper = thread::spawn(move || loop {
            match b.try_pop(&mut budget()) {
                PopOutcome::Eliminated(e) => return e.value,
                PopOutcome::TimedOut => continue,
            }
        });

        pusher.join().unwrap();
        let popped = popper.join().unwrap();
        assert_eq!(popped, 7);
    }

    #[test]
    fn lone_pop_times_out() {
        let array = EliminationArray::<u32>::new(1);
        match array.try_pop(&mut PredicateBackoff::new(4)) {
            PopOutcome::TimedOut => {}
            PopOutcome::Eliminated(_) => panic!("no partner was present"),
        }
    }
}
