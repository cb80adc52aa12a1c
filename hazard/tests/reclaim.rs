//! Integration tests for the public reclamation API: protect-then-free
//! across threads, and the `GuardExhausted` contract violation.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread;

use hazard::{Guard, HazardError};

struct Node {
    value: u32,
}

#[test]
fn protect_survives_concurrent_retire() {
    hazard::attach_thread();

    let node = Box::into_raw(Box::new(Node { value: 42 }));
    let shared = Arc::new(AtomicPtr::new(node));

    let mut guard = hazard::acquire_guard().unwrap();
    let protected = guard.protect(&shared);
    assert_eq!(unsafe { (*protected).value }, 42);

    // A concurrent thread unlinks and retires the same node while our guard
    // still protects it.
    let shared2 = Arc::clone(&shared);
    let unlinker = thread::spawn(move || {
        hazard::attach_thread();
        let current = shared2.load(Ordering::Acquire);
        if shared2
            .compare_exchange(
                current,
                std::ptr::null_mut(),
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            unsafe { hazard::retire(current) };
        }
        hazard::scan();
        hazard::detach_thread();
    });
    unlinker.join().unwrap();

    // `scan()` on the unlinker's side must not have freed the node: our
    // guard is still live and published.
    assert_eq!(unsafe { (*protected).value }, 42);

    guard.clear();
    drop(guard);
    hazard::scan();
    hazard::detach_thread();
}

#[test]
fn guard_exhausted_once_per_thread_budget_is_spent() {
    hazard::attach_thread();

    // Default config budgets 8 guards per thread; the 9th acquisition on
    // this thread must fail rather than corrupt bookkeeping.
    let mut guards: Vec<Guard> = Vec::new();
    let mut exhausted = false;
    for _ in 0..64 {
        match hazard::acquire_guard() {
            Ok(g) => guards.push(g),
            Err(HazardError::GuardExhausted) => {
                exhausted = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(exhausted, "expected GuardExhausted once the per-thread budget is spent");

    drop(guards);
    hazard::detach_thread();
}

#[test]
fn not_attached_is_reported_not_panicked() {
    // This thread never calls `attach_thread`.
    assert_eq!(hazard::acquire_guard().unwrap_err(), HazardError::NotAttached);
}
