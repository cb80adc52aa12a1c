//! A hazard-pointer based safe memory reclamation (SMR) engine.
//!
//! This crate lets lock-free data structures unlink nodes from shared
//! memory while other threads may still hold references to them, and free
//! those nodes only once every thread has relinquished its reference.
//!
//! The scheme: a thread that is about to dereference a shared pointer first
//! *protects* it by storing it into one of its [`Guard`]s (see
//! [`Guard::protect`]). A thread that unlinks a node calls [`retire`]
//! instead of freeing it directly; [`scan`] later walks every other
//! thread's guards and frees whatever nothing still protects.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicPtr, Ordering};
//! use hazard::{self, Guard};
//!
//! struct Node { value: u32, next: AtomicPtr<Node> }
//!
//! hazard::attach_thread();
//!
//! let node = Box::into_raw(Box::new(Node { value: 1, next: AtomicPtr::new(std::ptr::null_mut()) }));
//! let shared = AtomicPtr::new(node);
//!
//! let mut guard = hazard::acquire_guard().unwrap();
//! let protected = guard.protect(&shared);
//! assert_eq!(unsafe { (*protected).value }, 1);
//!
//! if shared.compare_exchange(protected, std::ptr::null_mut(), Ordering::Release, Ordering::Relaxed).is_ok() {
//!     unsafe { hazard::retire(protected) };
//! }
//! drop(guard);
//! hazard::scan();
//! ```

mod config;
mod error;
mod guard;
mod hazard_cell;
mod registry;
mod retired;
mod scan;
mod sync;
mod thread_record;

pub use config::Config;
pub use error::HazardError;
pub use guard::{acquire_guard, Guard, GuardArray};

/// Initializes the process-wide registry with the given configuration. The
/// first call wins; subsequent calls are no-ops. If never called explicitly,
/// the registry lazily initializes with [`Config::default`] on first use.
pub fn init(config: Config) {
    registry::init(config);
}

/// Tears down the registry. Only safe once every attached thread has
/// detached (checked with `debug_assert!` in debug builds).
pub fn shutdown() {
    registry::shutdown();
}

/// Binds the calling thread to a `ThreadRecord`. Idempotent; container
/// operations on an unattached thread return [`HazardError::NotAttached`]
/// (or are a contract violation per spec §7, at the caller's discretion).
pub fn attach_thread() {
    registry::attach_thread();
}

/// Unbinds the calling thread, scanning first so as much of its retired
/// list as possible is reclaimed immediately.
pub fn detach_thread() {
    registry::detach_thread();
}

/// Retires a pointer obtained from `Box::into_raw`, scheduling it for
/// disposal once no guard anywhere still protects it.
///
/// # Safety
///
/// `ptr` must have been allocated via `Box::into_raw::<T>` and must not be
/// retired more than once, and must not be dereferenced by the caller after
/// this call (only guards taken out *before* the corresponding CAS may still
/// read through it, per the publication protocol in [`Guard::protect`]).
pub unsafe fn retire<T>(ptr: *mut T) {
    let entry = retired::RetiredPtr::new(ptr);
    // A retire from an unattached thread is a contract violation (spec §7):
    // there is nowhere to put the entry. Fatal in release builds.
    registry::retire(entry).expect("hazard::retire called from an unattached thread");
}

/// Runs one reclamation pass: snapshots every guarded pointer across all
/// threads, frees whatever in the caller's retired list is unguarded, and
/// helps drain any detached thread's leftover retired list.
pub fn scan() {
    registry::scan();
}

/// Test/teardown helper: blocks until every *free* (detached) thread
/// record's retired list has been disposed. See [`HazardError`] docs and
/// the module-level notes in `registry` for why this cannot reach into a
/// still-attached thread's own bag.
pub fn force_reclaim() {
    registry::force_reclaim();
}
