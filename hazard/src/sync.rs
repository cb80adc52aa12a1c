//! Indirection over `std::sync::atomic` vs. `loom::sync::atomic`.
//!
//! Every other module in this crate imports its atomics from here instead of
//! from `std` directly, so that `cargo test --features loom` can run the
//! registry/scan interleavings through loom's model checker. Mirrors the
//! `cfg(loom)` split used by `yunyi1201/HazardPtr` and `Lol3rrr/nolock`.

cfg_if::cfg_if! {
    if #[cfg(feature = "loom")] {
        pub use loom::sync::atomic::{AtomicPtr, AtomicUsize, AtomicU8, AtomicBool, Ordering};
        pub use loom::thread;

        /// Spawns a closure to run once, for loom's deterministic scheduler.
        pub fn spin_loop_hint() {
            loom::hint::spin_loop();
        }
    } else {
        pub use std::sync::atomic::{AtomicPtr, AtomicUsize, AtomicU8, AtomicBool, Ordering};
        pub use std::thread;

        /// A single CPU pause hint.
        pub fn spin_loop_hint() {
            std::hint::spin_loop();
        }
    }
}
