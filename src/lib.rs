//! Lock-free concurrent data structures built on a hazard-pointer memory
//! reclamation engine.
//!
//! - **Memory reclamation**. Safe reuse of memory unlinked from a concurrent
//! structure while another thread may still hold a reference to it is the
//! hard part of any lock-free design. That problem is factored out into the
//! sibling [`hazard`] crate (re-exported here), which every data structure
//! in this crate builds on: threads [`hazard::attach_thread`] before
//! touching a structure, protect a pointer with a [`hazard::Guard`] before
//! dereferencing it, and [`hazard::retire`] it instead of freeing it
//! directly once unlinked.
//!
//! - **Non-blocking data structures**. A Treiber [`stack::Stack`] with an
//! optional elimination back-off path for high-contention push/pop
//! pairing, and a lock-free [`hamt::Hamt`] hash trie. Both are built for
//! highly-concurrent access, superior under contention to wrapping the
//! equivalent structure in a `Mutex`.
//!
//! - **Back-off strategies**. Shared by the stack's CAS-retry loop, the
//! elimination path, and the Hamt's restart-on-interference loop, in the
//! [`backoff`] module.

#![deny(missing_docs)]

pub mod backoff;
mod cache_padded;
pub mod hamt;
pub mod stack;

pub use self::cache_padded::CachePadded;

/// The hazard-pointer reclamation engine every structure in this crate is
/// built on; re-exported so callers don't need a separate `hazard` entry in
/// their own `Cargo.toml`.
pub use hazard;
