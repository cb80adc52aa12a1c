//! A lock-free Treiber stack with an optional elimination back-off path
//! (spec §3.2, §4.3).

mod elimination;

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::backoff::{Backoff, Exponential, PredicateBackoff};
use crate::cache_padded::CachePadded;
use elimination::{EliminationArray, PopOutcome, PushOutcome};

/// Slots a waiting elimination attempt spins through before giving up and
/// falling back to the CAS loop on `top`.
const ELIMINATION_WAIT_BUDGET: usize = 32;

struct StackNode<T> {
    value: ManuallyDrop<T>,
    next: AtomicPtr<StackNode<T>>,
}

impl<T> StackNode<T> {
    fn new(value: T) -> Self {
        StackNode {
            value: ManuallyDrop::new(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Push/pop/contention counters, kept best-effort (spec §4.3 — "optional
/// statistics").
#[derive(Default, Debug)]
pub struct Stat {
    pushes: AtomicU64,
    pops: AtomicU64,
    races: AtomicU64,
    eliminations_active: AtomicU64,
    eliminations_passive: AtomicU64,
}

impl Stat {
    fn record_push(&self) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
    }
    fn record_pop(&self) {
        self.pops.fetch_add(1, Ordering::Relaxed);
    }
    fn record_race(&self) {
        self.races.fetch_add(1, Ordering::Relaxed);
    }
    fn record_elimination(&self, active: bool) {
        if active {
            self.eliminations_active.fetch_add(1, Ordering::Relaxed);
        } else {
            self.eliminations_passive.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total successful pushes.
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::Relaxed)
    }
    /// Total successful pops (empty-stack misses are not counted).
    pub fn pops(&self) -> u64 {
        self.pops.load(Ordering::Relaxed)
    }
    /// Total CAS failures on `top` across both push and pop.
    pub fn races(&self) -> u64 {
        self.races.load(Ordering::Relaxed)
    }
    /// Total operations completed via the elimination array instead of a
    /// successful CAS on `top`.
    pub fn eliminations(&self) -> u64 {
        self.eliminations_active.load(Ordering::Relaxed)
            + self.eliminations_passive.load(Ordering::Relaxed)
    }
}

/// A lock-free last-in-first-out stack.
///
/// `push` never fails. `pop` returns `None` on an empty stack. Under
/// contention, both operations may hand off to an [`elimination`] array
/// instead of retrying the CAS on `top`, if one was configured via
/// [`Stack::with_elimination`].
pub struct Stack<T> {
    top: CachePadded<AtomicPtr<StackNode<T>>>,
    stat: Stat,
    elimination: Option<EliminationArray<T>>,
}

// SAFETY: a `StackNode<T>` is only ever reached through `top` or a retired
// pointer, both of which require `T: Send` to cross threads safely, matching
// every other lock-free container in this crate.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    /// Builds a stack with elimination disabled.
    pub fn new() -> Self {
        Stack {
            top: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            stat: Stat::default(),
            elimination: None,
        }
    }

    /// Builds a stack whose push/pop contention path may eliminate through
    /// `slot_count` rendezvous slots. `slot_count == 0` behaves identically
    /// to [`Stack::new`].
    pub fn with_elimination(slot_count: usize) -> Self {
        Stack {
            top: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            stat: Stat::default(),
            elimination: if slot_count == 0 {
                None
            } else {
                Some(EliminationArray::new(slot_count))
            },
        }
    }

    /// Statistics accumulated since construction.
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    /// Whether the stack currently has no elements. Racy under concurrent
    /// mutation — a best-effort snapshot, not a linearizable query.
    pub fn is_empty(&self) -> bool {
        self.top.load(Ordering::Acquire).is_null()
    }

    /// Pushes `value` onto the stack. Never fails.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(StackNode::new(value)));
        let mut backoff = Exponential::default();

        loop {
            let top = self.top.load(Ordering::Acquire);
            // SAFETY: `node` is exclusively ours until the CAS below
            // publishes it.
            unsafe { (*node).next.store(top, Ordering::Relaxed) };

            match self
                .top
                .compare_exchange_weak(top, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    self.stat.record_push();
                    return;
                }
                Err(_) => {
                    self.stat.record_race();
                    backoff.wait();
                    if let Some(array) = &self.elimination {
                        // SAFETY: the CAS above failed, so `node` was never
                        // published; we still exclusively own it.
                        let value = unsafe { ManuallyDrop::take(&mut (*node).value) };
                        let mut wait = PredicateBackoff::new(ELIMINATION_WAIT_BUDGET);
                        match array.try_push(value, &mut wait) {
                            PushOutcome::Eliminated { active } => {
                                self.stat.record_elimination(active);
                                // SAFETY: the node shell was never published
                                // and its value was already moved out above.
                                unsafe { drop(Box::from_raw(node)) };
                                return;
                            }
                            PushOutcome::TimedOut(value) => {
                                // SAFETY: reclaims the shell we just emptied.
                                unsafe {
                                    ptr::write(&mut (*node).value, ManuallyDrop::new(value))
                                };
                            }
                        }
                    }
                }
            }
        }
    }

    /// Removes and returns the top value, or `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let mut guard = hazard::acquire_guard()
            .expect("Stack::pop requires the calling thread to call hazard::attach_thread first");
        let mut backoff = Exponential::default();

        loop {
            let top = guard.protect(&self.top);
            if top.is_null() {
                return None;
            }

            // SAFETY: `top` is protected by `guard` until cleared or
            // reassigned, so it cannot be concurrently freed.
            let next = unsafe { (*top).next.load(Ordering::Acquire) };

            match self
                .top
                .compare_exchange_weak(top, next, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    // SAFETY: this thread's successful CAS is the
                    // linearization point that makes `top` exclusively
                    // ours to unlink.
                    let value = unsafe { ManuallyDrop::take(&mut (*top).value) };
                    guard.clear();
                    // SAFETY: `top` was just unlinked and will not be
                    // reachable from `self.top` again.
                    unsafe { hazard::retire(top) };
                    self.stat.record_pop();
                    return Some(value);
                }
                Err(_) => {
                    self.stat.record_race();
                    backoff.wait();
                    if let Some(array) = &self.elimination {
                        let mut wait = PredicateBackoff::new(ELIMINATION_WAIT_BUDGET);
                        match array.try_pop(&mut wait) {
                            PopOutcome::Eliminated(elim) => {
                                self.stat.record_elimination(elim.active);
                                return Some(elim.value);
                            }
                            PopOutcome::TimedOut => {}
                        }
                    }
                }
            }
        }
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        // `&mut self` guarantees no other thread holds a reference, so this
        // walks the list directly rather than routing through the SMR
        // engine (mirrors the Hamt's teardown, spec §9 open question).
        let mut cur = *self.top.get_mut();
        while !cur.is_null() {
            // SAFETY: exclusive access per `&mut self`.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
            unsafe { ManuallyDrop::drop(&mut node.value) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn with_attached<R>(f: impl FnOnce() -> R) -> R {
        hazard::attach_thread();
        let r = f();
        hazard::detach_thread();
        r
    }

    #[test]
    fn single_thread_lifo() {
        with_attached(|| {
            let stack = Stack::new();
            assert!(stack.is_empty());
            stack.push(1);
            stack.push(2);
            stack.push(3);
            assert_eq!(stack.pop(), Some(3));
            assert_eq!(stack.pop(), Some(2));
            assert_eq!(stack.pop(), Some(1));
            assert_eq!(stack.pop(), None);
            assert!(stack.is_empty());
        });
    }

    #[test]
    fn concurrent_push_pop_preserves_multiset() {
        const THREADS: usize = 8;
        const PER_THREAD: u32 = 2_000;

        let stack = Arc::new(Stack::with_elimination(4));
        let mut handles = Vec::new();

        for t in 0..THREADS {
            let stack = Arc::clone(&stack);
            handles.push(thread::spawn(move || {
                hazard::attach_thread();
                let base = t as u32 * PER_THREAD;
                let mut popped = Vec::new();
                for i in 0..PER_THREAD {
                    stack.push(base + i);
                    if let Some(v) = stack.pop() {
                        popped.push(v);
                    }
                }
                hazard::detach_thread();
                popped
            }));
        }

        let mut all_popped = HashSet::new();
        for h in handles {
            for v in h.join().unwrap() {
                all_popped.insert(v);
            }
        }

        hazard::attach_thread();
        let mut remaining = HashSet::new();
        while let Some(v) = stack.pop() {
            remaining.insert(v);
        }
        hazard::detach_thread();

        let total: HashSet<u32> = all_popped.union(&remaining).copied().collect();
        assert_eq!(total.len(), THREADS * PER_THREAD as usize);
        assert!(all_popped.is_disjoint(&remaining));
    }
}
