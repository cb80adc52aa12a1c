//! Integration tests for the Treiber stack, including its elimination path
//! under heavy contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lockfree::stack::Stack;

fn with_attached<R>(f: impl FnOnce() -> R) -> R {
    hazard::attach_thread();
    let r = f();
    hazard::detach_thread();
    r
}

#[test]
fn empty_stack_pops_none() {
    with_attached(|| {
        let stack: Stack<u32> = Stack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.pop(), None);
    });
}

#[test]
fn high_contention_push_pop_never_loses_or_duplicates_a_value() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 4_000;

    // A small elimination array maximizes the chance two threads collide on
    // the same slot, exercising the rendezvous path rather than only the
    // bare CAS loop.
    let stack = Arc::new(Stack::with_elimination(2));
    let produced = Arc::new(AtomicUsize::new(0));
    let consumed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let stack = Arc::clone(&stack);
        let produced = Arc::clone(&produced);
        let consumed = Arc::clone(&consumed);
        handles.push(thread::spawn(move || {
            hazard::attach_thread();
            for _ in 0..PER_THREAD {
                stack.push(1u32);
                produced.fetch_add(1, Ordering::Relaxed);
                if let Some(v) = stack.pop() {
                    assert_eq!(v, 1);
                    consumed.fetch_add(1, Ordering::Relaxed);
                }
            }
            hazard::detach_thread();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    hazard::attach_thread();
    let mut remaining = 0;
    while stack.pop().is_some() {
        remaining += 1;
    }
    hazard::detach_thread();

    assert_eq!(
        consumed.load(Ordering::Relaxed) + remaining,
        produced.load(Ordering::Relaxed)
    );
    assert!(stack.stat().pushes() >= (THREADS * PER_THREAD) as u64);
}

#[test]
fn stat_counts_match_operations() {
    with_attached(|| {
        let stack = Stack::new();
        for i in 0..10u32 {
            stack.push(i);
        }
        for _ in 0..10 {
            stack.pop();
        }
        assert_eq!(stack.stat().pushes(), 10);
        assert_eq!(stack.stat().pops(), 10);
    });
}
