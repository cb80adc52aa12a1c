//! Integration tests for the Hamt, including concurrent insert/remove and a
//! forced hash-collision bucket.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use lockfree::hamt::{Hamt, InsertResult};

fn with_attached<R>(f: impl FnOnce() -> R) -> R {
    hazard::attach_thread();
    let r = f();
    hazard::detach_thread();
    r
}

#[test]
fn lookup_missing_key_is_none() {
    with_attached(|| {
        let map: Hamt<u64, u32> = Hamt::new();
        assert_eq!(map.lookup(&1), None);
    });
}

#[test]
fn insert_lookup_remove_round_trip() {
    with_attached(|| {
        let map = Hamt::<String, u32>::new();
        for i in 0..200u32 {
            assert!(matches!(map.insert(i.to_string(), i), InsertResult::Inserted));
        }
        for i in 0..200u32 {
            assert_eq!(map.lookup(&i.to_string()), Some(i));
        }
        for i in (0..200u32).step_by(2) {
            assert_eq!(map.remove(&i.to_string()), Some(i));
        }
        for i in 0..200u32 {
            if i % 2 == 0 {
                assert_eq!(map.lookup(&i.to_string()), None);
            } else {
                assert_eq!(map.lookup(&i.to_string()), Some(i));
            }
        }
    });
}

#[test]
fn forced_collision_bucket_keeps_every_entry_addressable() {
    with_attached(|| {
        // Every key hashes to the same bucket, forcing the trie through its
        // collision-bucket path for the whole population.
        let map: Hamt<u32, u32> = Hamt::with_hash_fn(|_| 0xDEADBEEF);
        for i in 0..50u32 {
            map.insert(i, i * 10);
        }
        for i in 0..50u32 {
            assert_eq!(map.lookup(&i), Some(i * 10));
        }
        assert_eq!(map.remove(&25), Some(250));
        assert_eq!(map.lookup(&25), None);
        assert_eq!(map.lookup(&24), Some(240));
    });
}

#[test]
fn concurrent_insert_lookup_is_consistent() {
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 500;

    let map = Arc::new(Hamt::<u64, u64>::new());
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            hazard::attach_thread();
            let base = t as u64 * PER_THREAD;
            for i in 0..PER_THREAD {
                map.insert(base + i, base + i);
            }
            for i in 0..PER_THREAD {
                assert_eq!(map.lookup(&(base + i)), Some(base + i));
            }
            hazard::detach_thread();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    hazard::attach_thread();
    let mut seen = HashSet::new();
    for t in 0..THREADS {
        let base = t as u64 * PER_THREAD;
        for i in 0..PER_THREAD {
            assert_eq!(map.lookup(&(base + i)), Some(base + i));
            seen.insert(base + i);
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD as usize);
    hazard::detach_thread();
}

#[test]
fn concurrent_insert_and_remove_drives_contraction_without_races() {
    // Every key shares one bucket's worth of hash bits it can collide on
    // (masked down to 12 bits), which forces every thread's removes through
    // the same handful of `try_contract`/`try_contract_best_effort` calls
    // concurrently, rather than each thread working an untouched subtree.
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 500;
    const HASH_MASK: u64 = 0xFFF;

    let map = Arc::new(Hamt::<u64, u64>::with_hash_fn(|k| k & HASH_MASK));
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            hazard::attach_thread();
            let base = t as u64 * PER_THREAD;
            for i in 0..PER_THREAD {
                map.insert(base + i, base + i);
            }
            // Remove every other key this thread inserted, interleaved with
            // other threads' inserts/removes on overlapping buckets, then
            // confirm this thread's own surviving keys are still reachable.
            for i in (0..PER_THREAD).step_by(2) {
                assert_eq!(map.remove(&(base + i)), Some(base + i));
            }
            for i in 0..PER_THREAD {
                let expect = if i % 2 == 0 { None } else { Some(base + i) };
                assert_eq!(map.lookup(&(base + i)), expect);
            }
            hazard::detach_thread();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    hazard::attach_thread();
    let mut seen = HashSet::new();
    for t in 0..THREADS {
        let base = t as u64 * PER_THREAD;
        for i in 0..PER_THREAD {
            let expect = if i % 2 == 0 { None } else { Some(base + i) };
            assert_eq!(map.lookup(&(base + i)), expect);
            if expect.is_some() {
                seen.insert(base + i);
            }
        }
    }
    assert_eq!(seen.len(), THREADS * (PER_THREAD as usize) / 2);
    hazard::detach_thread();
}

#[test]
fn insert_replace_reports_previous_value() {
    with_attached(|| {
        let map = Hamt::<&'static str, u32>::new();
        assert!(matches!(map.insert("a", 1), InsertResult::Inserted));
        match map.insert("a", 2) {
            InsertResult::Replaced(old) => assert_eq!(old, 1),
            InsertResult::Inserted => panic!("expected a replace"),
        }
        assert_eq!(map.lookup(&"a"), Some(2));
    });
}
