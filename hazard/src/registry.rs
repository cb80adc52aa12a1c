//! The process-wide hazard-pointer registry: a lock-free intrusive list of
//! `ThreadRecord`s, one lazily-allocated singleton head.

use std::cell::Cell;
use std::ptr;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::config::Config;
use crate::error::HazardError;
use crate::guard::Guard;
use crate::scan::GuardedSet;
use crate::sync::{AtomicPtr, Ordering};
use crate::thread_record::ThreadRecord;

struct GlobalRegistry {
    head: AtomicPtr<ThreadRecord>,
    config: Mutex<Option<Config>>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            head: AtomicPtr::new(ptr::null_mut()),
            config: Mutex::new(None),
        }
    }
}

lazy_static! {
    static ref REGISTRY: GlobalRegistry = GlobalRegistry::new();
}

thread_local! {
    static LOCAL_RECORD: Cell<Option<&'static ThreadRecord>> = const { Cell::new(None) };
}

/// Sets the process-wide configuration. The first call wins; later calls
/// are no-ops (so tests and example binaries can call `init` defensively
/// without racing each other), matching the idempotent-init pattern used by
/// loggers like `env_logger`.
pub fn init(config: Config) {
    let mut guard = REGISTRY.config.lock().unwrap();
    if guard.is_some() {
        log::debug!("hazard::init called again; keeping existing configuration");
        return;
    }
    log::debug!(
        "hazard-pointer registry initialized: hazards_per_thread={} retired_capacity={}",
        config.hazards_per_thread,
        config.retired_capacity
    );
    *guard = Some(config);
}

fn config() -> Config {
    REGISTRY
        .config
        .lock()
        .unwrap()
        .unwrap_or_else(Config::default)
}

/// Tears down the registry. Only safe to call once every thread has
/// detached; in debug builds this is checked and will panic otherwise.
pub fn shutdown() {
    force_reclaim();
    let mut cur = REGISTRY.head.swap(ptr::null_mut(), Ordering::AcqRel);
    while !cur.is_null() {
        // SAFETY: every record on this list was produced by `Box::leak` in
        // `acquire_or_create`, and we just took exclusive ownership of the
        // list by swapping the head out.
        let rec = unsafe { Box::from_raw(cur) };
        debug_assert!(
            !rec.is_owned(),
            "hazard::shutdown called while a thread is still attached"
        );
        cur = rec.next().swap(ptr::null_mut(), Ordering::AcqRel);
    }
    *REGISTRY.config.lock().unwrap() = None;
    log::debug!("hazard-pointer registry shut down");
}

fn acquire_or_create(cfg: Config) -> &'static ThreadRecord {
    let mut cur = REGISTRY.head.load(Ordering::Acquire);
    let mut existing = 0usize;
    while !cur.is_null() {
        // SAFETY: nodes are never freed while reachable from `head`.
        let rec = unsafe { &*cur };
        if rec.try_claim_free() {
            return rec;
        }
        existing += 1;
        cur = rec.next().load(Ordering::Acquire);
    }

    // `max_threads` bounds the registry the same way `hazards_per_thread`
    // bounds a single thread's guard array: a contract violation, not a
    // recoverable `Result` the caller is expected to handle (spec §6/§7).
    assert!(
        existing < cfg.max_threads,
        "hazard-pointer registry already holds max_threads ({}) thread records; \
         raise Config::with_max_threads or detach an existing thread first",
        cfg.max_threads
    );

    let rec: &'static ThreadRecord = Box::leak(Box::new(ThreadRecord::new(
        cfg.hazards_per_thread,
        cfg.retired_capacity,
    )));
    loop {
        let head = REGISTRY.head.load(Ordering::Acquire);
        rec.next().store(head, Ordering::Relaxed);
        if REGISTRY
            .head
            .compare_exchange(head, rec as *const _ as *mut _, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return rec;
        }
    }
}

/// Binds the calling thread to a `ThreadRecord`. Idempotent.
pub fn attach_thread() {
    LOCAL_RECORD.with(|cell| {
        if cell.get().is_some() {
            return;
        }
        let rec = acquire_or_create(config());
        cell.set(Some(rec));
        log::trace!("thread attached to hazard-pointer registry");
    });
}

/// Unbinds the calling thread, running a best-effort scan first so as much
/// of its retired list as possible is disposed immediately; whatever
/// survives is left in the (now free) record for a future `help_scan`.
pub fn detach_thread() {
    let rec = LOCAL_RECORD.with(|cell| cell.take());
    if let Some(rec) = rec {
        let guarded = snapshot_guarded();
        // SAFETY: this thread still exclusively owns `rec` — it has not yet
        // called `release_to_free`, so no help-scan can have claimed it.
        let bag = unsafe { rec.retired_mut() };
        bag.partition_by_guarded(&guarded);
        rec.release_to_free();
        log::trace!("thread detached from hazard-pointer registry");
    }
}

fn with_local_record<R>(f: impl FnOnce(&'static ThreadRecord) -> R) -> Result<R, HazardError> {
    LOCAL_RECORD.with(|cell| match cell.get() {
        Some(rec) => Ok(f(rec)),
        None => Err(HazardError::NotAttached),
    })
}

/// Acquires `n` guards from the calling thread's pool, all or none.
pub fn acquire_guards(n: usize) -> Result<Vec<Guard>, HazardError> {
    with_local_record(|rec| {
        let guards = rec.guards();
        if n > guards.len() {
            return Err(HazardError::GuardExhausted);
        }
        let mut claimed = Vec::with_capacity(n);
        for hazard in guards {
            if claimed.len() == n {
                break;
            }
            if hazard.try_check_out() {
                claimed.push(hazard);
            }
        }
        if claimed.len() < n {
            for hazard in &claimed {
                hazard.check_in(Ordering::Release);
            }
            return Err(HazardError::GuardExhausted);
        }
        Ok(claimed.into_iter().map(Guard::new).collect())
    })?
}

/// Appends a retired pointer to the calling thread's bag, scanning first if
/// it is already at capacity.
pub fn retire(entry: crate::retired::RetiredPtr) -> Result<(), HazardError> {
    with_local_record(|rec| {
        // SAFETY: this thread owns `rec` (it is in `LOCAL_RECORD`), so no
        // help-scan can be concurrently claiming it.
        let is_full = unsafe { rec.retired_mut() }.is_full();
        if is_full {
            scan();
        }
        unsafe { rec.retired_mut() }.push(entry);
    })
}

fn snapshot_guarded() -> GuardedSet {
    let mut set = GuardedSet::new();
    let mut cur = REGISTRY.head.load(Ordering::Acquire);
    while !cur.is_null() {
        // SAFETY: list nodes are never freed while reachable.
        let rec = unsafe { &*cur };
        for hazard in rec.guards() {
            if let Some(p) = hazard.protected(Ordering::Acquire) {
                set.insert(p.address());
            }
        }
        cur = rec.next().load(Ordering::Acquire);
    }
    set.finish();
    set
}

/// Runs the reclamation algorithm of spec §4.1: snapshot every guarded
/// pointer, partition the caller's own retired list against it, then help
/// out any free thread record whose retired bag is non-empty.
pub fn scan() {
    let guarded = snapshot_guarded();

    let _ = with_local_record(|rec| {
        // SAFETY: owned by this thread.
        let bag = unsafe { rec.retired_mut() };
        bag.partition_by_guarded(&guarded);
    });

    help_scan(&guarded);
    log::trace!("scan completed");
}

/// Claims free thread records with a non-empty retired bag, migrates their
/// entries into the calling thread's own bag, and applies the same
/// guarded-set partition to them.
fn help_scan(guarded: &GuardedSet) {
    let mut cur = REGISTRY.head.load(Ordering::Acquire);
    while !cur.is_null() {
        // SAFETY: list nodes are never freed while reachable.
        let rec = unsafe { &*cur };
        if rec.try_claim_for_help_scan() {
            // SAFETY: we just won the claim; no owning thread and no other
            // help-scan can be touching this record's bag concurrently.
            let bag = unsafe { rec.retired_mut() };
            if !bag.is_empty() {
                let migrated = bag.drain_all();
                rec.release_help_scan_claim();

                let _ = with_local_record(|mine| {
                    // SAFETY: owned by this thread.
                    let mine_bag = unsafe { mine.retired_mut() };
                    mine_bag.extend(migrated);
                    mine_bag.partition_by_guarded(guarded);
                });
            } else {
                rec.release_help_scan_claim();
            }
        }
        cur = rec.next().load(Ordering::Acquire);
    }
}

/// Test/teardown helper: runs `scan()` until every *free* thread record's
/// retired list is empty. Intended for use at quiescence — if some other
/// thread is still attached and holding retired items in its own bag, only
/// that thread's own `scan()` can dispose them; this helper cannot reach
/// across that boundary (see `total_retired_in_free_records`).
pub fn force_reclaim() {
    for _ in 0..64 {
        scan();
        if total_retired_in_free_records() == 0 {
            return;
        }
        std::thread::yield_now();
    }
}

/// Sum of retired entries still sitting in *free* (detached) thread
/// records. Deliberately does not peek at records a live thread still owns
/// — only that thread's own `scan()`/`detach_thread()` may read its bag,
/// per the module's safety invariant.
fn total_retired_in_free_records() -> usize {
    let mut total = 0;
    let mut cur = REGISTRY.head.load(Ordering::Acquire);
    while !cur.is_null() {
        let rec = unsafe { &*cur };
        if rec.try_claim_for_help_scan() {
            total += unsafe { rec.retired_mut() }.len();
            rec.release_help_scan_claim();
        }
        cur = rec.next().load(Ordering::Acquire);
    }
    total
}
