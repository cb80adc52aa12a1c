//! Retired pointers awaiting reclamation.

/// A logically-removed pointer paired with the function that frees its
/// referent.
///
/// Deliberately just a raw pointer plus a monomorphic `fn` pointer rather
/// than a boxed closure: the spec's own redesign note calls for exactly this
/// ("store `(pointer, fn_ptr)` pairs; a monomorphic per-type disposer is
/// fine, not dynamic dispatch through a heap object").
pub struct RetiredPtr {
    ptr: *mut (),
    drop_fn: unsafe fn(*mut ()),
}

// SAFETY: a `RetiredPtr` only ever crosses threads while stored in a
// `ThreadRecord`'s retired list, which already requires `T: Send` of every
// container that calls `retire::<T>`.
unsafe impl Send for RetiredPtr {}

impl RetiredPtr {
    /// Builds a retired entry for a raw pointer previously obtained from
    /// `Box::into_raw`.
    pub fn new<T>(ptr: *mut T) -> Self {
        unsafe fn drop_impl<T>(ptr: *mut ()) {
            drop(Box::from_raw(ptr as *mut T));
        }
        RetiredPtr {
            ptr: ptr as *mut (),
            drop_fn: drop_impl::<T>,
        }
    }

    /// The address of the retired pointer, for comparison against the
    /// guarded-pointer snapshot taken by `scan()`.
    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    /// Invokes the disposer, freeing the retired node.
    ///
    /// # Safety
    ///
    /// The caller must have established (via `scan()`) that no guard
    /// anywhere still protects this address.
    pub unsafe fn dispose(self) {
        (self.drop_fn)(self.ptr);
    }
}

/// A thread-owned, bounded list of pointers retired but not yet freed.
///
/// Not lock-free itself: only the owning thread ever pushes to or drains its
/// own bag directly. Cross-thread access (help-scan claiming a free
/// thread's bag) goes through the `active`/claim flag on `ThreadRecord`, not
/// through synchronization internal to `RetiredBag`.
#[derive(Default)]
pub struct RetiredBag {
    items: Vec<RetiredPtr>,
    capacity: usize,
}

impl RetiredBag {
    pub fn with_capacity(capacity: usize) -> Self {
        RetiredBag {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: RetiredPtr) {
        self.items.push(entry);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether pushing one more entry would exceed the configured capacity,
    /// i.e. whether a scan should run first.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Takes every currently retired entry, leaving the bag empty.
    pub fn drain_all(&mut self) -> Vec<RetiredPtr> {
        std::mem::take(&mut self.items)
    }

    /// Partitions entries into those whose address is still guarded
    /// (survive) and those that are not (to be disposed).
    pub fn partition_by_guarded(&mut self, guarded: &crate::scan::GuardedSet) {
        let items = std::mem::take(&mut self.items);
        let (keep, dispose): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|r| guarded.contains(r.address()));
        self.items = keep;
        for entry in dispose {
            // SAFETY: `guarded` is a snapshot over every ThreadRecord's
            // guards taken by the caller's `scan()`, per the module
            // contract in `scan.rs`.
            unsafe { entry.dispose() };
        }
    }

    pub fn extend(&mut self, entries: Vec<RetiredPtr>) {
        self.items.extend(entries);
    }
}
