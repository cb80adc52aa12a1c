//! A lock-free hash-array-mapped trie map (spec §3.3, §4.4).

mod node;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicPtr, Ordering};

pub use node::{FANOUT, HASH_BITS, MAX_DEPTH, SLICE};
use node::{slice, CNode, INode, Node, SNode};

/// Outcome of [`Hamt::insert`].
#[derive(Debug)]
pub enum InsertResult<V> {
    /// No prior value occupied this key.
    Inserted,
    /// A prior value occupied this key and was replaced; it is returned.
    Replaced(V),
}

/// What an insert/remove attempt at one trie level should do next.
enum Step {
    /// A child `INode` was found; loop again one level deeper.
    Descend,
    /// A CAS failed (or a tomb was contracted); restart from the root.
    Restart,
}

/// Frees a node and, if it is an `Inode`, recursively frees everything
/// beneath it. Used only at single-threaded quiescence (construction
/// failures and `Drop`), never on a published node.
unsafe fn free_tree<K, V>(ptr: *mut Node<K, V>) {
    let node = Box::from_raw(ptr);
    if let Node::Inode(inode) = &*node {
        let main = inode.main.load(Ordering::Relaxed);
        if !main.is_null() {
            let cnode = Box::from_raw(main);
            for (_, child) in cnode.entries() {
                free_tree(child);
            }
        }
    }
}

/// The atomic `main` pointer owned by the `Inode` wrapped at `node_ptr`.
///
/// # Safety
///
/// `node_ptr` must point at a live `Node::Inode`.
unsafe fn main_of<'a, K, V>(node_ptr: *mut Node<K, V>) -> &'a AtomicPtr<CNode<K, V>> {
    match &*node_ptr {
        Node::Inode(inode) => &inode.main,
        Node::Snode(_) => unreachable!("caller already matched Node::Inode"),
    }
}

/// A lock-free concurrent hash trie.
///
/// Keys are hashed with a pluggable `K -> u64` function (defaulting to
/// `std::hash::Hash` through `DefaultHasher`, matching the "pluggable
/// hash_function" configuration knob).
///
/// `root` is itself a `Node::Inode`, the same representation used for every
/// other indirection node in the trie — there is no special root type, so
/// traversal and contraction code do not need to special-case level 0.
pub struct Hamt<K, V> {
    root: *mut Node<K, V>,
    hash_fn: Box<dyn Fn(&K) -> u64 + Send + Sync>,
}

unsafe impl<K: Send, V: Send> Send for Hamt<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Hamt<K, V> {}

fn default_hash<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn new_root<K, V>() -> *mut Node<K, V> {
    let cnode = Box::into_raw(Box::new(CNode::empty()));
    Box::into_raw(Box::new(Node::Inode(INode::new(cnode))))
}

impl<K: Hash + Eq + Clone, V: Clone> Hamt<K, V> {
    /// Builds an empty trie using `std::hash::Hash` for key hashing.
    pub fn new() -> Self {
        Hamt {
            root: new_root(),
            hash_fn: Box::new(default_hash::<K>),
        }
    }

    /// Builds an empty trie using a custom hash function, e.g. to make test
    /// collisions deterministic (spec §8 scenarios 3-5).
    pub fn with_hash_fn<F>(hash_fn: F) -> Self
    where
        F: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        Hamt {
            root: new_root(),
            hash_fn: Box::new(hash_fn),
        }
    }

    fn hash(&self, key: &K) -> u64 {
        (self.hash_fn)(key)
    }

    /// Looks up `key`, returning a clone of its value if present. Runs
    /// under an implicit guard scope per the external API (spec §6).
    pub fn lookup(&self, key: &K) -> Option<V> {
        let h = self.hash(key);
        loop {
            let mut guard_parent = hazard::acquire_guard()
                .expect("Hamt::lookup requires the calling thread to call hazard::attach_thread");
            let mut guard_current = hazard::acquire_guard()
                .expect("Hamt::lookup requires the calling thread to call hazard::attach_thread");

            let mut parent: Option<*mut Node<K, V>> = None;
            let mut current = self.root;
            let mut level = 0usize;
            let mut restart = false;

            loop {
                // SAFETY: `current` always points at a live `Node::Inode`.
                let main_ptr = guard_current.protect(unsafe { main_of(current) });
                let main = unsafe { &*main_ptr };

                if let Some(p) = parent {
                    if main.is_tomb {
                        try_contract(p, &mut guard_parent, current, main_ptr);
                        restart = true;
                        break;
                    }
                }

                let idx = slice(h, level);
                let child_ptr = match main.child_at(idx) {
                    Some(c) => c,
                    None => return None,
                };

                match unsafe { &*child_ptr } {
                    Node::Snode(s) => {
                        return if s.hash == h { s.get(key).cloned() } else { None };
                    }
                    Node::Inode(_) => {
                        std::mem::swap(&mut guard_parent, &mut guard_current);
                        parent = Some(current);
                        current = child_ptr;
                        level += 1;
                    }
                }
            }

            debug_assert!(restart);
        }
    }

    /// Inserts `(key, value)`, returning whether an existing value was
    /// replaced.
    pub fn insert(&self, key: K, value: V) -> InsertResult<V> {
        let h = self.hash(&key);
        loop {
            let mut guard_parent = hazard::acquire_guard()
                .expect("Hamt::insert requires the calling thread to call hazard::attach_thread");
            let mut guard_current = hazard::acquire_guard()
                .expect("Hamt::insert requires the calling thread to call hazard::attach_thread");

            let mut parent: Option<*mut Node<K, V>> = None;
            let mut current = self.root;
            let mut level = 0usize;

            loop {
                let main_ptr = guard_current.protect(unsafe { main_of(current) });
                let main = unsafe { &*main_ptr };

                if let Some(p) = parent {
                    if main.is_tomb {
                        try_contract(p, &mut guard_parent, current, main_ptr);
                        break;
                    }
                }

                let idx = slice(h, level);

                let step = match main.child_at(idx) {
                    None => {
                        let snode = Box::into_raw(Box::new(Node::Snode(SNode::singleton(
                            h,
                            key.clone(),
                            value.clone(),
                        ))));
                        let new_cnode =
                            Box::into_raw(Box::new(main.with_child_inserted(idx, snode)));
                        if install(current, main_ptr, new_cnode) {
                            // SAFETY: `main_ptr` was just displaced and is
                            // unreachable from `current` going forward.
                            unsafe { hazard::retire(main_ptr) };
                            return InsertResult::Inserted;
                        }
                        unsafe {
                            node::free_unpublished_node(snode);
                            node::free_unpublished_cnode(new_cnode);
                        }
                        Step::Restart
                    }
                    Some(child_ptr) => match unsafe { &*child_ptr } {
                        Node::Snode(s) if s.hash == h => {
                            let (new_snode, replaced) = s.with_entry(key.clone(), value.clone());
                            let new_snode_ptr = Box::into_raw(Box::new(Node::Snode(new_snode)));
                            let new_cnode = Box::into_raw(Box::new(
                                main.with_child_replaced(idx, new_snode_ptr),
                            ));
                            if install(current, main_ptr, new_cnode) {
                                // SAFETY: `child_ptr` and `main_ptr` were
                                // just displaced and are unreachable from
                                // `current` going forward.
                                unsafe {
                                    hazard::retire(child_ptr);
                                    hazard::retire(main_ptr);
                                }
                                return match replaced {
                                    Some(old) => InsertResult::Replaced(old),
                                    None => InsertResult::Inserted,
                                };
                            }
                            unsafe {
                                node::free_unpublished_node(new_snode_ptr);
                                node::free_unpublished_cnode(new_cnode);
                            }
                            Step::Restart
                        }
                        Node::Snode(s) if level + 1 >= MAX_DEPTH => {
                            // Max depth: hashes are equal in every bit this
                            // trie ever inspects, so treat as one bucket.
                            let (new_snode, _) = s.with_entry(key.clone(), value.clone());
                            let new_snode_ptr = Box::into_raw(Box::new(Node::Snode(new_snode)));
                            let new_cnode = Box::into_raw(Box::new(
                                main.with_child_replaced(idx, new_snode_ptr),
                            ));
                            if install(current, main_ptr, new_cnode) {
                                unsafe {
                                    hazard::retire(child_ptr);
                                    hazard::retire(main_ptr);
                                }
                                return InsertResult::Inserted;
                            }
                            unsafe {
                                node::free_unpublished_node(new_snode_ptr);
                                node::free_unpublished_cnode(new_cnode);
                            }
                            Step::Restart
                        }
                        Node::Snode(s) => {
                            // Diverging hashes below MAX_DEPTH: grow a chain
                            // of INode/CNode pairs until the two hashes
                            // split into different slots.
                            let existing_entry = s.sole_entry();
                            let chain_root = build_split_chain(
                                level + 1,
                                s.hash,
                                existing_entry,
                                h,
                                key.clone(),
                                value.clone(),
                            );
                            let new_cnode =
                                Box::into_raw(Box::new(main.with_child_replaced(idx, chain_root)));
                            if install(current, main_ptr, new_cnode) {
                                unsafe {
                                    hazard::retire(child_ptr);
                                    hazard::retire(main_ptr);
                                }
                                return InsertResult::Inserted;
                            }
                            unsafe {
                                free_tree(chain_root);
                                node::free_unpublished_cnode(new_cnode);
                            }
                            Step::Restart
                        }
                        Node::Inode(_) => {
                            std::mem::swap(&mut guard_parent, &mut guard_current);
                            parent = Some(current);
                            current = child_ptr;
                            level += 1;
                            Step::Descend
                        }
                    },
                };

                match step {
                    Step::Descend => continue,
                    Step::Restart => break,
                }
            }
        }
    }

    /// Removes `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let h = self.hash(key);
        loop {
            let mut guard_parent = hazard::acquire_guard()
                .expect("Hamt::remove requires the calling thread to call hazard::attach_thread");
            let mut guard_current = hazard::acquire_guard()
                .expect("Hamt::remove requires the calling thread to call hazard::attach_thread");

            let mut parent: Option<*mut Node<K, V>> = None;
            let mut current = self.root;
            let mut level = 0usize;

            loop {
                let main_ptr = guard_current.protect(unsafe { main_of(current) });
                let main = unsafe { &*main_ptr };

                if let Some(p) = parent {
                    if main.is_tomb {
                        try_contract(p, &mut guard_parent, current, main_ptr);
                        break;
                    }
                }

                let idx = slice(h, level);
                let child_ptr = match main.child_at(idx) {
                    Some(c) => c,
                    None => return None,
                };

                let step = match unsafe { &*child_ptr } {
                    Node::Snode(s) if s.hash == h && s.get(key).is_some() => {
                        let at_root = parent.is_none();
                        if s.len() > 1 {
                            let (new_snode, removed) = s.without_entry(key);
                            let new_snode_ptr = Box::into_raw(Box::new(Node::Snode(new_snode)));
                            let new_cnode = Box::into_raw(Box::new(
                                main.with_child_replaced(idx, new_snode_ptr),
                            ));
                            if install(current, main_ptr, new_cnode) {
                                unsafe {
                                    hazard::retire(child_ptr);
                                    hazard::retire(main_ptr);
                                }
                                return removed;
                            }
                            unsafe {
                                node::free_unpublished_node(new_snode_ptr);
                                node::free_unpublished_cnode(new_cnode);
                            }
                        } else {
                            let removed = s.get(key).cloned();
                            let new_cnode =
                                Box::into_raw(Box::new(main.with_child_removed(idx, at_root)));
                            if install(current, main_ptr, new_cnode) {
                                unsafe {
                                    hazard::retire(child_ptr);
                                    hazard::retire(main_ptr);
                                }
                                if let Some(p) = parent {
                                    let _ = try_contract_best_effort(p, current);
                                }
                                return removed;
                            }
                            unsafe { node::free_unpublished_cnode(new_cnode) };
                        }
                        Step::Restart
                    }
                    Node::Snode(_) => return None,
                    Node::Inode(_) => {
                        std::mem::swap(&mut guard_parent, &mut guard_current);
                        parent = Some(current);
                        current = child_ptr;
                        level += 1;
                        Step::Descend
                    }
                };

                match step {
                    Step::Descend => continue,
                    Step::Restart => break,
                }
            }
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Default for Hamt<K, V> {
    fn default() -> Self {
        Hamt::new()
    }
}

impl<K, V> Drop for Hamt<K, V> {
    fn drop(&mut self) {
        // `&mut self` is exclusive access, so walking the tree with plain
        // (non-atomic) reads and freeing directly is sound without routing
        // through the SMR engine (spec §9 open question).
        unsafe { free_tree(self.root) };
    }
}

/// Installs `new_cnode` as `owner`'s `main`, replacing `old_main`. Returns
/// whether the CAS succeeded.
///
/// # Safety
///
/// `owner` must point at a live `Node::Inode`.
fn install<K, V>(
    owner: *mut Node<K, V>,
    old_main: *mut CNode<K, V>,
    new_cnode: *mut CNode<K, V>,
) -> bool {
    // SAFETY: every caller holds a guard-protected `owner` known (by
    // construction of the traversal) to be an `Inode`.
    unsafe { main_of(owner) }
        .compare_exchange(old_main, new_cnode, Ordering::Release, Ordering::Relaxed)
        .is_ok()
}

/// Builds a chain of INode/CNode pairs distinguishing `existing_hash` from
/// `new_hash` at successive slice positions, starting at `level`, placing
/// both entries as SNodes once the hashes diverge (or at `MAX_DEPTH`, where
/// they are merged into one collision bucket).
fn build_split_chain<K: Clone + PartialEq, V: Clone>(
    level: usize,
    existing_hash: u64,
    existing_entry: (K, V),
    new_hash: u64,
    new_key: K,
    new_value: V,
) -> *mut Node<K, V> {
    if level >= MAX_DEPTH {
        let snode = SNode::singleton(existing_hash, existing_entry.0, existing_entry.1);
        let (merged, _) = snode.with_entry(new_key, new_value);
        return Box::into_raw(Box::new(Node::Snode(merged)));
    }

    let existing_idx = slice(existing_hash, level);
    let new_idx = slice(new_hash, level);

    if existing_idx == new_idx {
        let child = build_split_chain(
            level + 1,
            existing_hash,
            existing_entry,
            new_hash,
            new_key,
            new_value,
        );
        let cnode = CNode::single(existing_idx, child);
        let inode = INode::new(Box::into_raw(Box::new(cnode)));
        Box::into_raw(Box::new(Node::Inode(inode)))
    } else {
        let existing_snode = Box::into_raw(Box::new(Node::Snode(SNode::singleton(
            existing_hash,
            existing_entry.0,
            existing_entry.1,
        ))));
        let new_snode = Box::into_raw(Box::new(Node::Snode(SNode::singleton(
            new_hash, new_key, new_value,
        ))));
        let cnode = if existing_idx < new_idx {
            CNode::single(existing_idx, existing_snode).with_child_inserted(new_idx, new_snode)
        } else {
            CNode::single(new_idx, new_snode).with_child_inserted(existing_idx, existing_snode)
        };
        let inode = INode::new(Box::into_raw(Box::new(cnode)));
        Box::into_raw(Box::new(Node::Inode(inode)))
    }
}

/// Contracts a tombed node into its parent: builds a new parent `CNode`
/// with the pointer to `tombed` replaced by the tomb's sole child, and
/// installs it. Best-effort — failure (and success) both just lead the
/// caller to restart the whole traversal, since the topology changed either
/// way.
///
/// `tombed` and `tombed_main` are deliberately never retired here: no guard
/// in this module ever protects an `Inode`'s own address (only the `CNode`
/// reached through it), so a concurrent traversal may still be mid-dereference
/// of `tombed` through some other thread's `current`/`parent` at the moment
/// this CAS succeeds. Retiring only the displaced parent `CNode` (the pointer
/// this thread's own guard protects) matches the reference implementation's
/// `contractParent`, which retires `pm` alone and leaves the tombed `INode`
/// and its tomb `CNode` unreclaimed until the whole trie is torn down.
fn try_contract<K, V>(
    parent: *mut Node<K, V>,
    parent_guard: &mut hazard::Guard,
    tombed: *mut Node<K, V>,
    tombed_main: *mut CNode<K, V>,
) {
    // SAFETY: `parent` is a guard-protected ancestor `Inode` from the
    // traversal that found `tombed`.
    let parent_main_ptr: *mut CNode<K, V> = parent_guard.protect(unsafe { main_of(parent) });
    let parent_main = unsafe { &*parent_main_ptr };

    let idx = match parent_main.entries().find(|(_, c)| *c == tombed).map(|(i, _)| i) {
        Some(i) => i,
        None => return, // already contracted by someone else
    };

    let pulled_up = unsafe { &*tombed_main }.sole_child();
    let new_parent_main = Box::into_raw(Box::new(parent_main.with_child_replaced(idx, pulled_up)));

    if install(parent, parent_main_ptr, new_parent_main) {
        // SAFETY: `parent_main_ptr` was just displaced and is unreachable
        // from `parent` going forward.
        unsafe { hazard::retire(parent_main_ptr) };
    } else {
        unsafe { node::free_unpublished_cnode(new_parent_main) };
    }
}

/// Same contraction attempt as `try_contract`, invoked opportunistically
/// right after a successful remove rather than on the next traversal's tomb
/// check. Failure is fine; a future traversal will retry it.
fn try_contract_best_effort<K, V>(parent: *mut Node<K, V>, tombed: *mut Node<K, V>) -> bool {
    let mut guard = match hazard::acquire_guard() {
        Ok(g) => g,
        Err(_) => return false,
    };
    // SAFETY: `tombed` is a live `Inode` just operated on by the caller.
    let tombed_main = guard.protect(unsafe { main_of(tombed) });
    if !unsafe { &*tombed_main }.is_tomb {
        return false;
    }
    try_contract(parent, &mut guard, tombed, tombed_main);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_attached<R>(f: impl FnOnce() -> R) -> R {
        hazard::attach_thread();
        let r = f();
        hazard::detach_thread();
        r
    }

    #[test]
    fn distinct_hashes() {
        with_attached(|| {
            let map = Hamt::<u64, &'static str>::with_hash_fn(|k| *k);
            map.insert(1, "a");
            map.insert(2, "b");
            map.insert(3, "c");

            assert_eq!(map.lookup(&2), Some("b"));
            assert_eq!(map.remove(&2), Some("b"));
            assert_eq!(map.lookup(&2), None);
            assert_eq!(map.lookup(&1), Some("a"));
            assert_eq!(map.lookup(&3), Some("c"));
        });
    }

    #[test]
    fn hash_collision_bucket() {
        with_attached(|| {
            let map: Hamt<&'static str, u32> = Hamt::with_hash_fn(|_| 0);
            map.insert("x", 1);
            map.insert("y", 2);
            map.insert("z", 3);

            assert_eq!(map.lookup(&"x"), Some(1));
            assert_eq!(map.lookup(&"y"), Some(2));
            assert_eq!(map.lookup(&"z"), Some(3));
            assert_eq!(map.remove(&"y"), Some(2));
            assert_eq!(map.lookup(&"x"), Some(1));
            assert_eq!(map.lookup(&"z"), Some(3));
            assert_eq!(map.lookup(&"y"), None);
        });
    }

    #[test]
    fn insert_replaces_and_reports_old_value() {
        with_attached(|| {
            let map = Hamt::<u64, u32>::with_hash_fn(|k| *k);
            assert!(matches!(map.insert(1, 10), InsertResult::Inserted));
            match map.insert(1, 20) {
                InsertResult::Replaced(old) => assert_eq!(old, 10),
                InsertResult::Inserted => panic!("expected a replace"),
            }
            assert_eq!(map.lookup(&1), Some(20));
        });
    }

    #[test]
    fn remove_absent_key_is_noop() {
        with_attached(|| {
            let map = Hamt::<u64, u32>::new();
            map.insert(1, 10);
            assert_eq!(map.remove(&2), None);
            assert_eq!(map.lookup(&1), Some(10));
        });
    }

    #[test]
    fn split_on_diverging_hash() {
        with_attached(|| {
            // `a` and `b` share slot 0 at level 0 (`hash & 0x1f == 0`) but
            // diverge at level 1 (`0x00` vs `0x20 >> 5 == 1`).
            let map: Hamt<&'static str, u32> = Hamt::with_hash_fn(|k| match *k {
                "a" => 0x00,
                "b" => 0x20,
                _ => unreachable!(),
            });
            map.insert("a", 1);
            map.insert("b", 2);

            assert_eq!(map.lookup(&"a"), Some(1));
            assert_eq!(map.lookup(&"b"), Some(2));
        });
    }
}
