//! Node shapes for the hash-array-mapped trie (spec §3.3): indirection
//! nodes (`INode`) pointing at compressed array nodes (`CNode`) of up to
//! `FANOUT` children, which are in turn either further `INode`s or
//! singleton/collision `SNode`s.
//!
//! Nodes are immutable once published. A write constructs a whole new
//! `CNode` and installs it with a single CAS on the owning `INode::main`;
//! the displaced `CNode` (and any displaced `SNode`) is retired through the
//! hazard-pointer engine, never mutated in place. Grounded on
//! `leshow/contrie`'s bitmap-indexed trie node and tagged-child dispatch,
//! generalized here to a plain enum discriminant rather than pointer
//! tagging, per the spec's own re-architecture note that either is fine.

use std::sync::atomic::AtomicPtr;

/// Number of bits consumed from the hash at each trie level.
pub const SLICE: u32 = 5;
/// Children per `CNode`, `2^SLICE`.
pub const FANOUT: usize = 1 << SLICE;
/// Bits in the hash domain.
pub const HASH_BITS: u32 = 64;
/// Maximum trie depth, `ceil(HASH_BITS / SLICE)`.
pub const MAX_DEPTH: usize = 13;

/// The `SLICE`-bit index used to dispatch through a `CNode` at `level`.
pub fn slice(hash: u64, level: usize) -> u32 {
    ((hash >> (level as u32 * SLICE)) & (FANOUT as u64 - 1)) as u32
}

/// A child of a `CNode`: either a further level of indirection or a
/// collision bucket.
pub enum Node<K, V> {
    Inode(INode<K, V>),
    Snode(SNode<K, V>),
}

/// One level of indirection. `main` is the only mutable field in the whole
/// trie below the root — every other node is reached only by following a
/// currently-published `main`.
pub struct INode<K, V> {
    pub main: AtomicPtr<CNode<K, V>>,
}

impl<K, V> INode<K, V> {
    pub fn new(main: *mut CNode<K, V>) -> Self {
        INode {
            main: AtomicPtr::new(main),
        }
    }
}

/// A compressed array of up to `FANOUT` children, indexed by a bitmap.
///
/// Bit `i` of `bitmap` is set iff a child occupies logical slot `i`; its
/// physical offset into `children` is `popcount(bitmap & ((1 << i) - 1))`.
pub struct CNode<K, V> {
    bitmap: u32,
    children: Vec<*mut Node<K, V>>,
    /// Set when this `CNode` has exactly one child, that child is an
    /// `Snode`, and this `CNode` is not the root's direct child — a
    /// candidate for contraction into its parent.
    pub is_tomb: bool,
}

impl<K, V> CNode<K, V> {
    pub fn empty() -> Self {
        CNode {
            bitmap: 0,
            children: Vec::new(),
            is_tomb: false,
        }
    }

    pub fn single(idx: u32, child: *mut Node<K, V>) -> Self {
        CNode {
            bitmap: 1 << idx,
            children: vec![child],
            is_tomb: false,
        }
    }

    pub fn has_child(&self, idx: u32) -> bool {
        self.bitmap & (1 << idx) != 0
    }

    fn physical_index(&self, idx: u32) -> usize {
        (self.bitmap & ((1u32 << idx) - 1)).count_ones() as usize
    }

    pub fn child_at(&self, idx: u32) -> Option<*mut Node<K, V>> {
        if self.has_child(idx) {
            Some(self.children[self.physical_index(idx)])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Every `(logical slot, child pointer)` pair, in physical order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, *mut Node<K, V>)> + '_ {
        let bitmap = self.bitmap;
        (0..FANOUT as u32)
            .filter(move |&i| bitmap & (1 << i) != 0)
            .zip(self.children.iter().copied())
    }

    /// A copy of this node with a brand-new child inserted at `idx`, which
    /// must not already be occupied.
    pub fn with_child_inserted(&self, idx: u32, child: *mut Node<K, V>) -> CNode<K, V> {
        debug_assert!(!self.has_child(idx));
        let pos = self.physical_index(idx);
        let mut children = self.children.clone();
        children.insert(pos, child);
        CNode {
            bitmap: self.bitmap | (1 << idx),
            children,
            is_tomb: false,
        }
    }

    /// A copy of this node with the child at `idx` replaced.
    pub fn with_child_replaced(&self, idx: u32, child: *mut Node<K, V>) -> CNode<K, V> {
        debug_assert!(self.has_child(idx));
        let pos = self.physical_index(idx);
        let mut children = self.children.clone();
        children[pos] = child;
        CNode {
            bitmap: self.bitmap,
            children,
            is_tomb: false,
        }
    }

    /// A copy of this node with the child at `idx` removed, tomb-marked if
    /// exactly one `Snode` child remains and `at_root` is false.
    pub fn with_child_removed(&self, idx: u32, at_root: bool) -> CNode<K, V> {
        debug_assert!(self.has_child(idx));
        let pos = self.physical_index(idx);
        let mut children = self.children.clone();
        children.remove(pos);
        let bitmap = self.bitmap & !(1 << idx);

        let is_tomb = !at_root
            && children.len() == 1
            && matches!(unsafe { &*children[0] }, Node::Snode(_));

        CNode {
            bitmap,
            children,
            is_tomb,
        }
    }

    /// The sole remaining child, for contraction. Only meaningful when
    /// `is_tomb` is set.
    pub fn sole_child(&self) -> *mut Node<K, V> {
        debug_assert_eq!(self.children.len(), 1);
        self.children[0]
    }
}

/// A singleton entry or, below `MAX_DEPTH`, a full hash-collision bucket.
/// All entries share `hash`.
pub struct SNode<K, V> {
    pub hash: u64,
    entries: Vec<(K, V)>,
}

impl<K: PartialEq, V> SNode<K, V> {
    pub fn singleton(hash: u64, key: K, value: V) -> Self {
        SNode {
            hash,
            entries: vec![(key, value)],
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The single entry this bucket holds. Only meaningful (and only ever
    /// called) when `len() == 1`, which is guaranteed for any `Snode` whose
    /// `hash` differs from another key's hash: a multi-entry bucket can only
    /// arise from keys whose hashes are exactly equal.
    pub fn sole_entry(&self) -> (K, V)
    where
        K: Clone,
        V: Clone,
    {
        debug_assert_eq!(self.entries.len(), 1);
        self.entries[0].clone()
    }

    /// A copy of this bucket with `key` mapped to `value`: either replacing
    /// an existing entry (returning its old value) or appending a new one.
    pub fn with_entry(&self, key: K, value: V) -> (SNode<K, V>, Option<V>)
    where
        K: Clone,
        V: Clone,
    {
        let mut entries = self.entries.clone();
        let old = entries.iter_mut().find(|(k, _)| *k == key);
        let replaced = match old {
            Some(slot) => Some(std::mem::replace(&mut slot.1, value.clone())),
            None => {
                entries.push((key, value));
                None
            }
        };
        (
            SNode {
                hash: self.hash,
                entries,
            },
            replaced,
        )
    }

    /// A copy of this bucket with `key` removed, paired with its value if
    /// present.
    pub fn without_entry(&self, key: &K) -> (SNode<K, V>, Option<V>)
    where
        K: Clone,
        V: Clone,
    {
        let mut entries = self.entries.clone();
        let idx = entries.iter().position(|(k, _)| k == key);
        let removed = idx.map(|i| entries.remove(i).1);
        (
            SNode {
                hash: self.hash,
                entries,
            },
            removed,
        )
    }
}

/// Frees a single node that was constructed for a CAS attempt but never
/// published — no guard anywhere can reference it, so this is a plain
/// `Box::from_raw`, not a retire.
///
/// # Safety
///
/// `ptr` must be exclusively owned by the caller (never installed into any
/// `INode::main` reachable by another thread, directly or as part of a
/// published `CNode`'s children).
pub unsafe fn free_unpublished_node<K, V>(ptr: *mut Node<K, V>) {
    drop(Box::from_raw(ptr));
}

/// Frees a `CNode` that was constructed for a CAS attempt but never
/// published, without touching its children (which may be shared with the
/// live trie).
///
/// # Safety
///
/// `ptr` must be exclusively owned by the caller.
pub unsafe fn free_unpublished_cnode<K, V>(ptr: *mut CNode<K, V>) {
    drop(Box::from_raw(ptr));
}
