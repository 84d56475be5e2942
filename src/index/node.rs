//! Per-node operations: occupancy, position search, in-place shift-insert,
//! and split redistribution. All pure over page byte buffers; page
//! allocation and write-back belong to the tree layer.

use crate::storage::page::{PageNo, RecordId, NO_PAGE};

use super::layout::{InternalMut, InternalView, LeafMut, LeafView, INTERNAL_CAPACITY, LEAF_CAPACITY};

/// Number of occupied entries: the length of the contiguous occupied prefix.
pub fn leaf_occupancy(leaf: &LeafView) -> usize {
    for i in 0..LEAF_CAPACITY {
        if !leaf.is_occupied(i) {
            return i;
        }
    }
    LEAF_CAPACITY
}

/// Number of occupied keys, derived from the child slots: key i is live iff
/// child i+1 is nonzero.
pub fn internal_occupancy(node: &InternalView) -> usize {
    for i in 0..INTERNAL_CAPACITY {
        if node.child(i + 1) == NO_PAGE {
            return i;
        }
    }
    INTERNAL_CAPACITY
}

/// Insertion position in a leaf: smallest index whose key is >= `key`, or the
/// first unoccupied slot. Equal keys gather to the left of the boundary.
pub fn leaf_insert_pos(leaf: &LeafView, key: i32) -> usize {
    for i in 0..LEAF_CAPACITY {
        if !leaf.is_occupied(i) || key <= leaf.key(i) {
            return i;
        }
    }
    LEAF_CAPACITY
}

/// Routing position in an internal node: smallest index whose key is > `key`,
/// or whose right child slot is unoccupied. Strict comparison, so a key equal
/// to a separator descends into the right branch.
pub fn internal_child_pos(node: &InternalView, key: i32) -> usize {
    for i in 0..INTERNAL_CAPACITY {
        if node.child(i + 1) == NO_PAGE || key < node.key(i) {
            return i;
        }
    }
    INTERNAL_CAPACITY
}

/// Shift entries `[pos..occ)` right by one and write `(key, rid)` at `pos`.
/// Caller guarantees `occ < LEAF_CAPACITY`.
pub fn leaf_insert_shift(page: &mut [u8], pos: usize, occ: usize, key: i32, rid: RecordId) {
    debug_assert!(occ < LEAF_CAPACITY && pos <= occ);
    let mut moved = Vec::with_capacity(occ - pos);
    {
        let view = LeafView(page);
        for i in pos..occ {
            moved.push((view.key(i), view.rid(i)));
        }
    }
    let mut leaf = LeafMut(page);
    for (off, &(k, r)) in moved.iter().enumerate() {
        leaf.set_entry(pos + 1 + off, k, r);
    }
    leaf.set_entry(pos, key, rid);
}

/// Shift keys `[pos..occ)` and children `[pos+1..occ+1)` right by one, then
/// write `key` at `pos` and `child` at `pos+1`. Caller guarantees
/// `occ < INTERNAL_CAPACITY`.
pub fn internal_insert_shift(page: &mut [u8], pos: usize, occ: usize, key: i32, child: PageNo) {
    debug_assert!(occ < INTERNAL_CAPACITY && pos <= occ);
    let mut moved = Vec::with_capacity(occ - pos);
    {
        let view = InternalView(page);
        for i in pos..occ {
            moved.push((view.key(i), view.child(i + 1)));
        }
    }
    let mut node = InternalMut(page);
    for (off, &(k, c)) in moved.iter().enumerate() {
        node.set_key(pos + 1 + off, k);
        node.set_child(pos + 2 + off, c);
    }
    node.set_key(pos, key);
    node.set_child(pos + 1, child);
}

/// Split a full leaf around the entry `(key, rid)` arriving at `pos`.
///
/// Materializes the Lf+1 sorted entries, keeps the first floor((Lf+1)/2) in
/// `left`, moves the rest into `right` (a fresh zeroed page that will live at
/// `right_page_no`), and links `left -> right -> old sibling`. Returns the
/// pushed key: a copy of the first key of `right`, which stays in the leaf.
pub fn leaf_split(
    left: &mut [u8],
    right: &mut [u8],
    right_page_no: PageNo,
    pos: usize,
    key: i32,
    rid: RecordId,
) -> i32 {
    let (mut entries, old_sib) = {
        let view = LeafView(left);
        debug_assert_eq!(leaf_occupancy(&view), LEAF_CAPACITY);
        let entries: Vec<(i32, RecordId)> =
            (0..LEAF_CAPACITY).map(|i| (view.key(i), view.rid(i))).collect();
        (entries, view.right_sib())
    };
    entries.insert(pos, (key, rid));
    let mid = (LEAF_CAPACITY + 1) / 2;

    let mut lm = LeafMut(left);
    for (i, &(k, r)) in entries[..mid].iter().enumerate() {
        lm.set_entry(i, k, r);
    }
    for i in mid..LEAF_CAPACITY {
        lm.clear_entry(i);
    }
    lm.set_right_sib(right_page_no);

    let mut rm = LeafMut(right);
    for (i, &(k, r)) in entries[mid..].iter().enumerate() {
        rm.set_entry(i, k, r);
    }
    rm.set_right_sib(old_sib);

    entries[mid].0
}

/// Split a full internal node around `(key, child)` arriving at key-position
/// `pos` (the new child lands at child-slot `pos+1`).
///
/// Materializes Nf+1 keys and Nf+2 children, keeps the first
/// floor((Nf+1)/2) keys in `left`, and moves everything right of the middle
/// key into `right`. The middle key is retained by neither half; it is
/// returned as the pushed key.
pub fn internal_split(
    left: &mut [u8],
    right: &mut [u8],
    pos: usize,
    key: i32,
    child: PageNo,
) -> i32 {
    let (mut keys, mut children, level) = {
        let view = InternalView(left);
        debug_assert_eq!(internal_occupancy(&view), INTERNAL_CAPACITY);
        let keys: Vec<i32> = (0..INTERNAL_CAPACITY).map(|i| view.key(i)).collect();
        let children: Vec<PageNo> = (0..=INTERNAL_CAPACITY).map(|i| view.child(i)).collect();
        (keys, children, view.level())
    };
    keys.insert(pos, key);
    children.insert(pos + 1, child);
    let mid = (INTERNAL_CAPACITY + 1) / 2;
    let pushed = keys[mid];

    let mut lm = InternalMut(left);
    for (i, &k) in keys[..mid].iter().enumerate() {
        lm.set_key(i, k);
    }
    for i in mid..INTERNAL_CAPACITY {
        lm.set_key(i, 0);
    }
    for (i, &c) in children[..=mid].iter().enumerate() {
        lm.set_child(i, c);
    }
    for i in mid + 1..=INTERNAL_CAPACITY {
        lm.set_child(i, NO_PAGE);
    }

    let mut rm = InternalMut(right);
    rm.set_level(level);
    for (i, &k) in keys[mid + 1..].iter().enumerate() {
        rm.set_key(i, k);
    }
    for (i, &c) in children[mid + 1..].iter().enumerate() {
        rm.set_child(i, c);
    }

    pushed
}
