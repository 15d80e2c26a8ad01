// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! Unit tests for the 4-level tree: alignment, range, lazy allocation,
//! leaf probing and failpoint-driven allocation failure.

use super::*;
use crate::types::USER_SPAN;

#[test]
fn rejects_unaligned_addresses() {
    let mut tree = PageTree::new();
    assert_eq!(tree.install_leaf(1, 7, PteFlags::READ), Err(MapError::Unaligned));
    assert_eq!(tree.leaf(1), Leaf::Missing);
}

#[test]
fn rejects_out_of_range_addresses() {
    let mut tree = PageTree::new();
    assert_eq!(tree.install_leaf(USER_SPAN, 7, PteFlags::READ), Err(MapError::OutOfRange));
}

#[test]
fn empty_tree_has_no_leaves() {
    let tree = PageTree::new();
    assert_eq!(tree.leaf(0), Leaf::Missing);
    assert_eq!(tree.leaf(0x7000_0000), Leaf::Missing);
    let mut count = 0;
    tree.for_each_leaf(|_, _, _| count += 1);
    assert_eq!(count, 0);
}

#[test]
fn install_and_probe_round_trip() {
    let mut tree = PageTree::new();
    let flags = PteFlags::READ | PteFlags::WRITE | PteFlags::USER;
    tree.install_leaf(0x1000, 42, flags).expect("install");
    assert_eq!(tree.leaf(0x1000), Leaf::Mapped { pfn: 42, flags: flags | PteFlags::VALID });
    assert_eq!(tree.leaf(0x2000), Leaf::Missing);
}

#[test]
fn intermediate_levels_allocated_lazily() {
    let mut tree = PageTree::new();
    // Two addresses far apart force disjoint top-level subtrees.
    tree.install_leaf(0x1000, 1, PteFlags::READ).expect("low");
    tree.install_leaf(USER_SPAN - PAGE_SIZE, 2, PteFlags::READ).expect("high");
    assert!(matches!(tree.leaf(0x1000), Leaf::Mapped { pfn: 1, .. }));
    assert!(matches!(tree.leaf(USER_SPAN - PAGE_SIZE), Leaf::Mapped { pfn: 2, .. }));
}

#[test]
fn clear_leaf_returns_previous_frame() {
    let mut tree = PageTree::new();
    tree.install_leaf(0x3000, 9, PteFlags::READ).expect("install");
    assert_eq!(tree.clear_leaf(0x3000), Some(9));
    assert_eq!(tree.clear_leaf(0x3000), None);
    assert_eq!(tree.leaf(0x3000), Leaf::Missing);
}

#[test]
fn for_each_leaf_visits_in_address_order() {
    let mut tree = PageTree::new();
    tree.install_leaf(0x5000, 5, PteFlags::READ).expect("a");
    tree.install_leaf(0x1000, 1, PteFlags::READ).expect("b");
    tree.install_leaf(0x200000, 2, PteFlags::READ).expect("c");
    let mut seen = alloc::vec::Vec::new();
    tree.for_each_leaf(|va, pfn, _| seen.push((va, pfn)));
    assert_eq!(seen, alloc::vec![(0x1000, 1), (0x5000, 5), (0x200000, 2)]);
}

#[cfg(feature = "failpoints")]
#[test]
fn denied_table_alloc_reports_out_of_memory() {
    let mut tree = PageTree::new();
    failpoints::deny_next_table_alloc();
    assert_eq!(tree.install_leaf(0x1000, 1, PteFlags::READ), Err(MapError::OutOfMemory));
    failpoints::clear();
    tree.install_leaf(0x1000, 1, PteFlags::READ).expect("after clear");
}

#[test]
fn root_ppn_is_page_aligned_pointer() {
    let tree = PageTree::new();
    assert_ne!(tree.root_ppn(), 0);
}
