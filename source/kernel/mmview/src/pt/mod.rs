// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! 4-level page-table tree with lazy allocation of intermediate levels.
//!
//! This is the per-view mapping structure the synchronizer walks. Table
//! pages are allocated from the kernel heap and owned by the tree; the
//! per-level locate/allocate primitives are exposed crate-internally so the
//! synchronizer can traverse two trees in lock-step without re-walking from
//! the root for every page.

use alloc::{boxed::Box, vec, vec::Vec};
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::frames::Pfn;
use crate::types::{is_user_addr, level_index, PAGE_SIZE, PT_ENTRIES, PT_LEVELS};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in a page-table entry.
    pub struct PteFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        /// Large leaf at an intermediate level. Never installed by this
        /// crate; only detected so walkers can fail fast.
        const HUGE = 1 << 8;
    }
}

const PERM_MASK: PteFlags = PteFlags::READ.union(PteFlags::WRITE).union(PteFlags::EXECUTE);
const PFN_SHIFT: usize = 10;

/// Error returned when manipulating a page-table tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Virtual address is not page aligned.
    Unaligned,
    /// Virtual address lies outside the user-addressable span.
    OutOfRange,
    /// A table page could not be allocated.
    OutOfMemory,
}

/// Result of probing a leaf slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    /// No mapping present.
    Missing,
    /// A huge or device-backed leaf sits above the leaf level.
    Huge,
    /// A base-page mapping.
    Mapped { pfn: Pfn, flags: PteFlags },
}

#[repr(align(4096))]
pub(crate) struct TablePage {
    pub(crate) entries: [usize; PT_ENTRIES],
}

impl TablePage {
    const fn new() -> Self {
        Self { entries: [0; PT_ENTRIES] }
    }
}

/// Per-view 4-level page-table tree.
pub struct PageTree {
    root: NonNull<TablePage>,
    owned: Vec<NonNull<TablePage>>,
}

// SAFETY: the tree exclusively owns every table page it points at; access
// is serialized by the per-view lock above it.
unsafe impl Send for PageTree {}
unsafe impl Sync for PageTree {}

impl PageTree {
    /// Creates an empty tree with a fresh root page.
    pub fn new() -> Self {
        let root = alloc_page();
        Self { root, owned: vec![root] }
    }

    /// Physical root representation handed to the hardware switch.
    pub fn root_ppn(&self) -> usize {
        self.root.as_ptr() as usize / PAGE_SIZE
    }

    pub(crate) fn root(&self) -> NonNull<TablePage> {
        self.root
    }

    /// Allocates a fresh intermediate table page owned by this tree.
    ///
    /// `None` models allocation failure; with the `failpoints` feature the
    /// failure can be injected deterministically.
    pub(crate) fn alloc_table(&mut self) -> Option<NonNull<TablePage>> {
        #[cfg(feature = "failpoints")]
        if failpoints::consume_table_alloc() {
            return None;
        }
        let page = alloc_page();
        self.owned.push(page);
        Some(page)
    }

    /// Probes the mapping state of the page containing `va`.
    pub fn leaf(&self, va: usize) -> Leaf {
        if va % PAGE_SIZE != 0 || !is_user_addr(va) {
            return Leaf::Missing;
        }
        let mut table = self.root;
        for level in 0..PT_LEVELS {
            let entry = unsafe { (*table.as_ptr()).entries[level_index(va, level)] };
            if !entry_present(entry) {
                return Leaf::Missing;
            }
            if level == PT_LEVELS - 1 {
                return Leaf::Mapped { pfn: entry_pfn(entry), flags: entry_flags(entry) };
            }
            if entry_is_leaf(entry) {
                return Leaf::Huge;
            }
            table = entry_table(entry);
        }
        Leaf::Missing
    }

    /// Installs (or replaces) the leaf mapping for `va`.
    ///
    /// Frame accounting is the caller's responsibility; replacing an entry
    /// does not release the previous frame.
    pub fn install_leaf(&mut self, va: usize, pfn: Pfn, flags: PteFlags) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_user_addr(va) {
            return Err(MapError::OutOfRange);
        }
        let mut table = self.root;
        for level in 0..PT_LEVELS - 1 {
            let index = level_index(va, level);
            let entry = unsafe { (*table.as_ptr()).entries[index] };
            table = if entry_present(entry) {
                entry_table(entry)
            } else {
                let next = self.alloc_table().ok_or(MapError::OutOfMemory)?;
                let slot = unsafe { &mut (*table.as_ptr()).entries[index] };
                *slot = make_table_entry(next);
                next
            };
        }
        let slot = unsafe { &mut (*table.as_ptr()).entries[level_index(va, PT_LEVELS - 1)] };
        *slot = make_leaf_entry(pfn, flags | PteFlags::VALID);
        Ok(())
    }

    /// Clears the leaf mapping for `va`, returning the previous frame.
    pub fn clear_leaf(&mut self, va: usize) -> Option<Pfn> {
        if va % PAGE_SIZE != 0 || !is_user_addr(va) {
            return None;
        }
        let mut table = self.root;
        for level in 0..PT_LEVELS - 1 {
            let entry = unsafe { (*table.as_ptr()).entries[level_index(va, level)] };
            if !entry_present(entry) || entry_is_leaf(entry) {
                return None;
            }
            table = entry_table(entry);
        }
        let slot = unsafe { &mut (*table.as_ptr()).entries[level_index(va, PT_LEVELS - 1)] };
        if !entry_present(*slot) {
            return None;
        }
        let pfn = entry_pfn(*slot);
        *slot = 0;
        Some(pfn)
    }

    /// Visits every base-page leaf with its virtual address.
    pub fn for_each_leaf(&self, mut f: impl FnMut(usize, Pfn, PteFlags)) {
        walk_leaves(self.root, 0, 0, &mut f);
    }
}

impl Default for PageTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PageTree {
    fn drop(&mut self) {
        for page in self.owned.drain(..) {
            // SAFETY: every pointer originates from `alloc_page` and is unique.
            unsafe { drop(Box::from_raw(page.as_ptr())) };
        }
    }
}

fn walk_leaves(
    table: NonNull<TablePage>,
    level: usize,
    va_base: usize,
    f: &mut impl FnMut(usize, Pfn, PteFlags),
) {
    for index in 0..PT_ENTRIES {
        let entry = unsafe { (*table.as_ptr()).entries[index] };
        if !entry_present(entry) {
            continue;
        }
        let va = va_base + index * crate::types::level_span(level);
        if level == PT_LEVELS - 1 {
            f(va, entry_pfn(entry), entry_flags(entry));
        } else if !entry_is_leaf(entry) {
            walk_leaves(entry_table(entry), level + 1, va, f);
        }
    }
}

fn alloc_page() -> NonNull<TablePage> {
    let boxed = Box::new(TablePage::new());
    // SAFETY: Box never yields a null pointer.
    unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
}

pub(crate) fn entry_present(entry: usize) -> bool {
    entry & PteFlags::VALID.bits() != 0
}

/// A present entry that terminates translation at this level.
pub(crate) fn entry_is_leaf(entry: usize) -> bool {
    entry & (PERM_MASK.bits() | PteFlags::HUGE.bits()) != 0
}

pub(crate) fn entry_table(entry: usize) -> NonNull<TablePage> {
    let ptr = ((entry >> PFN_SHIFT) * PAGE_SIZE) as *mut TablePage;
    // SAFETY: table entries are only ever built from `alloc_page` results.
    unsafe { NonNull::new_unchecked(ptr) }
}

pub(crate) fn entry_pfn(entry: usize) -> Pfn {
    entry >> PFN_SHIFT
}

pub(crate) fn entry_flags(entry: usize) -> PteFlags {
    PteFlags::from_bits_truncate(entry)
}

pub(crate) fn make_table_entry(table: NonNull<TablePage>) -> usize {
    ((table.as_ptr() as usize / PAGE_SIZE) << PFN_SHIFT) | PteFlags::VALID.bits()
}

pub(crate) fn make_leaf_entry(pfn: Pfn, flags: PteFlags) -> usize {
    (pfn << PFN_SHIFT) | flags.bits()
}

/// Deterministic allocation-failure injection for tests.
#[cfg(feature = "failpoints")]
pub mod failpoints {
    #[cfg(not(test))]
    mod state {
        use core::sync::atomic::{AtomicUsize, Ordering};
        static DENY_IN: AtomicUsize = AtomicUsize::new(usize::MAX);
        pub(super) fn load() -> usize {
            DENY_IN.load(Ordering::SeqCst)
        }
        pub(super) fn store(v: usize) {
            DENY_IN.store(v, Ordering::SeqCst);
        }
    }

    /// Forces the next table-page allocation to fail.
    pub fn deny_next_table_alloc() {
        deny_table_alloc_after(0);
    }

    /// Lets `n` table-page allocations succeed, then fails the next one.
    pub fn deny_table_alloc_after(n: usize) {
        state::store(n);
    }

    /// Disarms any pending injection.
    pub fn clear() {
        state::store(usize::MAX);
    }

    pub(super) fn consume_table_alloc() -> bool {
        match state::load() {
            usize::MAX => false,
            0 => {
                state::store(usize::MAX);
                true
            }
            n => {
                state::store(n - 1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
