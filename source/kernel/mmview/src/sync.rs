// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table synchronizer.
//!
//! `clone_range` copies the populated leaf entries of one tree into another
//! over a byte range, walking both trees in lock-step so absent source
//! subtrees are skipped at the highest possible level. The copy is an
//! idempotent merge: destination slots that already hold a mapping are left
//! alone, which makes re-running a partially completed clone safe.
//!
//! `merge_into_base` is the switch-base work horse: it folds every
//! view-shared region of the outgoing base into the new one, adopting the
//! reverse-mapping anchors along the way. The caller flips the group's base
//! pointer afterwards.

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::error::ViewError;
use crate::frames::FrameRegistry;
use crate::hw::Hw;
use crate::pt::{
    entry_flags, entry_is_leaf, entry_pfn, entry_present, entry_table, make_leaf_entry,
    make_table_entry, PageTree, TablePage,
};
use crate::region::Region;
use crate::types::{level_span, ViewId, PT_ENTRIES, PT_LEVELS};
use crate::view::{Rss, View};

/// Leaf slots examined between voluntary reschedule points.
pub(crate) const RESCHED_INTERVAL: usize = 512;

/// Copies every populated leaf of `src_pt` inside `[start, end)` into
/// `dst_pt`, taking a frame reference and a reverse-map link for each entry
/// installed. Already-populated destination slots are skipped.
///
/// On allocation failure the clone stops where it stands; entries installed
/// so far stay installed and stay accounted. Re-issuing the clone after
/// memory pressure subsides completes the remainder.
///
/// # Panics
///
/// Panics when the source range contains a huge or device-backed leaf;
/// such mappings cannot be cloned entry-by-entry and regions carrying them
/// are rejected before they ever reach the synchronizer.
pub(crate) fn clone_range<F: FrameRegistry, H: Hw>(
    dst_pt: &mut PageTree,
    dst_rss: &Rss,
    dst_id: ViewId,
    src_pt: &PageTree,
    start: usize,
    end: usize,
    frames: &F,
    hw: &H,
) -> Result<(), ViewError> {
    let mut walk = Walk { frames, hw, dst_id, dst_rss, start, end, slots: 0 };
    let src_root = src_pt.root();
    let dst_root = dst_pt.root();
    walk.level(dst_pt, src_root, dst_root, 0, 0)
}

struct Walk<'a, F, H> {
    frames: &'a F,
    hw: &'a H,
    dst_id: ViewId,
    dst_rss: &'a Rss,
    start: usize,
    end: usize,
    slots: usize,
}

impl<F: FrameRegistry, H: Hw> Walk<'_, F, H> {
    fn level(
        &mut self,
        dst_pt: &mut PageTree,
        src_table: NonNull<TablePage>,
        dst_table: NonNull<TablePage>,
        level: usize,
        va_base: usize,
    ) -> Result<(), ViewError> {
        let span = level_span(level);
        for index in 0..PT_ENTRIES {
            let va = va_base + index * span;
            if va + span <= self.start {
                continue;
            }
            if va >= self.end {
                break;
            }
            // SAFETY: both tables are owned by trees the caller holds locks
            // on; the walk never aliases a slot it writes.
            let src_entry = unsafe { (*src_table.as_ptr()).entries[index] };
            if level == PT_LEVELS - 1 {
                self.leaf_slot(dst_table, index, src_entry);
                continue;
            }
            if !entry_present(src_entry) {
                continue;
            }
            if entry_is_leaf(src_entry) {
                panic!("cannot clone huge leaf at {va:#x}");
            }
            let dst_entry = unsafe { (*dst_table.as_ptr()).entries[index] };
            let next_dst = if entry_present(dst_entry) {
                entry_table(dst_entry)
            } else {
                let table = dst_pt.alloc_table().ok_or(ViewError::OutOfMemory)?;
                let slot = unsafe { &mut (*dst_table.as_ptr()).entries[index] };
                *slot = make_table_entry(table);
                table
            };
            self.level(dst_pt, entry_table(src_entry), next_dst, level + 1, va)?;
        }
        Ok(())
    }

    fn leaf_slot(&mut self, dst_table: NonNull<TablePage>, index: usize, src_entry: usize) {
        self.slots += 1;
        if self.slots % RESCHED_INTERVAL == 0 {
            self.hw.yield_now();
        }
        if !entry_present(src_entry) {
            return;
        }
        let slot = unsafe { &mut (*dst_table.as_ptr()).entries[index] };
        if entry_present(*slot) {
            // Idempotent merge: an existing mapping wins.
            return;
        }
        let pfn = entry_pfn(src_entry);
        self.frames.retain(pfn);
        self.frames.link_view(pfn, self.dst_id);
        self.dst_rss.add(self.frames.class_of(pfn), 1);
        *slot = make_leaf_entry(pfn, entry_flags(src_entry));
    }
}

/// Folds the shared state of `old_base` into `new_base`: for every region
/// that is view-shared and not system-shared, the region descriptor is
/// reproduced, the reverse-mapping anchor is adopted exactly once when the
/// outgoing base owns one, and the populated page-table entries are
/// cloned. A source without an anchor has no anonymous lineage to hand
/// over, so neither install nor adoption happens for it.
///
/// The caller holds the group write lock and flips the base pointer only
/// after this returns `Ok`.
pub(crate) fn merge_into_base<F: FrameRegistry, H: Hw>(
    new_base: &View,
    old_base: &View,
    frames: &F,
    hw: &H,
) -> Result<(), ViewError> {
    debug_assert_ne!(new_base.id(), old_base.id());
    let src = old_base.inner().read();
    let mut dst = new_base.inner().write();

    let shared: Vec<Region> = src
        .regions
        .iter()
        .filter(|r| r.view_shared && !r.system_shared)
        .cloned()
        .collect();

    for region in &shared {
        dst.regions.ensure(region)?;
        if frames.has_anchor(old_base.id(), region.start)
            && !frames.has_anchor(new_base.id(), region.start)
            && frames.install_anchor(new_base.id(), region.start)
        {
            frames.adopt_anon_lineage(
                (old_base.id(), region.start),
                (new_base.id(), region.start),
            );
        }
        let dst = &mut *dst;
        clone_range(
            &mut dst.pt,
            new_base.rss(),
            new_base.id(),
            &src.pt,
            region.start,
            region.end,
            frames,
            hw,
        )?;
    }
    log_debug!(target: "mmview", "merged {} shared regions into view {}", shared.len(), new_base.id());
    Ok(())
}
