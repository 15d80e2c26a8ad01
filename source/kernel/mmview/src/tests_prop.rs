// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Property tests over the region table, the synchronizer and id
//! assignment.

use proptest::prelude::*;

use crate::frames::PageClass;
use crate::hw::NullHw;
use crate::lifecycle;
use crate::pt::{PageTree, PteFlags};
use crate::region::{AccessFlags, Region, RegionTable};
use crate::sync::clone_range;
use crate::test_util::TestFrames;
use crate::thread::ThreadCtx;
use crate::types::{ThreadId, ViewId, PAGE_SIZE};
use crate::view::{Rss, ViewGroup};

fn anon(start: usize, end: usize) -> Region {
    Region {
        start,
        end,
        access: AccessFlags::READ | AccessFlags::WRITE,
        granule: PAGE_SIZE,
        system_shared: false,
        view_shared: false,
    }
}

proptest! {
    /// Sharing then unsharing an arbitrary page-aligned subrange leaves
    /// every flag cleared and the covered byte count unchanged, whatever
    /// splits persisted.
    #[test]
    fn share_then_unshare_restores_flags_and_coverage(
        total in 4usize..64,
        off in 0usize..32,
        len_pages in 1usize..32,
    ) {
        prop_assume!(off < total);
        let len_pages = len_pages.min(total - off);
        let mut table = RegionTable::new();
        table.insert(anon(PAGE_SIZE, (1 + total) * PAGE_SIZE)).unwrap();
        let addr = (1 + off) * PAGE_SIZE;
        let len = len_pages * PAGE_SIZE;

        table.set_shared(addr, len, true).unwrap();
        for r in table.iter() {
            let inside = r.start >= addr && r.end <= addr + len;
            prop_assert_eq!(r.view_shared, inside);
        }

        table.set_shared(addr, len, false).unwrap();
        prop_assert!(table.iter().all(|r| !r.view_shared));
        let covered: usize = table.iter().map(|r| r.len()).sum();
        prop_assert_eq!(covered, total * PAGE_SIZE);
    }

    /// Cloning any page set twice takes exactly one frame reference per
    /// page: the second pass finds every destination slot populated.
    #[test]
    fn clone_is_idempotent_for_any_page_set(
        pages in prop::collection::btree_set(0usize..512, 1..32),
    ) {
        let frames = TestFrames::default();
        let mut src = PageTree::new();
        for &p in &pages {
            src.install_leaf(p * PAGE_SIZE, p + 1, PteFlags::READ).unwrap();
        }
        let mut dst = PageTree::new();
        let rss = Rss::default();
        for _ in 0..2 {
            clone_range(
                &mut dst,
                &rss,
                ViewId::BASE,
                &src,
                0,
                512 * PAGE_SIZE,
                &frames,
                &NullHw,
            )
            .unwrap();
        }
        prop_assert_eq!(frames.retains(), pages.len());
        prop_assert_eq!(rss.get(PageClass::Anon), pages.len() as isize);
    }

    /// View ids grow strictly across any interleaving of creates and
    /// deletes; deletion never frees an id for reuse.
    #[test]
    fn view_ids_strictly_increase(ops in prop::collection::vec(any::<bool>(), 1..16)) {
        let frames = TestFrames::default();
        let group = ViewGroup::new(RegionTable::new(), PageTree::new());
        let thread = ThreadCtx::attach(&group, ThreadId(1), ThreadId(1));
        let mut last = ViewId::BASE.as_raw();
        let mut live = alloc::vec::Vec::new();
        for &create in &ops {
            if create || live.is_empty() {
                let id = lifecycle::create(&group, &thread, &frames, &NullHw).unwrap();
                prop_assert!(id.as_raw() > last);
                last = id.as_raw();
                live.push(id);
            } else {
                let id = live.pop().unwrap();
                lifecycle::delete(&group, id, &frames).unwrap();
            }
        }
    }
}
