// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recording capability doubles shared by the unit tests.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::frames::{FrameRegistry, PageClass, Pfn};
use crate::hw::Hw;
use crate::types::{ThreadId, ViewId};

/// Frame registry double: counts references, records reverse-map links,
/// anchors and lineage adoptions.
#[derive(Default)]
pub(crate) struct TestFrames {
    counts: Mutex<BTreeMap<Pfn, isize>>,
    links: Mutex<BTreeSet<(u64, Pfn)>>,
    anchors: Mutex<BTreeSet<(u64, usize)>>,
    adoptions: Mutex<Vec<((u64, usize), (u64, usize))>>,
    classes: Mutex<BTreeMap<Pfn, PageClass>>,
    retain_calls: AtomicUsize,
}

impl TestFrames {
    /// Total number of `retain` calls seen.
    pub(crate) fn retains(&self) -> usize {
        self.retain_calls.load(Ordering::Relaxed)
    }

    /// Sum of retains minus releases over all frames.
    pub(crate) fn refs_balance(&self) -> isize {
        self.counts.lock().values().sum()
    }

    /// Whether `view` currently sits in the reverse-map set of `pfn`.
    pub(crate) fn linked(&self, pfn: Pfn, view: ViewId) -> bool {
        self.links.lock().contains(&(view.as_raw(), pfn))
    }

    /// Whether the anchor for (`view`, `region_start`) is installed.
    pub(crate) fn anchored(&self, view: ViewId, region_start: usize) -> bool {
        self.anchors.lock().contains(&(view.as_raw(), region_start))
    }

    /// Whether a lineage adoption from `src` to `dst` was recorded.
    pub(crate) fn adopted(&self, src: (ViewId, usize), dst: (ViewId, usize)) -> bool {
        let src = (src.0.as_raw(), src.1);
        let dst = (dst.0.as_raw(), dst.1);
        self.adoptions.lock().iter().any(|&(s, d)| s == src && d == dst)
    }

    /// Accounts `pfn` under `class` instead of the default `Anon`.
    pub(crate) fn set_class(&self, pfn: Pfn, class: PageClass) {
        self.classes.lock().insert(pfn, class);
    }
}

impl FrameRegistry for TestFrames {
    fn retain(&self, pfn: Pfn) {
        self.retain_calls.fetch_add(1, Ordering::Relaxed);
        *self.counts.lock().entry(pfn).or_insert(0) += 1;
    }

    fn release(&self, pfn: Pfn) {
        *self.counts.lock().entry(pfn).or_insert(0) -= 1;
    }

    fn link_view(&self, pfn: Pfn, view: ViewId) {
        self.links.lock().insert((view.as_raw(), pfn));
    }

    fn unlink_view(&self, pfn: Pfn, view: ViewId) {
        self.links.lock().remove(&(view.as_raw(), pfn));
    }

    fn class_of(&self, pfn: Pfn) -> PageClass {
        self.classes.lock().get(&pfn).copied().unwrap_or(PageClass::Anon)
    }

    fn has_anchor(&self, view: ViewId, region_start: usize) -> bool {
        self.anchored(view, region_start)
    }

    fn install_anchor(&self, view: ViewId, region_start: usize) -> bool {
        self.anchors.lock().insert((view.as_raw(), region_start))
    }

    fn adopt_anon_lineage(&self, src: (ViewId, usize), dst: (ViewId, usize)) {
        self.adoptions
            .lock()
            .push(((src.0.as_raw(), src.1), (dst.0.as_raw(), dst.1)));
    }
}

/// One recorded hardware call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HwEvent {
    Flush(ThreadId),
    Switch { old: usize, new: usize },
    Yield,
}

/// Hardware double recording the call sequence.
#[derive(Default)]
pub(crate) struct TestHw {
    events: Mutex<Vec<HwEvent>>,
}

impl TestHw {
    pub(crate) fn events(&self) -> Vec<HwEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Hw for TestHw {
    fn flush_thread_cache(&self, thread: ThreadId) {
        self.events.lock().push(HwEvent::Flush(thread));
    }

    fn switch_context(&self, old_root: usize, new_root: usize) {
        self.events.lock().push(HwEvent::Switch { old: old_root, new: new_root });
    }

    fn yield_now(&self) {
        self.events.lock().push(HwEvent::Yield);
    }
}

/// Hardware double counting only the voluntary yields.
#[derive(Default)]
pub(crate) struct CountingHw {
    yields: AtomicUsize,
}

impl CountingHw {
    pub(crate) fn yields(&self) -> usize {
        self.yields.load(Ordering::Relaxed)
    }
}

impl Hw for CountingHw {
    fn flush_thread_cache(&self, _thread: ThreadId) {}

    fn switch_context(&self, _old_root: usize, _new_root: usize) {}

    fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }
}
