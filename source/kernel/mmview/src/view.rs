// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Address-space views and the sibling group.
//!
//! A view couples a region table with a page-table tree behind one
//! reader/writer lock and carries two reference counts:
//!
//! * `active` — threads currently running with the view active, plus one
//!   reference held on behalf of the AVAILABLE flag, plus temporary pins.
//! * `structural` — everything keeping the storage alive: sibling-group
//!   membership plus one collective reference held while `active > 0`.
//!
//! The active count reaching zero releases the page tables and regions;
//! the structural count reaching zero (strictly afterwards) unlinks the
//! view from its group. Each zero transition is observed by exactly one
//! decrementer, which owns the corresponding teardown step.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicIsize, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::RwLock;

use crate::frames::{FrameRegistry, PageClass};
use crate::pt::PageTree;
use crate::region::RegionTable;
use crate::types::ViewId;

/// The view may be reached through lookups and migrated to.
const VIEW_AVAILABLE: u32 = 1 << 0;

/// Per-class residency counters of one view.
///
/// Signed: threads batch their deltas and flush them out of order, so a
/// counter may transiently dip below zero between flushes.
#[derive(Debug, Default)]
pub struct Rss([AtomicIsize; PageClass::COUNT]);

impl Rss {
    /// Pages accounted under `class`.
    pub fn get(&self, class: PageClass) -> isize {
        self.0[class as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, class: PageClass, pages: usize) {
        self.0[class as usize].fetch_add(pages as isize, Ordering::Relaxed);
    }

    pub(crate) fn apply_delta(&self, class: PageClass, delta: isize) {
        self.0[class as usize].fetch_add(delta, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in &self.0 {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Mapping state of a view: its regions and its page-table tree.
pub struct ViewInner {
    pub regions: RegionTable,
    pub pt: PageTree,
}

/// One address-space view of a sibling group.
pub struct View {
    id: ViewId,
    flags: AtomicU32,
    active: AtomicUsize,
    structural: AtomicUsize,
    rss: Rss,
    inner: RwLock<ViewInner>,
}

impl View {
    fn new(id: ViewId, regions: RegionTable, pt: PageTree, active: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            flags: AtomicU32::new(VIEW_AVAILABLE),
            active: AtomicUsize::new(active),
            // Membership plus the collective active-block reference.
            structural: AtomicUsize::new(2),
            rss: Rss::default(),
            inner: RwLock::new(ViewInner { regions, pt }),
        })
    }

    /// Identifier of the view.
    pub fn id(&self) -> ViewId {
        self.id
    }

    /// Whether the view can still be found and migrated to.
    pub fn is_available(&self) -> bool {
        self.flags.load(Ordering::Acquire) & VIEW_AVAILABLE != 0
    }

    /// Residency counters.
    pub fn rss(&self) -> &Rss {
        &self.rss
    }

    /// Current active reference count.
    pub fn active_refs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Current structural reference count.
    pub fn structural_refs(&self) -> usize {
        self.structural.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &RwLock<ViewInner> {
        &self.inner
    }

    /// One-way transition out of AVAILABLE. Returns whether this call
    /// performed the transition.
    fn clear_available(&self) -> bool {
        self.flags.fetch_and(!VIEW_AVAILABLE, Ordering::AcqRel) & VIEW_AVAILABLE != 0
    }

    /// Takes an additional active reference. Callers must already be
    /// guaranteed `active > 0` (lookup under the group lock while the
    /// AVAILABLE reference is held, or an existing pin).
    pub(crate) fn pin_active(&self) {
        let prev = self.active.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "pin on a drained view");
    }

    /// Builds an unlinked sibling view holding only the AVAILABLE active
    /// reference. Invisible to lookups until linked under the group write
    /// lock.
    pub(crate) fn new_sibling(id: ViewId, regions: RegionTable) -> Arc<Self> {
        Self::new(id, regions, PageTree::new(), 1)
    }

    /// Releases the mapping state: drops every frame reference and
    /// reverse-map registration, then empties the tree and region list.
    pub(crate) fn release_mappings<F: FrameRegistry>(&self, frames: &F) {
        let mut inner = self.inner.write();
        inner.pt.for_each_leaf(|_va, pfn, _flags| {
            frames.unlink_view(pfn, self.id);
            frames.release(pfn);
        });
        inner.pt = PageTree::new();
        inner.regions = RegionTable::new();
        self.rss.reset();
        log_info!(target: "mmview", "view {} mappings released", self.id);
    }
}

pub(crate) struct GroupInner {
    members: BTreeMap<ViewId, Arc<View>>,
    base: ViewId,
}

/// The sibling group: every view descended from one process's original
/// address space, plus the current base pointer.
pub struct ViewGroup {
    inner: RwLock<GroupInner>,
    next: AtomicU64,
}

impl ViewGroup {
    /// Creates a group seeded with the base view built from the process's
    /// initial regions and page tables.
    pub fn new(regions: RegionTable, pt: PageTree) -> Self {
        let base = View::new(ViewId::BASE, regions, pt, 1);
        let mut members = BTreeMap::new();
        members.insert(ViewId::BASE, base);
        Self {
            inner: RwLock::new(GroupInner { members, base: ViewId::BASE }),
            next: AtomicU64::new(ViewId::BASE.next().as_raw()),
        }
    }

    /// Id of the current base view.
    pub fn base_id(&self) -> ViewId {
        self.inner.read().base
    }

    /// Number of linked views, deleted-but-referenced ones included.
    pub fn view_count(&self) -> usize {
        self.inner.read().members.len()
    }

    /// Whether the group still contains only the base view.
    pub fn is_singleton(&self) -> bool {
        self.view_count() == 1
    }

    /// Looks up `id` and takes an active pin on it. Deleted views are not
    /// found.
    pub(crate) fn lookup_available(&self, id: ViewId) -> Option<Arc<View>> {
        let inner = self.inner.read();
        let view = inner.members.get(&id)?;
        if !view.is_available() {
            return None;
        }
        view.pin_active();
        Some(Arc::clone(view))
    }

    /// Returns the view stored under `id` regardless of availability.
    /// Deleted views still show up here while active users keep them
    /// linked.
    pub fn get(&self, id: ViewId) -> Option<Arc<View>> {
        self.inner.read().members.get(&id).map(Arc::clone)
    }

    /// Returns the current base view.
    pub(crate) fn base(&self) -> Arc<View> {
        let inner = self.inner.read();
        // Invariant: the base is always a member.
        Arc::clone(&inner.members[&inner.base])
    }

    /// Hands out the next view id. Monotonic, never reused, even when the
    /// view the id was reserved for is never linked.
    pub(crate) fn allocate_id(&self) -> ViewId {
        ViewId::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Links a fully built sibling into the group.
    pub(crate) fn link(inner: &mut GroupInnerGuard<'_>, view: Arc<View>) {
        let prev = inner.members.insert(view.id(), view);
        debug_assert!(prev.is_none(), "view id linked twice");
    }

    pub(crate) fn write(&self) -> GroupInnerGuard<'_> {
        self.inner.write()
    }

    pub(crate) fn read(&self) -> spin::RwLockReadGuard<'_, GroupInner> {
        self.inner.read()
    }

    /// Drops one active reference. The count reaching zero releases the
    /// mappings and drops the collective structural reference.
    pub(crate) fn put_active<F: FrameRegistry>(&self, view: &Arc<View>, frames: &F) {
        let prev = view.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "active refcount underflow");
        if prev == 1 {
            view.release_mappings(frames);
            self.put_structural(view);
        }
    }

    /// Drops one structural reference; the count reaching zero unlinks the
    /// view from the group.
    pub(crate) fn put_structural(&self, view: &Arc<View>) {
        let prev = view.structural.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "structural refcount underflow");
        if prev == 1 {
            let mut inner = self.inner.write();
            debug_assert_ne!(inner.base, view.id, "base view reclaimed");
            inner.members.remove(&view.id);
            log_info!(target: "mmview", "view {} reclaimed", view.id);
        }
    }

    /// Marks `id` deleted. Fails when the id is unknown or already deleted
    /// (`None`) and must not be called on the base. Returns the view so the
    /// caller can drop the membership references after releasing the lock.
    pub(crate) fn unlink_flag(inner: &mut GroupInnerGuard<'_>, id: ViewId) -> Option<Arc<View>> {
        let view = inner.members.get(&id)?;
        if !view.clear_available() {
            return None;
        }
        Some(Arc::clone(view))
    }

    /// Reassigns the base pointer. Caller holds the group write lock.
    pub(crate) fn set_base(inner: &mut GroupInnerGuard<'_>, id: ViewId) {
        debug_assert!(inner.members.contains_key(&id), "base must be a member");
        inner.base = id;
    }

    /// Per-process teardown: releases every member's mappings and empties
    /// the group. Called by the process lifecycle when the last structural
    /// reference on the process itself is dropped.
    pub fn teardown<F: FrameRegistry>(&self, frames: &F) {
        let mut inner = self.inner.write();
        for view in inner.members.values() {
            view.release_mappings(frames);
        }
        inner.members.clear();
    }
}

pub(crate) type GroupInnerGuard<'a> = spin::RwLockWriteGuard<'a, GroupInner>;

impl GroupInner {
    pub(crate) fn base_id(&self) -> ViewId {
        self.base
    }

    pub(crate) fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn member(&self, id: ViewId) -> Option<&Arc<View>> {
        self.members.get(&id)
    }

    pub(crate) fn base_view(&self) -> Arc<View> {
        Arc::clone(&self.members[&self.base])
    }
}
