// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Region table and the share/unshare range mechanism.
//!
//! A region is a contiguous mapped extent with access flags and the
//! cross-view-sharing attribute. `set_shared` splits regions at the range
//! boundaries and flips `view_shared` on every region fully inside the
//! range; the singleton-group precondition is enforced one layer up, in the
//! lifecycle manager, which also holds the owning view's write lock across
//! the whole call.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::ViewError;
use crate::types::{is_user_addr, page_round_up, PAGE_SIZE, USER_SPAN};

/// Default bound on region descriptors per address space.
pub const MAX_REGIONS: usize = 65_530;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Access protection of a region.
    pub struct AccessFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

/// A contiguous virtual-memory extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// First byte of the region.
    pub start: usize,
    /// One past the last byte.
    pub end: usize,
    /// Access protection.
    pub access: AccessFlags,
    /// Native page granularity; exceeds `PAGE_SIZE` for large-page regions.
    pub granule: usize,
    /// Shared outside the view mechanism (mapped file, shm). Immutable here.
    pub system_shared: bool,
    /// Whether page-table entries propagate between this view and the base.
    pub view_shared: bool,
}

impl Region {
    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the region is empty. Never true for a stored region.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Ordered region list of one view, bounded by a descriptor limit.
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: BTreeMap<usize, Region>,
    limit: usize,
}

impl RegionTable {
    /// Creates an empty table with the default descriptor limit.
    pub fn new() -> Self {
        Self::with_limit(MAX_REGIONS)
    }

    /// Creates an empty table bounded by `limit` descriptors.
    pub fn with_limit(limit: usize) -> Self {
        Self { regions: BTreeMap::new(), limit }
    }

    /// Number of region descriptors in use.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the table holds no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Iterates regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Returns the region whose extent contains `addr`.
    pub fn find(&self, addr: usize) -> Option<&Region> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.end > addr)
    }

    /// Returns the region starting exactly at `start`.
    pub fn at(&self, start: usize) -> Option<&Region> {
        self.regions.get(&start)
    }

    /// Installs a new region. The extent must be granule-aligned, inside
    /// the user span and must not overlap an existing region.
    pub fn insert(&mut self, region: Region) -> Result<(), ViewError> {
        if region.is_empty()
            || region.granule < PAGE_SIZE
            || region.start % region.granule != 0
            || region.end % region.granule != 0
            || !is_user_addr(region.start)
            || region.end > USER_SPAN
        {
            return Err(ViewError::InvalidArgument);
        }
        if self.overlapping(region.start, region.end).next().is_some() {
            return Err(ViewError::InvalidArgument);
        }
        self.charge_descriptor()?;
        self.regions.insert(region.start, region);
        Ok(())
    }

    /// Locates the region starting at `template.start`, creating it from
    /// the template if absent. Returns whether a region was created.
    pub fn ensure(&mut self, template: &Region) -> Result<bool, ViewError> {
        if self.regions.contains_key(&template.start) {
            return Ok(false);
        }
        self.charge_descriptor()?;
        self.regions.insert(template.start, template.clone());
        Ok(true)
    }

    /// Applies the requested sharing mode to `[addr, addr + len)`.
    ///
    /// Validation order keeps `InvalidArgument` and `PermissionDenied`
    /// strictly ahead of any mutation; only `OutOfMemory` from a boundary
    /// split can leave the range split without the flags applied.
    pub fn set_shared(&mut self, addr: usize, len: usize, shared: bool) -> Result<(), ViewError> {
        if addr % PAGE_SIZE != 0 || !is_user_addr(addr) {
            return Err(ViewError::InvalidArgument);
        }
        let len = page_round_up(len);
        if len == 0 || len > USER_SPAN - addr {
            return Err(ViewError::InvalidArgument);
        }
        let end = addr + len;

        if self.overlapping(addr, end).next().is_none() {
            return Err(ViewError::InvalidArgument);
        }
        // Boundaries falling strictly inside a region must respect that
        // region's native page granularity.
        for boundary in [addr, end] {
            if let Some(r) = self.find(boundary) {
                if r.start < boundary && boundary % r.granule != 0 {
                    return Err(ViewError::InvalidArgument);
                }
            }
        }
        // Pre-scan: sharing-mode changes never touch system-shared regions.
        if self.overlapping(addr, end).any(|r| r.system_shared) {
            return Err(ViewError::PermissionDenied);
        }

        self.split_at(addr)?;
        self.split_at(end)?;

        let starts: alloc::vec::Vec<usize> =
            self.overlapping(addr, end).map(|r| r.start).collect();
        for start in starts {
            if let Some(r) = self.regions.get_mut(&start) {
                debug_assert!(r.start >= addr && r.end <= end);
                r.view_shared = shared;
            }
        }
        Ok(())
    }

    fn overlapping(&self, start: usize, end: usize) -> impl Iterator<Item = &Region> {
        self.regions.range(..end).map(|(_, r)| r).filter(move |r| r.end > start)
    }

    /// Splits the region containing `boundary` so that `boundary` becomes a
    /// region edge. No-op when the boundary already falls on an edge or in
    /// a gap.
    fn split_at(&mut self, boundary: usize) -> Result<(), ViewError> {
        let Some((start, end)) = self
            .regions
            .range(..boundary)
            .next_back()
            .map(|(s, r)| (*s, r.end))
            .filter(|(_, e)| *e > boundary)
        else {
            return Ok(());
        };
        self.charge_descriptor()?;
        let Some(head) = self.regions.get_mut(&start) else {
            return Ok(());
        };
        head.end = boundary;
        let mut tail = head.clone();
        tail.start = boundary;
        tail.end = end;
        self.regions.insert(boundary, tail);
        Ok(())
    }

    fn charge_descriptor(&self) -> Result<(), ViewError> {
        #[cfg(feature = "failpoints")]
        if failpoints::consume_region_alloc() {
            return Err(ViewError::OutOfMemory);
        }
        if self.regions.len() >= self.limit {
            return Err(ViewError::OutOfMemory);
        }
        Ok(())
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic descriptor-exhaustion injection for tests.
#[cfg(feature = "failpoints")]
pub mod failpoints {
    #[cfg(not(test))]
    mod state {
        use core::sync::atomic::{AtomicBool, Ordering};
        static DENY: AtomicBool = AtomicBool::new(false);
        pub(super) fn swap(v: bool) -> bool {
            DENY.swap(v, Ordering::SeqCst)
        }
    }

    /// Forces the next region-descriptor allocation to fail.
    pub fn deny_next_region_alloc() {
        let _ = state::swap(true);
    }

    pub(super) fn consume_region_alloc() -> bool {
        state::swap(false)
    }
}
