// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical-page registry capability.
//!
//! The subsystem never owns page frames; it issues reference-count and
//! reverse-mapping bookkeeping against the registry the embedding kernel
//! provides. One registry instance serves a whole sibling group.

use crate::types::ViewId;

/// Page-frame number as understood by the embedding kernel.
pub type Pfn = usize;

/// Residency class a mapped page is accounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// Anonymous memory.
    Anon = 0,
    /// File-backed memory.
    File = 1,
    /// Shared-memory segments.
    Shmem = 2,
}

impl PageClass {
    /// Number of residency classes.
    pub const COUNT: usize = 3;
}

/// Reference-count and reverse-mapping operations on physical pages.
pub trait FrameRegistry {
    /// Acquires one reference on `pfn`.
    fn retain(&self, pfn: Pfn);

    /// Drops one reference on `pfn`.
    fn release(&self, pfn: Pfn);

    /// Registers `view` in the reverse-mapping set of `pfn`.
    fn link_view(&self, pfn: Pfn, view: ViewId);

    /// Removes `view` from the reverse-mapping set of `pfn`.
    fn unlink_view(&self, pfn: Pfn, view: ViewId);

    /// Residency class `pfn` is accounted under.
    fn class_of(&self, pfn: Pfn) -> PageClass;

    /// Whether the region at (`view`, `region_start`) owns a reverse-mapping
    /// anchor.
    fn has_anchor(&self, view: ViewId, region_start: usize) -> bool;

    /// Installs the reverse-mapping anchor for (`view`, `region_start`).
    ///
    /// Single-assignment semantics: returns `true` only for the caller that
    /// actually installed it; a concurrent or earlier assignment makes this
    /// return `false`.
    fn install_anchor(&self, view: ViewId, region_start: usize) -> bool;

    /// Clones the anonymous-mapping lineage from `src` to `dst` so both
    /// trees can resolve copy-on-write against the shared ancestry.
    fn adopt_anon_lineage(&self, src: (ViewId, usize), dst: (ViewId, usize));
}
