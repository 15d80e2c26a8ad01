// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Newtypes and paging constants shared across the subsystem.

use core::fmt;

use static_assertions::const_assert_eq;

/// Size of a base page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Entries per page-table page.
pub const PT_ENTRIES: usize = 512;
/// Page-table depth: top, upper, middle, leaf.
pub const PT_LEVELS: usize = 4;
/// Bits translated per level.
pub const LEVEL_BITS: usize = 9;
/// Highest user-addressable byte plus one (lower canonical half).
pub const USER_SPAN: usize = 1 << (PT_LEVELS * LEVEL_BITS + 12 - 1);

const_assert_eq!(PT_ENTRIES, 1 << LEVEL_BITS);
const_assert_eq!(PAGE_SIZE, 1 << 12);

/// Identifier of an address-space view.
///
/// Assigned monotonically at view creation and never reused within a
/// sibling group. The base view of a fresh group always holds [`ViewId::BASE`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
    /// Id of the initial base view of every sibling group.
    pub const BASE: ViewId = ViewId(0);

    /// Wraps a raw id received from the operation surface.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw representation of the id.
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a thread as known to the embedding kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadId(pub u32);

/// Returns `addr` rounded down to the base-page boundary.
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Returns `addr` rounded up to the base-page boundary, saturating at the
/// top of the address space.
pub const fn page_round_up(addr: usize) -> usize {
    match addr.checked_add(PAGE_SIZE - 1) {
        Some(v) => v & !(PAGE_SIZE - 1),
        None => usize::MAX & !(PAGE_SIZE - 1),
    }
}

/// Checks that `addr` lies in the user-addressable span.
pub const fn is_user_addr(addr: usize) -> bool {
    addr < USER_SPAN
}

/// Per-level table index of `va`, level 0 being the top level.
pub const fn level_index(va: usize, level: usize) -> usize {
    (va >> (12 + LEVEL_BITS * (PT_LEVELS - 1 - level))) & (PT_ENTRIES - 1)
}

/// Span in bytes covered by one entry at `level`.
pub const fn level_span(level: usize) -> usize {
    1 << (12 + LEVEL_BITS * (PT_LEVELS - 1 - level))
}
