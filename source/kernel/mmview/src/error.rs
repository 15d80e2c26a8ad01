// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy reported by every lifecycle operation.

use core::fmt;

use crate::pt::MapError;

/// Error returned by the view lifecycle operations.
///
/// `InvalidArgument` and `PermissionDenied` are always detected before any
/// mutation; `OutOfMemory` during page-table population may leave the
/// destination view partially populated (no rollback, the destination is
/// reclaimed through the normal teardown path).
#[must_use = "lifecycle errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    /// Unknown view id, misaligned or out-of-range address range, or a
    /// zero-length range.
    InvalidArgument,
    /// Sharing-mode change after views exist, deleting the base view, or
    /// touching a system-shared region.
    PermissionDenied,
    /// Page-table page or region-descriptor allocation failed.
    OutOfMemory,
}

impl ViewError {
    /// Negative errno-style encoding used by the raw operation surface.
    pub const fn errno(self) -> isize {
        match self {
            Self::InvalidArgument => -22,
            Self::PermissionDenied => -1,
            Self::OutOfMemory => -12,
        }
    }
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidArgument => "invalid argument",
            Self::PermissionDenied => "permission denied",
            Self::OutOfMemory => "out of memory",
        };
        f.write_str(text)
    }
}

impl From<MapError> for ViewError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::Unaligned | MapError::OutOfRange => Self::InvalidArgument,
            MapError::OutOfMemory => Self::OutOfMemory,
        }
    }
}
