// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Multi-view address spaces for a single process.
//!
//! A process owns a *sibling group* of address-space views. Threads switch
//! between views at will; regions marked view-shared are propagated between
//! a view and the canonical *base* view during cloning and base promotion,
//! while all other regions stay private to the view that mutated them.
//!
//! The crate implements the view lifecycle (create, migrate, delete,
//! switch-base), the region share/unshare mechanism and the 4-level
//! page-table synchronizer. Page-frame accounting and the hardware context
//! switch are consumed as capabilities ([`frames::FrameRegistry`],
//! [`hw::Hw`]); the embedding kernel provides them.

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
pub mod log;

pub mod error;
pub mod frames;
pub mod hw;
pub mod lifecycle;
pub mod ops;
pub mod pt;
pub mod region;
pub mod sync;
pub mod thread;
pub mod types;
pub mod view;

#[cfg(test)]
pub(crate) mod test_util;

#[cfg(test)]
mod tests_prop;

pub use error::ViewError;
pub use frames::{FrameRegistry, PageClass, Pfn};
pub use hw::{Hw, NullHw};
pub use ops::{dispatch, dispatch_raw, Args, Context};
pub use region::{AccessFlags, Region, RegionTable};
pub use thread::ThreadCtx;
pub use types::{ThreadId, ViewId, PAGE_SIZE};
pub use view::{View, ViewGroup};
