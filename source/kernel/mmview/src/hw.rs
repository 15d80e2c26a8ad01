// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware capability consumed by the lifecycle engine.
//!
//! Translation-cache maintenance, the address-space switch itself and
//! scheduler cooperation live in the embedding kernel. The subsystem only
//! states *when* they must happen: the cache flush strictly precedes the
//! active-view pointer swap, and the swap plus switch run with preemption
//! off on the calling thread.

use crate::types::ThreadId;

/// Hardware operations required by view migration and cloning.
pub trait Hw {
    /// Invalidates the per-thread address-translation cache of `thread`.
    fn flush_thread_cache(&self, thread: ThreadId);

    /// Performs the hardware switch from the page-table root `old_root` to
    /// `new_root`. Called with preemption off, after the cache flush.
    fn switch_context(&self, old_root: usize, new_root: usize);

    /// Cooperative yield point used by long page-table walks.
    fn yield_now(&self) {}

    /// Runs `f` with interrupts/preemption disabled on the calling thread.
    fn with_preemption_off<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// No-op hardware backend for embedders that switch contexts elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHw;

impl Hw for NullHw {
    fn flush_thread_cache(&self, _thread: ThreadId) {}

    fn switch_context(&self, _old_root: usize, _new_root: usize) {}
}
