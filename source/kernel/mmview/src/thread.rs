// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-thread view attachment.
//!
//! Each thread owns a pointer to its active view plus a batch of residency
//! deltas not yet folded into that view's counters. Only the owning thread
//! mutates this state, always under the thread's own lock; the lifecycle
//! manager additionally disables preemption across the hardware switch.

use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::frames::{FrameRegistry, PageClass};
use crate::types::{ThreadId, ViewId};
use crate::view::{View, ViewGroup};

pub(crate) struct ThreadState {
    pub(crate) current: Arc<View>,
    pending: [isize; PageClass::COUNT],
}

impl ThreadState {
    /// Folds the batched residency deltas into the current view.
    pub(crate) fn flush_rss(&mut self) {
        for class in [PageClass::Anon, PageClass::File, PageClass::Shmem] {
            let delta = core::mem::take(&mut self.pending[class as usize]);
            if delta != 0 {
                self.current.rss().apply_delta(class, delta);
            }
        }
    }
}

/// A thread's attachment to its sibling group.
pub struct ThreadCtx {
    id: ThreadId,
    leader: ThreadId,
    state: Mutex<ThreadState>,
}

impl ThreadCtx {
    /// Attaches a thread to the group's current base view.
    pub fn attach(group: &ViewGroup, id: ThreadId, leader: ThreadId) -> Self {
        let base = group.base();
        base.pin_active();
        Self {
            id,
            leader,
            state: Mutex::new(ThreadState { current: base, pending: [0; PageClass::COUNT] }),
        }
    }

    /// Thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Group leader's thread id.
    pub fn leader(&self) -> ThreadId {
        self.leader
    }

    /// Id of the thread's active view.
    pub fn current_view_id(&self) -> ViewId {
        self.state.lock().current.id()
    }

    /// The thread's active view.
    pub(crate) fn current_view(&self) -> Arc<View> {
        Arc::clone(&self.state.lock().current)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock()
    }

    /// Records a residency delta observed by the fault path; folded into
    /// the view's counters at the next migration or detach.
    pub fn note_rss(&self, class: PageClass, delta: isize) {
        self.state.lock().pending[class as usize] += delta;
    }

    /// Detaches on thread exit: flushes residency deltas and drops the
    /// active reference on the current view.
    pub fn detach<F: FrameRegistry>(self, group: &ViewGroup, frames: &F) {
        let mut state = self.state.into_inner();
        state.flush_rss();
        group.put_active(&state.current, frames);
    }
}
