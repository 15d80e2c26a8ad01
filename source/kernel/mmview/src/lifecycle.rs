// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! View lifecycle operations.
//!
//! Everything here runs on behalf of a calling thread against its sibling
//! group. Locking follows one order throughout the crate: group lock before
//! any per-view lock, thread lock only with no group lock held.

use crate::error::ViewError;
use crate::frames::FrameRegistry;
use crate::hw::Hw;
use crate::sync;
use crate::thread::ThreadCtx;
use crate::types::ViewId;
use crate::view::{View, ViewGroup};

/// Creates a new view cloned from the group's base: same regions, every
/// populated page mapped by reference. Returns the new view's id.
///
/// The clone runs under the group *read* lock: membership and the base
/// pointer stay put, while lookups keep working and the walker's yield
/// points stay meaningful. The new view is invisible until the final link
/// under the write lock; nothing runs on it until a thread migrates there.
pub fn create<F: FrameRegistry, H: Hw>(
    group: &ViewGroup,
    thread: &ThreadCtx,
    frames: &F,
    hw: &H,
) -> Result<ViewId, ViewError> {
    let view = {
        let guard = group.read();
        // Stale per-thread translation state must not leak into the clone.
        hw.flush_thread_cache(thread.leader());
        let base = guard.base_view();
        let src = base.inner().read();
        let view = View::new_sibling(group.allocate_id(), src.regions.clone());
        let mut clone_result = Ok(());
        {
            let mut dst = view.inner().write();
            let dst = &mut *dst;
            for region in src.regions.iter() {
                clone_result = sync::clone_range(
                    &mut dst.pt,
                    view.rss(),
                    view.id(),
                    &src.pt,
                    region.start,
                    region.end,
                    frames,
                    hw,
                );
                if clone_result.is_err() {
                    break;
                }
            }
        }
        if let Err(err) = clone_result {
            drop(src);
            drop(guard);
            // Never linked: hand the frame references back and drop the
            // storage.
            view.release_mappings(frames);
            log_warn!(target: "mmview", "view creation failed: {}", err);
            return Err(err);
        }
        view
    };
    let id = view.id();
    {
        let mut inner = group.write();
        ViewGroup::link(&mut inner, view);
    }
    log_info!(target: "mmview", "view {} created", id);
    Ok(id)
}

/// Switches the calling thread to view `id`. Returns the previous view's
/// id. Unknown or deleted ids fail with `InvalidArgument` and leave the
/// thread's pointer untouched.
pub fn migrate<F: FrameRegistry, H: Hw>(
    group: &ViewGroup,
    thread: &ThreadCtx,
    id: ViewId,
    frames: &F,
    hw: &H,
) -> Result<ViewId, ViewError> {
    let target = group.lookup_available(id).ok_or(ViewError::InvalidArgument)?;
    let previous = hw.with_preemption_off(|| {
        let mut state = thread.lock();
        hw.flush_thread_cache(thread.id());
        state.flush_rss();
        let old_root = state.current.inner().read().pt.root_ppn();
        let new_root = target.inner().read().pt.root_ppn();
        let previous = core::mem::replace(&mut state.current, target);
        hw.switch_context(old_root, new_root);
        previous
    });
    group.put_active(&previous, frames);
    Ok(previous.id())
}

/// Deletes view `id`: clears AVAILABLE and drops the references held on
/// behalf of availability and membership. Threads still running on the
/// view keep it functional until the last one leaves.
pub fn delete<F: FrameRegistry>(
    group: &ViewGroup,
    id: ViewId,
    frames: &F,
) -> Result<(), ViewError> {
    let victim = {
        let mut inner = group.write();
        if inner.member(id).is_none() {
            return Err(ViewError::InvalidArgument);
        }
        if id == inner.base_id() {
            return Err(ViewError::PermissionDenied);
        }
        ViewGroup::unlink_flag(&mut inner, id).ok_or(ViewError::InvalidArgument)?
    };
    group.put_active(&victim, frames); // AVAILABLE reference
    group.put_structural(&victim); // membership
    log_info!(target: "mmview", "view {} deleted", id);
    Ok(())
}

/// Promotes the calling thread's view to group base, folding the shared
/// state of the outgoing base into it first. No-op when the thread already
/// runs on the base. Returns the (new) base id.
pub fn switch_base<F: FrameRegistry, H: Hw>(
    group: &ViewGroup,
    thread: &ThreadCtx,
    frames: &F,
    hw: &H,
) -> Result<ViewId, ViewError> {
    let current = thread.current_view();
    let mut inner = group.write();
    if inner.base_id() == current.id() {
        return Ok(current.id());
    }
    // A deleted view cannot take over as base.
    if !current.is_available() {
        return Err(ViewError::InvalidArgument);
    }
    let old_base = inner.base_view();
    sync::merge_into_base(&current, &old_base, frames, hw)?;
    ViewGroup::set_base(&mut inner, current.id());
    log_info!(target: "mmview", "view {} is the new base", current.id());
    Ok(current.id())
}

/// Id of the calling thread's active view.
pub fn current(thread: &ThreadCtx) -> ViewId {
    thread.current_view_id()
}

/// Changes the sharing mode of `[addr, addr + len)` in the calling
/// thread's view. Only legal while the group holds nothing but the base.
pub fn set_shared(
    group: &ViewGroup,
    thread: &ThreadCtx,
    addr: usize,
    len: usize,
    shared: bool,
) -> Result<(), ViewError> {
    // The group read lock held across the whole call keeps `create` out,
    // so the singleton precondition cannot be invalidated mid-flight.
    let guard = group.read();
    if guard.member_count() != 1 {
        return Err(ViewError::PermissionDenied);
    }
    let view = thread.current_view();
    let mut inner = view.inner().write();
    inner.regions.set_shared(addr, len, shared)
}
