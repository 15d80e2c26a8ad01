// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Multiplexed operation surface.
//!
//! A single numeric entry point the embedding kernel routes its syscall
//! to. `dispatch` speaks `Result`; `dispatch_raw` folds the error kind
//! into the conventional negative errno values.

use crate::error::ViewError;
use crate::frames::FrameRegistry;
use crate::hw::Hw;
use crate::lifecycle;
use crate::thread::ThreadCtx;
use crate::types::ViewId;
use crate::view::ViewGroup;

/// Clone the base into a new view; returns the new id.
pub const OP_CREATE: usize = 0;
/// Delete a view by id.
pub const OP_DELETE: usize = 1;
/// Return the calling thread's view id.
pub const OP_CURRENT: usize = 2;
/// Switch the calling thread to a view; returns the previous id.
pub const OP_MIGRATE: usize = 3;
/// Stop propagating entries for a range.
pub const OP_UNSHARE: usize = 4;
/// Propagate entries for a range between views and base.
pub const OP_SHARE: usize = 5;
/// Promote the calling thread's view to base; returns its id.
pub const OP_SWITCH_BASE: usize = 6;

/// Raw operand words, meaning depends on the op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Args(pub [usize; 2]);

/// Everything an operation runs against.
pub struct Context<'a, F: FrameRegistry, H: Hw> {
    pub group: &'a ViewGroup,
    pub thread: &'a ThreadCtx,
    pub frames: &'a F,
    pub hw: &'a H,
}

/// Routes `op` to its lifecycle operation.
pub fn dispatch<F: FrameRegistry, H: Hw>(
    op: usize,
    args: Args,
    ctx: &Context<'_, F, H>,
) -> Result<usize, ViewError> {
    let Args([a0, a1]) = args;
    match op {
        OP_CREATE => lifecycle::create(ctx.group, ctx.thread, ctx.frames, ctx.hw)
            .map(|id| id.as_raw() as usize),
        OP_DELETE => {
            lifecycle::delete(ctx.group, ViewId::from_raw(a0 as u64), ctx.frames).map(|()| 0)
        }
        OP_CURRENT => Ok(lifecycle::current(ctx.thread).as_raw() as usize),
        OP_MIGRATE => lifecycle::migrate(
            ctx.group,
            ctx.thread,
            ViewId::from_raw(a0 as u64),
            ctx.frames,
            ctx.hw,
        )
        .map(|id| id.as_raw() as usize),
        OP_UNSHARE => lifecycle::set_shared(ctx.group, ctx.thread, a0, a1, false).map(|()| 0),
        OP_SHARE => lifecycle::set_shared(ctx.group, ctx.thread, a0, a1, true).map(|()| 0),
        OP_SWITCH_BASE => lifecycle::switch_base(ctx.group, ctx.thread, ctx.frames, ctx.hw)
            .map(|id| id.as_raw() as usize),
        _ => {
            log_debug!(target: "mmview", "unknown op {}", op);
            Err(ViewError::InvalidArgument)
        }
    }
}

/// `dispatch` with the error folded into a negative errno value.
pub fn dispatch_raw<F: FrameRegistry, H: Hw>(
    op: usize,
    args: Args,
    ctx: &Context<'_, F, H>,
) -> isize {
    match dispatch(op, args, ctx) {
        Ok(value) => value as isize,
        Err(err) => err.errno(),
    }
}
