// Copyright 2026 mmview Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-thread behavior of the lifecycle operations, driven through the
//! public API only.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use mmview::pt::PageTree;
use mmview::{
    lifecycle, FrameRegistry, NullHw, PageClass, Pfn, RegionTable, ThreadCtx, ThreadId, ViewError,
    ViewGroup, ViewId,
};

/// Frame registry that accepts everything; frame accounting is covered by
/// the unit tests.
struct NoopFrames;

impl FrameRegistry for NoopFrames {
    fn retain(&self, _pfn: Pfn) {}
    fn release(&self, _pfn: Pfn) {}
    fn link_view(&self, _pfn: Pfn, _view: ViewId) {}
    fn unlink_view(&self, _pfn: Pfn, _view: ViewId) {}
    fn class_of(&self, _pfn: Pfn) -> PageClass {
        PageClass::Anon
    }
    fn has_anchor(&self, _view: ViewId, _region_start: usize) -> bool {
        false
    }
    fn install_anchor(&self, _view: ViewId, _region_start: usize) -> bool {
        true
    }
    fn adopt_anon_lineage(&self, _src: (ViewId, usize), _dst: (ViewId, usize)) {}
}

#[test]
fn concurrent_migrations_are_independent() {
    let group = Arc::new(ViewGroup::new(RegionTable::new(), PageTree::new()));
    let main = ThreadCtx::attach(&group, ThreadId(1), ThreadId(1));
    let a = lifecycle::create(&group, &main, &NoopFrames, &NullHw).expect("view a");
    let b = lifecycle::create(&group, &main, &NoopFrames, &NullHw).expect("view b");

    let spawn_migrator = |target: ViewId, tid: u32| {
        let group = Arc::clone(&group);
        thread::spawn(move || {
            let tc = ThreadCtx::attach(&group, ThreadId(tid), ThreadId(1));
            for _ in 0..200 {
                lifecycle::migrate(&group, &tc, target, &NoopFrames, &NullHw).expect("to");
                // The pointer is the thread's own; the sibling migrating
                // elsewhere must never show through it.
                assert_eq!(tc.current_view_id(), target);
                lifecycle::migrate(&group, &tc, ViewId::BASE, &NoopFrames, &NullHw).expect("back");
                assert_eq!(tc.current_view_id(), ViewId::BASE);
            }
            tc.detach(&group, &NoopFrames);
        })
    };

    let h1 = spawn_migrator(a, 2);
    let h2 = spawn_migrator(b, 3);
    h1.join().expect("migrator a");
    h2.join().expect("migrator b");

    assert_eq!(main.current_view_id(), ViewId::BASE);
    assert_eq!(group.view_count(), 3);
}

#[test]
fn delete_races_a_running_user() {
    let group = Arc::new(ViewGroup::new(RegionTable::new(), PageTree::new()));
    let main = ThreadCtx::attach(&group, ThreadId(1), ThreadId(1));
    let victim = lifecycle::create(&group, &main, &NoopFrames, &NullHw).expect("victim");

    let (arrived_tx, arrived_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let worker = {
        let group = Arc::clone(&group);
        thread::spawn(move || {
            let tc = ThreadCtx::attach(&group, ThreadId(2), ThreadId(1));
            lifecycle::migrate(&group, &tc, victim, &NoopFrames, &NullHw).expect("migrate");
            arrived_tx.send(()).expect("signal");
            resume_rx.recv().expect("wait");
            // Still running on the deleted view.
            assert_eq!(tc.current_view_id(), victim);
            tc.detach(&group, &NoopFrames);
        })
    };

    arrived_rx.recv().expect("worker arrived");
    lifecycle::delete(&group, victim, &NoopFrames).expect("delete");
    // Unreachable for newcomers, alive for the worker.
    assert_eq!(
        lifecycle::migrate(&group, &main, victim, &NoopFrames, &NullHw),
        Err(ViewError::InvalidArgument)
    );
    assert_eq!(group.view_count(), 2);

    resume_tx.send(()).expect("resume");
    worker.join().expect("worker");
    // The worker's exit dropped the last active reference.
    assert_eq!(group.view_count(), 1);
}
