// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-side stand-in for [`super::riscv32`], used only under `cargo test`.
//!
//! There is no CPU trap mechanism to drive on the host, so this backend
//! only implements the pieces that the scheduler- and queue-level unit
//! tests exercise directly: the task table globals, `reinitialize`, and a
//! fake [`switch_to`] that records the switch instead of performing one.
//! There is only one native call stack under test, so a host "switch"
//! cannot actually resume a different task's control flow the way the
//! real trampoline does; it just logs which task indices were asked to
//! swap so tests can assert a switch happened, then returns normally into
//! whichever task called it. Anything that would require a real trap (the
//! trampoline, `start_first_task`) still panics if called.

use crate::task::Task;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SavedState {
    pub ra: u32,
    pub sp: u32,
    pub mepc: u32,
}

static TASK_TABLE_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());
static TASK_TABLE_LEN: AtomicUsize = AtomicUsize::new(0);
static CURRENT_TASK: AtomicUsize = AtomicUsize::new(0);

pub fn set_task_table(tasks: &'static mut [Task]) {
    TASK_TABLE_PTR.store(tasks.as_mut_ptr(), Ordering::SeqCst);
    TASK_TABLE_LEN.store(tasks.len(), Ordering::SeqCst);
}

pub fn with_task_table<R>(f: impl FnOnce(&mut [Task]) -> R) -> R {
    let ptr = TASK_TABLE_PTR.load(Ordering::SeqCst);
    let len = TASK_TABLE_LEN.load(Ordering::SeqCst);
    // Tests that only exercise a queue's own enqueue/dequeue bookkeeping
    // never call `set_task_table`; treat that as "no tasks" rather than
    // panicking, since `wake`/`wake_one_receiver` legitimately no-op when
    // nothing is there to find.
    if ptr.is_null() {
        return f(&mut []);
    }
    let tasks = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
    f(tasks)
}

pub fn current_task_index() -> usize {
    CURRENT_TASK.load(Ordering::SeqCst)
}

pub fn set_current_task_index(idx: usize) {
    CURRENT_TASK.store(idx, Ordering::SeqCst);
}

pub fn reinitialize(task: &mut Task) {
    task.save = SavedState {
        sp: (task.stack.base as usize + task.stack.size) as u32,
        mepc: task.entry_point() as usize as u32,
        ..SavedState::default()
    };
}

pub fn disable_irq(_bit: u32) {}
pub fn enable_irq(_bit: u32) {}

pub fn trap_handler() -> usize {
    unimplemented!("host backend has no trap mechanism")
}

pub fn start_first_task(_idx: usize) -> ! {
    unimplemented!("host backend has no trap mechanism")
}

/// Serializes tests that touch the task-table globals above: they're
/// process-wide statics, and `cargo test` runs tests on multiple threads
/// by default.
#[cfg(test)]
pub static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Log of `(from.ra, to.ra)` pairs `switch_to` has been asked to swap,
/// for tests that want to assert a switch occurred without a second call
/// stack to actually switch into.
#[cfg(test)]
static SWITCH_LOG: critical_section::Mutex<core::cell::RefCell<std::vec::Vec<(u32, u32)>>> =
    critical_section::Mutex::new(core::cell::RefCell::new(std::vec::Vec::new()));

/// Clears and returns the switches recorded so far; test-only.
#[cfg(test)]
pub fn take_switch_log() -> std::vec::Vec<(u32, u32)> {
    critical_section::with(|cs| SWITCH_LOG.borrow(cs).borrow_mut().drain(..).collect())
}

/// Records the switch, then returns normally — there is no second stack
/// on the host to resume into, so `from`/`to` are left exactly as the
/// scheduler last wrote them rather than mutated here.
pub unsafe fn switch_to(from: &mut SavedState, to: &SavedState) {
    #[cfg(test)]
    critical_section::with(|cs| {
        SWITCH_LOG.borrow(cs).borrow_mut().push((from.ra, to.ra));
    });
    let _ = (from, to);
}
