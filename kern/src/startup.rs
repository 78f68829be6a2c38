// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup (§4.5, §9).
//!
//! Unlike a multi-image design with a flash-resident application header,
//! every task here is a plain `extern "C" fn(usize) -> !` linked directly
//! into the one firmware image; the "app table" is just a `&'static mut
//! [Task]` the binary crate builds from its own statically-allocated stacks
//! and hands to [`start`]. This is one of the deliberate simplifications
//! from the redesign notes: no region descriptors, no task generations, no
//! app-header checksum to validate, because there is no separate loader
//! stage and nothing to protect tasks from each other at the MMU level.

use crate::task::Task;

/// Brings up the scheduler and transfers control to the highest-priority
/// task. Never returns.
///
/// `tasks` must already have valid `priority`/`state`/`stack`/`entry`
/// fields (built with [`Task::new`](crate::task::Task::new)); this function
/// fills in each task's initial register state and hands the table to the
/// architecture layer before picking the first task to run.
pub fn start(tasks: &'static mut [Task]) -> ! {
    assert!(!tasks.is_empty(), "a firmware image needs at least one task");

    for task in tasks.iter_mut() {
        crate::arch::reinitialize(task);
    }

    crate::arch::set_task_table(tasks);

    // Act like we just finished scheduling the last task in the table, so
    // the round-robin scan starts fresh at index 0.
    let last = crate::arch::with_task_table(|tasks| tasks.len() - 1);
    let first = crate::arch::with_task_table(|tasks| crate::sched::select(last, tasks))
        .expect("at least one task must start Ready");

    crate::arch::start_first_task(first)
}
