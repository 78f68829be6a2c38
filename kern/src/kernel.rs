// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task-level scheduling operations: the suspension points named in §5
//! (`delay`, `queue_send`, `queue_receive`) and the cooperative switch
//! that backs them.
//!
//! This is the glue between the pure data in `task`/`sched` and the
//! architecture-specific register swap in `arch`. Kernel service calls
//! are only safe from task context (§4.5 invariant 5); ISR-safe variants
//! (`queue_send_from_isr`) never block and never call into this module's
//! `reschedule`.

use crate::arch;
use crate::sched;
use crate::task::TaskState;
use crate::time::Tick;

/// Puts the current task into `state` and yields the CPU to the next
/// ready task. Returns once this task is `Ready` again and the scheduler
/// has picked it back up.
pub fn block_current(state: TaskState) {
    critical_section::with(|_| {
        let me = arch::current_task_index();
        arch::with_task_table(|tasks| {
            tasks[me].state = state;
        });
    });
    reschedule();
}

/// Delays the calling task for `ticks` kernel ticks (§4.5). Wakes at or
/// after `now() + ticks`; the tick ISR is responsible for the actual
/// promotion back to `Ready` (`sched::process_timers`).
pub fn delay(ticks: u32) {
    let me = arch::current_task_index();
    let deadline = crate::time::now() + ticks;
    arch::with_task_table(|tasks| {
        tasks[me].timer.deadline = Some(deadline);
    });
    block_current(TaskState::Delayed);
}

/// Marks `idx` ready without switching to it. Used by queue operations
/// when they free up space or deliver data to a waiter; the actual
/// context switch, if warranted, happens at the next preemption point
/// (tick ISR or this task's own next blocking call) rather than
/// immediately, matching the "preemptive within cooperative tasks" model
/// in §4.5.
pub fn wake(idx: usize) {
    arch::with_task_table(|tasks| {
        if let TaskState::BlockedOnSend(_) | TaskState::BlockedOnReceive(_) =
            tasks[idx].state
        {
            tasks[idx].state = TaskState::Ready;
            tasks[idx].timer.deadline = None;
        }
    });
}

/// Finds the next ready task (possibly still `self`) and performs a
/// cooperative switch if it differs from the caller.
pub fn reschedule() {
    let me = arch::current_task_index();
    let next = arch::with_task_table(|tasks| sched::select(me, tasks));
    if let Some(next) = next {
        if next != me {
            switch(me, next);
        } else {
            arch::with_task_table(|tasks| tasks[me].state = TaskState::Running);
        }
    }
    // If nothing is ready, the caller must not have been the one to block
    // without another task available; the idle loop (main firmware loop)
    // is the only context allowed to observe "nothing ready".
}

fn switch(from: usize, to: usize) {
    arch::with_task_table(|tasks| {
        if let TaskState::Running = tasks[from].state {
            tasks[from].state = TaskState::Ready;
        }
        tasks[to].state = TaskState::Running;
    });
    arch::set_current_task_index(to);
    arch::with_task_table(|tasks| {
        let (lo, hi) = if from < to { (from, to) } else { (to, from) };
        let (left, right) = tasks.split_at_mut(hi);
        let (a, b) = (&mut left[lo], &mut right[0]);
        let (from_save, to_save) = if from < to { (a, &*b) } else { (b, &*a) };
        unsafe { arch::switch_to(&mut from_save.save, &to_save.save) };
    });
}

/// True when no task is in `Ready`/`Running` state; the caller should
/// enter the idle loop (§4.5).
pub fn nothing_ready() -> bool {
    arch::with_task_table(|tasks| tasks.iter().all(|t| !t.is_runnable()))
}

/// Called once per tick from the timer ISR path: promotes expired delays
/// and returns whether a context switch should occur on exit.
pub fn on_tick(now: Tick) -> sched::NextTask {
    arch::with_task_table(|tasks| sched::process_timers(tasks, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StackRegion, Task};
    use abi::Priority;

    extern "C" fn stub_entry(_: usize) -> ! {
        loop {}
    }

    fn make(priority: u8) -> Task {
        Task::new(
            stub_entry,
            StackRegion { base: core::ptr::null_mut(), size: 0 },
            Priority(priority),
        )
    }

    /// Leaks a fresh task table for the duration of the test process; fine
    /// for host tests, which never tear the table back down.
    fn install(tasks: std::vec::Vec<Task>) {
        let leaked: &'static mut [Task] = std::boxed::Box::leak(tasks.into_boxed_slice());
        arch::set_task_table(leaked);
    }

    /// §5's delay contract: a delayed task yields to the next ready task
    /// immediately, then becomes ready again only once the tick ISR
    /// observes its deadline has passed.
    #[test]
    fn delay_yields_and_the_tick_isr_promotes_it_back_to_ready() {
        let _guard = arch::TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        arch::take_switch_log();

        let mut runner = make(1);
        runner.state = TaskState::Running;
        let idle = make(1);
        install(std::vec![runner, idle]);
        arch::set_current_task_index(0);

        delay(5);

        arch::with_task_table(|tasks| {
            assert_eq!(tasks[0].state, TaskState::Delayed);
            assert_eq!(tasks[0].timer.deadline, Some(Tick(5)));
            assert_eq!(tasks[1].state, TaskState::Running);
        });
        assert_eq!(arch::current_task_index(), 1);
        assert_eq!(arch::take_switch_log(), std::vec![(0, 0)]);

        let hint = on_tick(Tick(5));
        assert_eq!(hint, sched::NextTask::Other);
        arch::with_task_table(|tasks| {
            assert_eq!(tasks[0].state, TaskState::Ready);
            assert_eq!(tasks[0].timer.deadline, None);
        });
    }

    /// When the calling task is already the only ready one, `reschedule`
    /// must not perform a switch at all.
    #[test]
    fn reschedule_is_a_noop_when_caller_is_the_only_ready_task() {
        let _guard = arch::TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        arch::take_switch_log();

        let mut only = make(1);
        only.state = TaskState::Running;
        install(std::vec![only]);
        arch::set_current_task_index(0);

        reschedule();

        assert_eq!(arch::current_task_index(), 0);
        assert!(arch::take_switch_log().is_empty());
        arch::with_task_table(|tasks| assert_eq!(tasks[0].state, TaskState::Running));
    }
}
