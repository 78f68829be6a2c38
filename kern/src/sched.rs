// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Priority scheduling (§4.5).
//!
//! `priority_scan` and `select` are the same naive, easily-audited
//! algorithms hubris's microkernel uses to pick the next task to run: a
//! linear scan starting just after the previously-running task, so ties
//! among equal-priority ready tasks are broken by round-robin position
//! rather than table order. `process_timers` is the delay-queue
//! equivalent of hubris's notification-deadline sweep, adapted to flip a
//! task straight to `Ready` instead of posting a notification bit, since
//! this kernel has no IPC layer to post one through.

use crate::task::{Task, TaskState};
use crate::time::Tick;

/// A scheduling hint returned by operations that might require a context
/// switch. Two hints combine via [`NextTask::combine`] by preferring
/// "more specific" information, exactly as in a hubris-style kernel: an
/// explicit task index wins over "some other task", which wins over "no
/// change needed".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NextTask {
    Same,
    Other,
    Specific(usize),
}

impl NextTask {
    pub fn combine(self, other: NextTask) -> NextTask {
        match (self, other) {
            (NextTask::Specific(a), NextTask::Specific(b)) => {
                // Two callers both want a specific task switched to; this
                // should only happen for the same index in a well-formed
                // kernel, but prefer the most recent if not.
                debug_assert_eq!(a, b);
                NextTask::Specific(b)
            }
            (NextTask::Specific(a), _) => NextTask::Specific(a),
            (_, NextTask::Specific(b)) => NextTask::Specific(b),
            (NextTask::Other, _) | (_, NextTask::Other) => NextTask::Other,
            (NextTask::Same, NextTask::Same) => NextTask::Same,
        }
    }
}

/// Scans `tasks` in round-robin order starting just after `previous`,
/// returning the highest-priority index matching `pred`. Ties are broken
/// by scan order, i.e. by position after `previous` (§4.5's "highest
/// priority ready task" plus a fair tie-break among equals).
pub fn priority_scan(
    previous: usize,
    tasks: &[Task],
    pred: impl Fn(&Task) -> bool,
) -> Option<usize> {
    let n = tasks.len();
    if n == 0 {
        return None;
    }
    let mut best: Option<usize> = None;
    for offset in 1..=n {
        let idx = (previous + offset) % n;
        if pred(&tasks[idx]) {
            best = match best {
                Some(b) if tasks[b].priority >= tasks[idx].priority => Some(b),
                _ => Some(idx),
            };
        }
    }
    best
}

/// Picks the next task to run: the highest-priority task in state
/// `Ready`. Returns `None` when no task is ready, which the caller should
/// treat as "enter the idle loop" (§4.5).
pub fn select(previous: usize, tasks: &[Task]) -> Option<usize> {
    priority_scan(previous, tasks, |t| matches!(t.state, TaskState::Ready))
}

/// Promotes every task whose delay deadline has passed from `Delayed` to
/// `Ready` (§3: "the tick ISR promotes any task whose deadline <= current
/// tick from delayed to ready"). Called from the timer ISR on every tick.
///
/// Returns `NextTask::Other` if any task was promoted (a context switch
/// may now be warranted because a higher-priority task became ready),
/// `NextTask::Same` otherwise.
pub fn process_timers(tasks: &mut [Task], now: Tick) -> NextTask {
    let mut hint = NextTask::Same;
    for task in tasks.iter_mut() {
        if let TaskState::Delayed = task.state {
            if let Some(deadline) = task.timer.deadline {
                if now.has_reached(deadline) {
                    task.state = TaskState::Ready;
                    task.timer.deadline = None;
                    hint = hint.combine(NextTask::Other);
                }
            }
        }
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StackRegion;
    use abi::Priority;

    extern "C" fn stub_entry(_: usize) -> ! {
        loop {}
    }

    fn make(priority: u8, state: TaskState) -> Task {
        let mut t = Task::new(
            stub_entry,
            StackRegion { base: core::ptr::null_mut(), size: 0 },
            Priority(priority),
        );
        t.state = state;
        t
    }

    #[test]
    fn select_picks_highest_priority_ready() {
        let tasks = [
            make(1, TaskState::Ready),
            make(5, TaskState::Ready),
            make(3, TaskState::Ready),
        ];
        assert_eq!(select(0, &tasks), Some(1));
    }

    #[test]
    fn select_breaks_ties_by_round_robin_after_previous() {
        let tasks = [
            make(2, TaskState::Ready),
            make(2, TaskState::Ready),
            make(2, TaskState::Ready),
        ];
        // Starting after index 1, the scan order is 2, 0, 1: index 2 wins.
        assert_eq!(select(1, &tasks), Some(2));
    }

    #[test]
    fn select_returns_none_when_nothing_ready() {
        let tasks = [make(1, TaskState::Delayed), make(2, TaskState::Terminated)];
        assert_eq!(select(0, &tasks), None);
    }

    #[test]
    fn process_timers_promotes_only_expired_deadlines() {
        let mut tasks = [make(1, TaskState::Delayed), make(1, TaskState::Delayed)];
        tasks[0].timer.deadline = Some(Tick(10));
        tasks[1].timer.deadline = Some(Tick(20));
        let hint = process_timers(&mut tasks, Tick(10));
        assert_eq!(hint, NextTask::Other);
        assert!(matches!(tasks[0].state, TaskState::Ready));
        assert!(matches!(tasks[1].state, TaskState::Delayed));
    }

    #[test]
    fn process_timers_is_a_noop_when_nothing_expires() {
        let mut tasks = [make(1, TaskState::Delayed)];
        tasks[0].timer.deadline = Some(Tick(100));
        assert_eq!(process_timers(&mut tasks, Tick(5)), NextTask::Same);
    }

    #[test]
    fn next_task_combine_prefers_specific() {
        assert_eq!(
            NextTask::Same.combine(NextTask::Specific(3)),
            NextTask::Specific(3)
        );
        assert_eq!(NextTask::Other.combine(NextTask::Same), NextTask::Other);
    }
}
