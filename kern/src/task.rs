// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fixed task table (§3, §4.5).
//!
//! A task descriptor is created once, before the scheduler starts, and is
//! never freed in this profile: a task that returns from its entry point
//! is marked `Terminated` rather than reclaimed. At most one task is
//! `Running` at a time; the invariant that a delayed task is never in the
//! ready set falls out of `TaskState` being a single field rather than
//! separate membership flags — a task is in exactly one state.

use crate::time::Tick;
use abi::Priority;

/// Handle to a bounded message queue a task may be blocked on. An opaque
/// index assigned by whoever owns the queue table (`kern::queue`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueId(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Ready,
    Running,
    Delayed,
    BlockedOnSend(QueueId),
    BlockedOnReceive(QueueId),
    /// The task's entry function returned; implicitly `exit(0)` (§4.5).
    /// Its stack is not reclaimed in this profile.
    Terminated,
}

/// A task's pending delay deadline, valid only while `state == Delayed`.
#[derive(Copy, Clone, Debug, Default)]
pub struct TimerState {
    pub deadline: Option<Tick>,
}

/// The statically-known bounds of a task's private stack. Owned
/// exclusively by the task; known at compile time (§3).
#[derive(Copy, Clone, Debug)]
pub struct StackRegion {
    pub base: *mut u8,
    pub size: usize,
}

// SAFETY: each task's stack is disjoint and only the owning task (or the
// kernel while it is suspended) touches it.
unsafe impl Send for StackRegion {}

/// Internal representation of a task (§3: task descriptor).
///
/// `save` must be the first field: the trap trampoline computes its
/// address directly from a `Task` pointer without going through Rust
/// field access, the same trick hubris's ARM and RISC-V arch modules use.
#[repr(C)]
pub struct Task {
    pub save: crate::arch::SavedState,
    pub priority: Priority,
    pub state: TaskState,
    pub timer: TimerState,
    pub stack: StackRegion,
    entry: extern "C" fn(usize) -> !,
}

impl Task {
    /// Describes a task without initializing its register state; call
    /// [`crate::arch::reinitialize`] afterward to build the "pre-interrupted"
    /// stack frame described in §9 before the scheduler can run it.
    pub fn new(
        entry: extern "C" fn(usize) -> !,
        stack: StackRegion,
        priority: Priority,
    ) -> Self {
        Task {
            save: crate::arch::SavedState::default(),
            priority,
            state: TaskState::Ready,
            timer: TimerState::default(),
            stack,
            entry,
        }
    }

    pub fn entry_point(&self) -> extern "C" fn(usize) -> ! {
        self.entry
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }
}
