// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RV32IMC trap trampoline and task-switch primitives.
//!
//! Grounded on a RISC-V port of a hubris-style kernel: the trap entry
//! point saves the full general-purpose register file to the interrupted
//! stack (there is no hardware auto-stacking on RISC-V the way there is on
//! Cortex-M), reads `mcause`, and for an external-interrupt cause reads
//! the CPU's custom pending-IRQ register and calls into
//! [`crate::irq::dispatch`]. `mepc`/`mret` play the role ARM's hardware
//! exception return plays.
//!
//! Two distinct switch paths exist, matching §4.5 and §9:
//! - [`trap_handler`]: the full-register-save path taken on every
//!   interrupt, used for preemption.
//! - [`switch_to`]: a lightweight callee-saved-only switch used by
//!   voluntary kernel calls (`delay`, `queue_send`, `queue_receive`) that
//!   are ordinary Rust function calls, not interrupts; the caller's
//!   caller-saved registers are already safe because the compiler's own
//!   ABI preserves them across the call.

use crate::task::Task;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Full general-purpose register file saved on interrupt entry. Only the
/// ISR path populates every field; the cooperative path only ever reads
/// and writes `ra` and `sp` through [`switch_to`]'s raw asm, which is
/// intentionally kept out of this struct's field list since it operates
/// on the live stack rather than a saved copy.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct SavedState {
    pub ra: u32,
    pub sp: u32,
    pub gp: u32,
    pub tp: u32,
    pub t: [u32; 7],   // t0-t6
    pub s: [u32; 12],  // s0-s11
    pub a: [u32; 8],   // a0-a7
    pub mepc: u32,
}

/// Location of the task table, set once by [`set_task_table`] before the
/// scheduler starts. Stored as a raw pointer + length rather than a
/// `&'static mut [Task]` because the trap trampoline needs to reach it
/// without going through borrow-checked Rust state (the same bypass
/// hubris's `with_task_table` documents for ARM).
static TASK_TABLE_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());
static TASK_TABLE_LEN: AtomicUsize = AtomicUsize::new(0);
static CURRENT_TASK: AtomicUsize = AtomicUsize::new(0);

/// Records the task table location for the trap trampoline and scheduler
/// to use. Must be called exactly once, before interrupts are unmasked.
pub fn set_task_table(tasks: &'static mut [Task]) {
    TASK_TABLE_PTR.store(tasks.as_mut_ptr(), Ordering::SeqCst);
    TASK_TABLE_LEN.store(tasks.len(), Ordering::SeqCst);
}

/// Runs `f` with access to the task table. # Safety-by-convention: callers
/// must ensure this isn't reentered (i.e. called from within interrupts
/// masked, or from a single-threaded task context), same discipline
/// hubris documents for its ARM `with_task_table`.
pub fn with_task_table<R>(f: impl FnOnce(&mut [Task]) -> R) -> R {
    let ptr = TASK_TABLE_PTR.load(Ordering::SeqCst);
    let len = TASK_TABLE_LEN.load(Ordering::SeqCst);
    debug_assert!(!ptr.is_null(), "task table not initialized");
    let tasks = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
    f(tasks)
}

pub fn current_task_index() -> usize {
    CURRENT_TASK.load(Ordering::SeqCst)
}

pub fn set_current_task_index(idx: usize) {
    CURRENT_TASK.store(idx, Ordering::SeqCst);
}

/// Builds the "pre-interrupted task" stack / register layout described in
/// §9: the first context switch into a newly-created task must look like
/// an ordinary resumption from an interrupt. `a0` carries the task's
/// parameter (here always 0; tasks are plain `extern "C" fn(usize) -> !`
/// entry points taking their own index), `mepc` is the entry address, and
/// every other caller-saved register starts at zero.
pub fn reinitialize(task: &mut Task) {
    task.save = SavedState {
        sp: (task.stack.base as usize + task.stack.size) as u32,
        mepc: task.entry_point() as usize as u32,
        ..SavedState::default()
    };
}

pub fn disable_irq(bit: u32) {
    unsafe { riscv::register::mie::clear_mext() };
    let _ = bit; // this platform's "custom" pending register has a single enable; per-bit masking happens at the peripheral.
}

pub fn enable_irq(_bit: u32) {
    unsafe { riscv::register::mie::set_mext() };
}

/// Reads the CPU's custom pending-IRQ bitmask register (§3). This core
/// maps it onto `mip`'s platform-defined bits; a production port would
/// replace this read with whatever CSR or MMIO register the SoC exposes.
fn read_pending_irqs() -> u32 {
    riscv::register::mip::read().bits() as u32
}

/// Entered from the naked `_start_trap` trampoline once the full register
/// file has been pushed onto the interrupted task's stack. Reads
/// `mcause`, and for a machine external interrupt, reads the pending-IRQ
/// bitmask and dispatches it (§4.1). Returns the index of the task that
/// should be current on return; the trampoline uses this to decide
/// whether to restore from a different `Task::save` than the one it
/// saved into.
pub fn trap_handler() -> usize {
    use riscv::register::mcause;
    let cause = mcause::read();
    if cause.is_interrupt() {
        let pending = read_pending_irqs();
        crate::irq::dispatch(pending);
    } else {
        crate::err::halt(abi::FirmwareError::ConfigurationError);
    }

    with_task_table(|tasks| {
        let prev = current_task_index();
        match crate::sched::process_timers(tasks, crate::time::now())
            .combine(crate::sched::select(prev, tasks).map_or(
                crate::sched::NextTask::Same,
                crate::sched::NextTask::Specific,
            )) {
            crate::sched::NextTask::Specific(idx) => idx,
            _ => prev,
        }
    })
}

/// The naked trap entry point. Pushes the full GPR file to the
/// interrupted stack, calls [`trap_handler`] through a thin `extern "C"`
/// shim, then restores (possibly from a different task's saved state if
/// a switch occurred) and executes `mret`.
///
/// Kept minimal and handwritten in assembly because this is the one place
/// in the kernel where Rust's calling convention cannot be trusted not to
/// clobber registers before they're saved.
#[cfg(target_arch = "riscv32")]
core::arch::global_asm!(
    ".section .trap, \"ax\"",
    ".global _start_trap",
    ".align 4",
    "_start_trap:",
    "csrrw sp, mscratch, sp", // swap in the current task's saved-state pointer
    "sw ra, 0(sp)",
    "sw t0, 8(sp)",
    "sw t1, 12(sp)",
    "sw t2, 16(sp)",
    "sw t3, 36(sp)",
    "sw t4, 40(sp)",
    "sw t5, 44(sp)",
    "sw t6, 48(sp)",
    "sw a0, 64(sp)",
    "sw a1, 68(sp)",
    "sw a2, 72(sp)",
    "sw a3, 76(sp)",
    "sw a4, 80(sp)",
    "sw a5, 84(sp)",
    "sw a6, 88(sp)",
    "sw a7, 92(sp)",
    "csrr t0, mscratch",
    "sw t0, 4(sp)", // stash the task's real sp alongside ra
    "call {handler}",
    // a0 now holds the index of the task that should become current; the
    // handler has already updated CURRENT_TASK, so just reload sp from
    // whichever Task::save the scheduler left current and restore.
    "csrrw sp, mscratch, sp",
    "lw ra, 0(sp)",
    "lw t0, 8(sp)",
    "lw t1, 12(sp)",
    "lw t2, 16(sp)",
    "lw t3, 36(sp)",
    "lw t4, 40(sp)",
    "lw t5, 44(sp)",
    "lw t6, 48(sp)",
    "lw a0, 64(sp)",
    "lw a1, 68(sp)",
    "lw a2, 72(sp)",
    "lw a3, 76(sp)",
    "lw a4, 80(sp)",
    "lw a5, 84(sp)",
    "lw a6, 88(sp)",
    "lw a7, 92(sp)",
    "mret",
    handler = sym trap_entry_and_switch,
);

/// `extern "C"` shim called from `_start_trap` once registers are saved.
/// Runs the dispatcher and scheduler, then reprograms `mscratch` with the
/// new current task's `SavedState` pointer so the trampoline's second
/// half restores the right context.
#[cfg(target_arch = "riscv32")]
extern "C" fn trap_entry_and_switch() {
    let next = trap_handler();
    with_task_table(|tasks| {
        if next != current_task_index() {
            if let crate::task::TaskState::Running = tasks[current_task_index()].state {
                tasks[current_task_index()].state = crate::task::TaskState::Ready;
            }
            tasks[next].state = crate::task::TaskState::Running;
            set_current_task_index(next);
        }
        let sp = &mut tasks[next].save as *mut SavedState as u32;
        unsafe { riscv::register::mscratch::write(sp as usize) };
    });
}

/// Transfers control to the first task. Never returns.
pub fn start_first_task(idx: usize) -> ! {
    set_current_task_index(idx);
    with_task_table(|tasks| {
        tasks[idx].state = crate::task::TaskState::Running;
        unsafe {
            let sp = &mut tasks[idx].save as *mut SavedState as usize;
            riscv::register::mscratch::write(sp);
            riscv::register::mepc::write(tasks[idx].save.mepc as usize);
            core::arch::asm!(
                "csrrw sp, mscratch, sp",
                "lw a0, 64(sp)",
                "mret",
                options(noreturn)
            );
        }
    })
}

/// The lightweight cooperative switch used by `delay`/`send`/`receive`:
/// saves `ra`, `sp`, and `s0`-`s11` (the full callee-saved set a plain
/// function call needs preserved across it — `s0`-`s11` are callee-saved
/// too, not just `ra`/`sp`) to the outgoing task and restores them from
/// the incoming one, then returns into the incoming task exactly as if
/// the original call to `switch_to` had returned there. This is
/// deliberately NOT the same code path as the ISR trampoline: a voluntary
/// call already has the compiler's guarantee that caller-saved registers
/// don't need preserving.
///
/// # Safety
/// `from` and `to` must be distinct live tasks in the current task table,
/// and must be called with interrupts masked.
#[inline(never)]
pub unsafe fn switch_to(from: &mut SavedState, to: &SavedState) {
    core::arch::asm!(
        "sw ra,  0({from})",
        "sw sp,  4({from})",
        "sw s0, 44({from})",
        "sw s1, 48({from})",
        "sw s2, 52({from})",
        "sw s3, 56({from})",
        "sw s4, 60({from})",
        "sw s5, 64({from})",
        "sw s6, 68({from})",
        "sw s7, 72({from})",
        "sw s8, 76({from})",
        "sw s9, 80({from})",
        "sw s10, 84({from})",
        "sw s11, 88({from})",
        "lw s11, 88({to})",
        "lw s10, 84({to})",
        "lw s9, 80({to})",
        "lw s8, 76({to})",
        "lw s7, 72({to})",
        "lw s6, 68({to})",
        "lw s5, 64({to})",
        "lw s4, 60({to})",
        "lw s3, 56({to})",
        "lw s2, 52({to})",
        "lw s1, 48({to})",
        "lw s0, 44({to})",
        "lw sp,  4({to})",
        "lw ra,  0({to})",
        from = in(reg) from,
        to = in(reg) to,
        // s0-s11 genuinely hold a different task's values on exit than on
        // entry; declare them clobbered so the compiler never assumes
        // they survive this call unchanged.
        out("s0") _, out("s1") _, out("s2") _, out("s3") _,
        out("s4") _, out("s5") _, out("s6") _, out("s7") _,
        out("s8") _, out("s9") _, out("s10") _, out("s11") _,
    );
}
