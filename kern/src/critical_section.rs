// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The critical-section primitive (§4.1, §5).
//!
//! Unlike a hubris task — which never sees preemption within its own
//! address space and can therefore implement `critical_section::Impl` as
//! a no-op — this kernel owns the only privilege level on the chip and
//! genuinely races with its own ISRs. Masking is real here: a reentrant
//! counter stored in a process-wide cell, where the outermost `enter`
//! masks CPU interrupts via the `mie` CSR and the matching `exit` restores
//! them only when the counter returns to zero.
//!
//! The scope of any held critical section must stay short (target: under
//! 1 microsecond) because it delays tick delivery (§5).

use core::sync::atomic::{AtomicU32, Ordering};

static DEPTH: AtomicU32 = AtomicU32::new(0);

/// Masks CPU interrupts, reentrantly. Returns the previous nesting depth
/// so the matching [`exit`] can be verified in tests, though callers
/// normally just call [`exit`] once per [`enter`].
pub fn enter() -> u32 {
    // Mask first, THEN bump the counter: a timer IRQ that lands between
    // these two operations must never observe DEPTH == 0 while running
    // unmasked.
    arch_disable_irqs();
    DEPTH.fetch_add(1, Ordering::SeqCst)
}

/// Unmasks CPU interrupts once the nesting depth returns to zero.
/// Re-entrant: level 0 after decrement means "unmask", any level above
/// zero means "stay masked".
pub fn exit() {
    let prev = DEPTH.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "exit_critical() without matching enter_critical()");
    if prev == 1 {
        arch_enable_irqs();
    }
}

/// Runs `f` with interrupts masked, restoring the previous mask state
/// (possibly "still masked", if called from within an outer critical
/// section) on every exit path including panics.
pub fn with<R>(f: impl FnOnce() -> R) -> R {
    enter();
    let r = f();
    exit();
    r
}

pub fn depth() -> u32 {
    DEPTH.load(Ordering::SeqCst)
}

#[cfg(target_arch = "riscv32")]
fn arch_disable_irqs() {
    unsafe { riscv::register::mstatus::clear_mie() }
}

#[cfg(target_arch = "riscv32")]
fn arch_enable_irqs() {
    unsafe { riscv::register::mstatus::set_mie() }
}

// Host builds (unit tests) have no CPU interrupt mask to manipulate; the
// counter discipline is still exercised so tests can check nesting.
#[cfg(not(target_arch = "riscv32"))]
fn arch_disable_irqs() {}
#[cfg(not(target_arch = "riscv32"))]
fn arch_enable_irqs() {}

struct FirmwareCriticalSection;
critical_section::set_impl!(FirmwareCriticalSection);

unsafe impl critical_section::Impl for FirmwareCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        // The kernel's own reentrant counter is the restore state; with no
        // `restore-state-*` feature enabled, `RawRestoreState` is `()`.
        enter();
    }

    unsafe fn release(_token: critical_section::RawRestoreState) {
        exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_restores_after_outermost_exit() {
        assert_eq!(depth(), 0);
        enter();
        enter();
        enter();
        enter();
        assert_eq!(depth(), 4);
        exit();
        exit();
        exit();
        assert_eq!(depth(), 1);
        exit();
        assert_eq!(depth(), 0);
    }
}
