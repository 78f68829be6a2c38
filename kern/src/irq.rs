// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interrupt dispatcher (§4.1).
//!
//! A fixed-size table maps IRQ index to an optional handler, installed
//! under a critical section by task context and invoked by the trap
//! trampoline in `arch`. This is the "function-pointer callback registry"
//! pattern from §9: settable only under a critical section, deregistration
//! mandatory on tear-down (overlays in particular must deregister before
//! returning control to the loader).

use abi::{irq, FirmwareError};

pub type Handler = fn();

struct Slot {
    handler: Option<Handler>,
}

const EMPTY: Slot = Slot { handler: None };

static mut TABLE: [Slot; irq::COUNT] = [EMPTY; irq::COUNT];

/// Count of pending-bits observed with no registered handler. Exposed for
/// diagnostics; each occurrence is also a ring-buffer entry.
static UNHANDLED_COUNT: core::sync::atomic::AtomicU32 =
    core::sync::atomic::AtomicU32::new(0);

/// Installs `handler` at `index`. Fails with `ConfigurationError` if the
/// index already has one (§4.1: "fails if the index already has one").
/// The caller is responsible for unmasking the corresponding bit at the
/// CPU mask register; this table only governs dispatch.
pub fn register(index: u32, handler: Handler) -> Result<(), FirmwareError> {
    if index as usize >= irq::COUNT {
        return Err(FirmwareError::BoundsViolation);
    }
    critical_section::with(|_| {
        // SAFETY: only ever touched under a critical section.
        let slot = unsafe { &mut TABLE[index as usize] };
        if slot.handler.is_some() {
            return Err(FirmwareError::ConfigurationError);
        }
        slot.handler = Some(handler);
        Ok(())
    })
}

/// Removes the handler at `index`. The caller must have already
/// acknowledged any still-pending assertion at the source peripheral
/// (§4.1) before calling this.
pub fn deregister(index: u32) {
    if (index as usize) < irq::COUNT {
        critical_section::with(|_| {
            // SAFETY: only ever touched under a critical section.
            unsafe { TABLE[index as usize].handler = None };
        });
    }
}

pub fn unhandled_count() -> u32 {
    UNHANDLED_COUNT.load(core::sync::atomic::Ordering::Relaxed)
}

/// Invoked by the trap trampoline with the pending-IRQ bitmask already
/// read from the CPU's custom interrupt register. Interrupts are masked
/// for the duration (nested interrupts are disabled, per §5).
///
/// An unknown pending bit with no registered handler is a programming
/// error (§4.1): the dispatcher counts it and leaves the bit unhandled
/// rather than calling into nothing, since masking it at the peripheral
/// is the registering subsystem's job, not the dispatcher's.
pub fn dispatch(pending: u32) {
    let mut remaining = pending;
    while remaining != 0 {
        let bit = remaining.trailing_zeros();
        remaining &= !(1 << bit);

        // SAFETY: reads happen with interrupts already masked by the trap
        // entry; no concurrent writer.
        let handler = unsafe { TABLE[bit as usize].handler };
        match handler {
            Some(h) => h(),
            None => {
                UNHANDLED_COUNT.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
                crate::klog!(crate::KlogEvent::UnhandledIrq(bit));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static CALLS: AtomicU32 = AtomicU32::new(0);
    fn bump() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn register_then_deregister_restores_prior_state() {
        let idx = 17;
        assert!(register(idx, bump).is_ok());
        assert_eq!(register(idx, bump), Err(FirmwareError::ConfigurationError));
        deregister(idx);
        assert!(register(idx, bump).is_ok());
        deregister(idx);
    }

    #[test]
    fn dispatch_invokes_every_set_bit_once() {
        CALLS.store(0, Ordering::SeqCst);
        register(1, bump).unwrap();
        register(3, bump).unwrap();
        dispatch((1 << 1) | (1 << 3));
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        deregister(1);
        deregister(3);
    }

    #[test]
    fn unregistered_bit_is_counted_not_panicked() {
        let before = unhandled_count();
        dispatch(1 << 31);
        assert_eq!(unhandled_count(), before + 1);
    }
}
