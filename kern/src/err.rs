// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel-internal error handling.
//!
//! The design in §7 splits errors into two camps: programming bugs, which
//! halt the system with a diagnostic, and environmental conditions, which
//! are returned to the caller as ordinary `Result` values. This module
//! gives the first camp a single funnel so every halt path looks the same
//! in a ring-buffer trace.

pub use abi::FirmwareError;

/// Halts the system with a diagnostic, per the propagation policy for
/// `BoundsViolation` and `ConfigurationError`. Never returns.
#[inline(never)]
pub fn halt(err: FirmwareError) -> ! {
    debug_assert!(err.is_fatal(), "halt() called with a recoverable error");
    crate::klog!(crate::KlogEvent::Fatal(err));
    #[cfg(target_arch = "riscv32")]
    loop {
        riscv::asm::wfi();
    }
    #[cfg(not(target_arch = "riscv32"))]
    panic!("kernel halt: {:?}", err);
}

/// Converts a fatal [`FirmwareError`] into a halt, leaving a recoverable
/// one for the caller to handle. Used at API boundaries that validate
/// caller input (burst counts, DMA addresses, overlay sizes): see §7.
pub fn check(result: Result<(), FirmwareError>) -> Result<(), FirmwareError> {
    if let Err(e) = result {
        if e.is_fatal() {
            halt(e);
        }
    }
    result
}
