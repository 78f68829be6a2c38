// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific pieces of the runtime: the register-save layout,
//! the trap trampoline, and the handful of globals that let the trampoline
//! find the task table without going through an ordinary Rust reference
//! (§4.5's "globally visible current task pointer").
//!
//! Everything else in `kern` is written against the small surface exposed
//! here, so porting to a different core means replacing this module only.

#[cfg(target_arch = "riscv32")]
mod riscv32;
#[cfg(target_arch = "riscv32")]
pub use riscv32::*;

#[cfg(not(target_arch = "riscv32"))]
mod host;
#[cfg(not(target_arch = "riscv32"))]
pub use host::*;
