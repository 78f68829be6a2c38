// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel time.
//!
//! A [`Tick`] is one period of the kernel's periodic timer (typically
//! 1 ms). It is a 32-bit count that wraps modulo 2^32, produced only by
//! the timer ISR and read from any context (§3). Deadlines are compared
//! with wrapping arithmetic so the scheduler keeps working across a wrap.

use core::ops::Add;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct Tick(pub u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Whether `self` has reached or passed `deadline`, accounting for
    /// wraparound by comparing the signed difference.
    pub fn has_reached(self, deadline: Tick) -> bool {
        (self.0.wrapping_sub(deadline.0) as i32) >= 0
    }
}

impl Add<u32> for Tick {
    type Output = Tick;
    fn add(self, delta: u32) -> Tick {
        Tick(self.0.wrapping_add(delta))
    }
}

/// Process-wide tick counter. Written only by the timer ISR via
/// [`advance`]; read by any context through [`now`]. The single `u32`
/// load/store is atomic on RV32 so no torn reads are possible, matching
/// the ordering guarantee in §5.
static TICKS: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Called only from the timer ISR.
pub fn advance() -> Tick {
    let new = TICKS.fetch_add(1, core::sync::atomic::Ordering::Relaxed) + 1;
    Tick(new)
}

pub fn now() -> Tick {
    Tick(TICKS.load(core::sync::atomic::Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_reached_handles_wraparound() {
        let near_wrap = Tick(u32::MAX - 1);
        let deadline = near_wrap + 3; // wraps past 0
        assert!(!near_wrap.has_reached(deadline));
        assert!((near_wrap + 3).has_reached(deadline));
        assert!((near_wrap + 4).has_reached(deadline));
    }

    #[test]
    fn has_reached_is_reflexive() {
        let t = Tick(42);
        assert!(t.has_reached(t));
    }
}
