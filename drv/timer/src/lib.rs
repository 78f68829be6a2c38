//! Timer service driver (§4.2): a programmable down-counter with a
//! prescaler and auto-reload, shared between the kernel's tick and one
//! secondary user callback (e.g. an overlay's redraw timer).
//!
//! `f_out = f_sys / ((prescaler + 1) * (reload + 1))`. Reconfiguration is
//! only accepted while stopped — the ordering guarantee in §4.2 ("an
//! in-flight tick completes with the old period") falls directly out of
//! that restriction, since there is no way to change `PSC`/`ARR` without
//! an intervening `stop()`.

#![cfg_attr(not(test), no_std)]

use abi::{FirmwareError, TimerControl, TimerStatus};
use vcell::VolatileCell;

pub type Callback = fn();

pub struct Timer {
    cr: &'static VolatileCell<u32>,
    sr: &'static VolatileCell<u32>,
    psc: &'static VolatileCell<u32>,
    arr: &'static VolatileCell<u32>,
    cnt: &'static VolatileCell<u32>,
    kernel_callback: Option<Callback>,
    user_callback: Option<Callback>,
}

impl Timer {
    /// # Safety
    /// `base` must point at the timer's control/status/prescaler/reload/
    /// count registers laid out per §6, live for `'static`, with no other
    /// `Timer` handle aliasing the same registers.
    pub unsafe fn new(base: usize) -> Self {
        let reg = |offset: usize| -> &'static VolatileCell<u32> {
            &*((base + offset) as *const VolatileCell<u32>)
        };
        Timer {
            cr: reg(abi::reg::TIMER_CR),
            sr: reg(abi::reg::TIMER_SR),
            psc: reg(abi::reg::TIMER_PSC),
            arr: reg(abi::reg::TIMER_ARR),
            cnt: reg(abi::reg::TIMER_CNT),
            kernel_callback: None,
            user_callback: None,
        }
    }

    fn control(&self) -> TimerControl {
        TimerControl::from_bits_truncate(self.cr.get())
    }

    fn is_running(&self) -> bool {
        self.control().contains(TimerControl::ENABLE)
    }

    /// Sets the prescaler and auto-reload values. Rejected with
    /// `ConfigurationError` unless the timer is currently stopped (§4.2).
    pub fn configure(&self, prescaler: u32, reload: u32) -> Result<(), FirmwareError> {
        if self.is_running() {
            return Err(FirmwareError::ConfigurationError);
        }
        self.psc.set(prescaler);
        self.arr.set(reload);
        self.cnt.set(0);
        Ok(())
    }

    pub fn start(&self) {
        self.cr.set(TimerControl::ENABLE.bits());
    }

    pub fn stop(&self) {
        self.cr.set(0);
    }

    /// Installs the kernel's own tick handler. Exactly one: the kernel
    /// calls this once during startup, before interrupts are unmasked.
    pub fn set_kernel_callback(&mut self, cb: Callback) {
        self.kernel_callback = Some(cb);
    }

    /// Installs or clears the secondary user callback slot (§4.2), used by
    /// an overlay for its own periodic needs. An overlay must clear this
    /// before returning control to the loader (§4.6).
    pub fn set_user_callback(&mut self, cb: Option<Callback>) {
        self.user_callback = cb;
    }

    /// Invoked from the timer IRQ handler (bit 0, §6). Acknowledges the
    /// update flag at the source first (§4.1's clear-first discipline),
    /// then runs the kernel callback followed by any installed user
    /// callback.
    pub fn on_interrupt(&self) {
        self.ack();
        if let Some(cb) = self.kernel_callback {
            cb();
        }
        if let Some(cb) = self.user_callback {
            cb();
        }
    }

    fn ack(&self) {
        let status = TimerStatus::from_bits_truncate(self.sr.get());
        self.sr.set((status & !TimerStatus::UPDATE_IRQ).bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[repr(align(4))]
    struct FakeRegs([u8; 0x14]);

    macro_rules! fake_timer {
        ($regs:ident, $timer:ident) => {
            let $regs = FakeRegs([0; 0x14]);
            let mut $timer = unsafe { Timer::new(&$regs as *const FakeRegs as usize) };
        };
    }

    #[test]
    fn configure_rejected_while_running() {
        fake_timer!(_regs, timer);
        timer.start();
        assert_eq!(
            timer.configure(49, 999),
            Err(FirmwareError::ConfigurationError)
        );
        timer.stop();
        assert!(timer.configure(49, 999).is_ok());
    }

    #[test]
    fn configure_writes_prescaler_and_reload() {
        fake_timer!(_regs, timer);
        timer.configure(49, 999).unwrap();
        assert_eq!(timer.psc.get(), 49);
        assert_eq!(timer.arr.get(), 999);
    }

    static KERNEL_TICKS: AtomicU32 = AtomicU32::new(0);
    static USER_TICKS: AtomicU32 = AtomicU32::new(0);
    fn bump_kernel() {
        KERNEL_TICKS.fetch_add(1, Ordering::SeqCst);
    }
    fn bump_user() {
        USER_TICKS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn interrupt_runs_kernel_then_user_callback_and_acks() {
        fake_timer!(_regs, timer);
        timer.set_kernel_callback(bump_kernel);
        timer.set_user_callback(Some(bump_user));
        timer.sr.set(TimerStatus::UPDATE_IRQ.bits());
        let before_kernel = KERNEL_TICKS.load(Ordering::SeqCst);
        let before_user = USER_TICKS.load(Ordering::SeqCst);
        timer.on_interrupt();
        assert_eq!(KERNEL_TICKS.load(Ordering::SeqCst), before_kernel + 1);
        assert_eq!(USER_TICKS.load(Ordering::SeqCst), before_user + 1);
        assert_eq!(timer.sr.get() & TimerStatus::UPDATE_IRQ.bits(), 0);
    }
}
