//! Static peripheral instances an interrupt handler or task-table entry
//! function needs to reach without a capture: `kern::irq::Handler` and
//! `drv_timer::Callback` are plain `fn()`, so anything they call must
//! find its state in a `static`, the same way [`crate::completion`]'s SPI
//! handle works.

use drv_timer::Timer;
use drv_uart_slip::Uart;

static mut TIMER: Option<Timer> = None;
static mut UART: Option<Uart> = None;

/// # Safety
/// Must run once, from `main`, before interrupts are unmasked.
pub unsafe fn init_timer(timer: Timer) {
    TIMER = Some(timer);
}

/// # Safety
/// Must run once, from `main`, before interrupts are unmasked.
pub unsafe fn init_uart(uart: Uart) {
    UART = Some(uart);
}

/// # Safety
/// Valid only after [`init_timer`].
pub unsafe fn timer_mut() -> &'static mut Timer {
    TIMER.as_mut().expect("init_timer not called")
}

/// # Safety
/// Valid only after [`init_uart`].
pub unsafe fn uart() -> &'static Uart {
    UART.as_ref().expect("init_uart not called")
}

/// Registered with `Timer::set_kernel_callback` (§4.2): the kernel's own
/// tick consumer. Runs before the overlay/net user callback on every
/// timer IRQ.
pub fn kernel_tick() {
    kern::time::advance();
}

/// Registered for `abi::irq::TIMER` (§6, bit 0).
pub fn timer_irq() {
    // SAFETY: interrupts are masked for the duration of dispatch; `init_timer`
    // has already run by the time interrupts are unmasked.
    unsafe { timer_mut().on_interrupt() }
}
