//! The packet-stack task (§4.8, §4.9): owns the UART once SLIP framing
//! takes over from diagnostics, and drives the injected [`PacketStack`]'s
//! periodic work.
//!
//! The actual TCP/IP stack is an external collaborator (§1 non-goal: "the
//! third-party TCP/IP stack internals"); [`NullPacketStack`] is the seam a
//! real one plugs into, not a stand-in for one.

use netstack_glue::{NetstackGlue, PacketStack};

/// Maximum SLIP frame size this firmware image buffers.
const FRAME_CAPACITY: usize = 1500;

struct NullPacketStack;

impl PacketStack for NullPacketStack {
    fn handle_frame(&mut self, _frame: &[u8]) {}
    fn check_timeouts(&mut self, _now_ms: u32) {}
}

static mut GLUE: Option<NetstackGlue<'static, NullPacketStack, FRAME_CAPACITY>> = None;

/// # Safety
/// Must run once, from `main`, before interrupts are unmasked, after
/// [`crate::periph::init_uart`].
pub unsafe fn init() {
    GLUE = Some(NetstackGlue::new(unsafe { crate::periph::uart() }, NullPacketStack));
}

/// Registered as the timer's secondary user callback (§4.2) once SLIP
/// framing starts owning the UART.
pub fn on_tick() {
    // SAFETY: interrupts are masked for the duration of the timer IRQ;
    // `init` has already run by the time interrupts are unmasked.
    unsafe { GLUE.as_mut().expect("net::init not called").on_tick() }
}

/// Entry point of the packet-stack task (§4.8: "the main loop alternates
/// `framer.poll_rx()` and `stack.check_timeouts()`"). Both calls are cheap
/// and non-blocking by construction, so the task cooperatively yields one
/// kernel tick between passes rather than busy-spinning.
pub extern "C" fn task_main(_: usize) -> ! {
    // SAFETY: see SAFETY comment on the loop below; this is the only task
    // that ever touches the UART after the diagnostics phase hands it off.
    unsafe { crate::periph::uart() }.lock_for_slip();
    loop {
        // SAFETY: this is the only task that ever touches `GLUE`.
        unsafe {
            let glue = GLUE.as_mut().expect("net::init not called");
            glue.poll_rx();
            glue.check_timeouts();
        }
        kern::kernel::delay(1);
    }
}
