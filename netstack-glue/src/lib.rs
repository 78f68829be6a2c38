//! Packet-stack periodic glue (§4.8).
//!
//! Drives the third-party packet stack's time-based work: a millisecond
//! tick counter the stack can read, and the alternation between draining
//! received SLIP frames and running the stack's own timeout sweep. Both of
//! those calls are required to be cheap and non-blocking, since they run
//! from the same task (or main loop) on every pass with no preemption
//! inside the stack itself.
//!
//! This crate only wires the SLIP framer to whatever stack implements
//! [`PacketStack`]; the stack's own protocol internals are out of scope
//! here (§1 non-goals).

#![cfg_attr(not(test), no_std)]

use drv_uart_slip::{send_frame, FrameStatus, SlipFramer, Uart};

/// The upper-layer consumer of decoded SLIP frames and the millisecond
/// clock. Implemented by whatever IP/TCP stack is linked into the
/// firmware image; this crate never looks inside a frame.
pub trait PacketStack {
    /// A complete frame arrived. Runs in the same context that called
    /// [`NetstackGlue::poll_rx`].
    fn handle_frame(&mut self, frame: &[u8]);

    /// Run due timeouts/retransmits. `now_ms` is the free-running
    /// millisecond counter driven by [`NetstackGlue::on_tick`].
    fn check_timeouts(&mut self, now_ms: u32);
}

/// Glues a [`Uart`]/[`SlipFramer`] pair to a [`PacketStack`] and tracks the
/// millisecond tick. `N` is the framer's maximum frame size.
pub struct NetstackGlue<'a, S, const N: usize> {
    uart: &'a Uart,
    framer: SlipFramer<N>,
    stack: S,
    ms_ticks: u32,
}

impl<'a, S: PacketStack, const N: usize> NetstackGlue<'a, S, N> {
    pub fn new(uart: &'a Uart, stack: S) -> Self {
        NetstackGlue {
            uart,
            framer: SlipFramer::new(),
            stack,
            ms_ticks: 0,
        }
    }

    /// Call once per millisecond tick, from the timer's user callback or
    /// the kernel tick path. Wraps at `u32::MAX`, matching the "torn reads
    /// are impossible but wraparound is the caller's problem" contract for
    /// monotonic counters (§5).
    pub fn on_tick(&mut self) {
        self.ms_ticks = self.ms_ticks.wrapping_add(1);
    }

    pub fn ticks(&self) -> u32 {
        self.ms_ticks
    }

    /// Drains every byte currently available from the UART, feeding the
    /// framer and dispatching complete frames to the stack. Returns once
    /// the UART has no more bytes ready, so this is bounded by however
    /// many bytes the hardware has buffered, never blocking on new ones.
    pub fn poll_rx(&mut self) {
        while let Some(byte) = self.uart.try_read_rx() {
            if let FrameStatus::Complete = self.framer.push_received_byte(byte) {
                self.stack.handle_frame(self.framer.frame());
                self.framer.reset();
            }
        }
    }

    /// Runs the stack's timeout sweep against the current tick count.
    pub fn check_timeouts(&mut self) {
        self.stack.check_timeouts(self.ms_ticks);
    }

    /// Encodes and transmits one frame. Safe to call only from the
    /// packet-stack's own task (§4.7): there is no lock serializing this
    /// against another transmitter.
    pub fn send(&self, payload: &[u8]) {
        send_frame(self.uart, payload);
    }

    /// Total framing errors observed since startup, for diagnostics.
    pub fn framing_error_count(&self) -> u32 {
        self.framer.error_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::slip;

    #[repr(align(4))]
    struct FakeRegs([u8; 0x10]);

    macro_rules! fake_uart {
        ($regs:ident, $uart:ident) => {
            let $regs = FakeRegs([0; 0x10]);
            let $uart = unsafe { Uart::new(&$regs as *const FakeRegs as usize) };
        };
    }

    fn push_rx_byte(regs: &FakeRegs, byte: u8) {
        unsafe {
            let data = (regs as *const FakeRegs as usize + abi::reg::UART_RX_DATA) as *mut u32;
            let status = (regs as *const FakeRegs as usize + abi::reg::UART_RX_STATUS) as *mut u32;
            *data = byte as u32;
            *status = 1;
        }
    }

    fn clear_rx_available(regs: &FakeRegs) {
        unsafe {
            let status = (regs as *const FakeRegs as usize + abi::reg::UART_RX_STATUS) as *mut u32;
            *status = 0;
        }
    }

    #[derive(Default)]
    struct FakeStack {
        frames: std::vec::Vec<std::vec::Vec<u8>>,
        last_timeout_check: Option<u32>,
    }

    impl PacketStack for FakeStack {
        fn handle_frame(&mut self, frame: &[u8]) {
            self.frames.push(frame.to_vec());
        }

        fn check_timeouts(&mut self, now_ms: u32) {
            self.last_timeout_check = Some(now_ms);
        }
    }

    #[test]
    fn poll_rx_dispatches_one_complete_frame() {
        fake_uart!(regs, uart);
        let mut glue: NetstackGlue<FakeStack, 64> = NetstackGlue::new(&uart, FakeStack::default());

        // The test UART model only holds one pending byte at a time, so
        // feed the frame one byte per poll_rx call.
        for &byte in &[1u8, 2, 3, slip::END] {
            push_rx_byte(&regs, byte);
            glue.poll_rx();
            clear_rx_available(&regs);
        }

        assert_eq!(glue.stack.frames.len(), 1);
        assert_eq!(glue.stack.frames[0], std::vec![1, 2, 3]);
    }

    #[test]
    fn ticks_advance_and_reach_the_stack() {
        fake_uart!(_regs, uart);
        let mut glue: NetstackGlue<FakeStack, 64> = NetstackGlue::new(&uart, FakeStack::default());
        for _ in 0..10 {
            glue.on_tick();
        }
        assert_eq!(glue.ticks(), 10);
        glue.check_timeouts();
        assert_eq!(glue.stack.last_timeout_check, Some(10));
    }

    #[test]
    fn framing_errors_are_counted_through_the_glue() {
        fake_uart!(regs, uart);
        let mut glue: NetstackGlue<FakeStack, 4> = NetstackGlue::new(&uart, FakeStack::default());
        for &byte in &[1u8, 2, 3, 4, 5] {
            push_rx_byte(&regs, byte);
            glue.poll_rx();
            clear_rx_available(&regs);
        }
        assert_eq!(glue.framing_error_count(), 1);
    }
}
