// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UART register access and the SLIP framer built on top of it (§4.7).
//!
//! The UART is a single globally-shared resource. Before the packet stack
//! is running, the start-of-day banner may write diagnostics straight to
//! it; once SLIP is active, the UART belongs exclusively to the framer and
//! [`Uart::lock_for_slip`] starts failing every further diagnostic write
//! rather than interleaving bytes into a frame in progress.
//!
//! The framer's byte-level state (`pending_escape`, the assembly buffer) is
//! owned by whichever single context feeds it bytes — the UART RX ISR or a
//! polling loop, never both. Nothing in here takes a lock to enforce that;
//! it's a contract the caller is responsible for, same as the single
//! `BlockDevice` task owning the SPI engine.

#![cfg_attr(not(test), no_std)]

use abi::{slip, FirmwareError, UartStatus};
use core::cell::Cell;
use tinyvec::ArrayVec;
use vcell::VolatileCell;

/// Handle to the UART's MMIO registers.
pub struct Uart {
    tx_data: &'static VolatileCell<u32>,
    tx_status: &'static VolatileCell<u32>,
    rx_data: &'static VolatileCell<u32>,
    rx_status: &'static VolatileCell<u32>,
    /// Set once SLIP takes ownership of the wire (§4.7, §9). Diagnostic
    /// writes are rejected rather than silently interleaved into a frame.
    locked: Cell<bool>,
}

impl Uart {
    /// # Safety
    /// `base` must point at the UART's tx/rx data and status registers
    /// laid out per §6, live for `'static`, with no other `Uart` handle
    /// aliasing the same registers.
    pub unsafe fn new(base: usize) -> Self {
        let reg = |offset: usize| -> &'static VolatileCell<u32> {
            &*((base + offset) as *const VolatileCell<u32>)
        };
        Uart {
            tx_data: reg(abi::reg::UART_TX_DATA),
            tx_status: reg(abi::reg::UART_TX_STATUS),
            rx_data: reg(abi::reg::UART_RX_DATA),
            rx_status: reg(abi::reg::UART_RX_STATUS),
            locked: Cell::new(false),
        }
    }

    fn tx_busy(&self) -> bool {
        UartStatus::from_bits_truncate(self.tx_status.get()).contains(UartStatus::BUSY_OR_AVAILABLE)
    }

    fn rx_available(&self) -> bool {
        UartStatus::from_bits_truncate(self.rx_status.get()).contains(UartStatus::BUSY_OR_AVAILABLE)
    }

    /// Non-blocking transmit attempt. Returns `false` if the transmitter
    /// is still busy with a prior byte.
    pub fn try_write_tx(&self, byte: u8) -> bool {
        if self.tx_busy() {
            return false;
        }
        self.tx_data.set(byte as u32);
        true
    }

    /// Busy-waits for transmitter readiness, then writes `byte`. Used by
    /// the SLIP encoder, where transmits are already serialized by being
    /// called only from the packet stack's own task (§4.7).
    pub fn write_byte_blocking(&self, byte: u8) {
        while self.tx_busy() {}
        self.tx_data.set(byte as u32);
    }

    /// Non-blocking receive attempt.
    pub fn try_read_rx(&self) -> Option<u8> {
        if self.rx_available() {
            Some((self.rx_data.get() & 0xFF) as u8)
        } else {
            None
        }
    }

    /// Locks the UART for SLIP's exclusive use. Irreversible by design:
    /// there is no unlock, because nothing in this firmware ever hands the
    /// wire back to diagnostics once the packet stack starts (§9).
    pub fn lock_for_slip(&self) {
        self.locked.set(true);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    /// Writes a raw diagnostic byte string, busy-waiting per byte. Fails
    /// once [`Uart::lock_for_slip`] has been called.
    pub fn diagnostic_write(&self, bytes: &[u8]) -> Result<(), FirmwareError> {
        if self.locked.get() {
            return Err(FirmwareError::ConfigurationError);
        }
        for &b in bytes {
            self.write_byte_blocking(b);
        }
        Ok(())
    }
}

/// Outcome of feeding one byte to [`SlipFramer::push_received_byte`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameStatus {
    /// The frame is still being assembled.
    Continuing,
    /// A complete frame is ready; read it with [`SlipFramer::frame`], then
    /// call [`SlipFramer::reset`] before feeding the next byte.
    Complete,
    /// A framing error occurred (bad escape sequence or buffer overflow);
    /// the in-progress frame was discarded and the error counted. The
    /// framer resyncs automatically on the next `END` byte.
    Error,
}

/// A SLIP decoder with a fixed-size assembly buffer of `N` bytes (§4.7).
pub struct SlipFramer<const N: usize> {
    buf: ArrayVec<[u8; N]>,
    pending_escape: bool,
    error_count: u32,
}

impl<const N: usize> Default for SlipFramer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SlipFramer<N> {
    pub fn new() -> Self {
        SlipFramer {
            buf: ArrayVec::new(),
            pending_escape: false,
            error_count: 0,
        }
    }

    /// Number of framing errors seen since startup.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// The assembled frame. Only meaningful right after
    /// [`push_received_byte`](Self::push_received_byte) returns
    /// [`FrameStatus::Complete`].
    pub fn frame(&self) -> &[u8] {
        &self.buf
    }

    /// Clears the assembled frame, readying the framer for the next one.
    /// Must be called after consuming a `Complete` frame.
    pub fn reset(&mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.buf.clear();
        self.pending_escape = false;
    }

    fn store(&mut self, byte: u8) -> FrameStatus {
        if self.buf.try_push(byte).is_some() {
            self.discard();
            self.error_count += 1;
            return FrameStatus::Error;
        }
        FrameStatus::Continuing
    }

    /// Feeds one byte received from the UART into the decoder. Called
    /// from either the UART RX ISR or a polling loop — never both for the
    /// same framer instance (see the module docs).
    pub fn push_received_byte(&mut self, byte: u8) -> FrameStatus {
        if self.pending_escape {
            self.pending_escape = false;
            return match byte {
                slip::ESC_END => self.store(slip::END),
                slip::ESC_ESC => self.store(slip::ESC),
                _ => {
                    self.discard();
                    self.error_count += 1;
                    FrameStatus::Error
                }
            };
        }

        if byte == slip::END {
            if self.buf.is_empty() {
                // Back-to-back END bytes delimit no frame; not an error.
                return FrameStatus::Continuing;
            }
            return FrameStatus::Complete;
        }

        if byte == slip::ESC {
            self.pending_escape = true;
            return FrameStatus::Continuing;
        }

        self.store(byte)
    }
}

/// Encodes and transmits `payload` as one SLIP frame, busy-waiting on
/// transmitter readiness per byte (§4.7). No locking: every transmit is
/// serialized by being called only from the packet stack's own task.
pub fn send_frame(uart: &Uart, payload: &[u8]) {
    uart.write_byte_blocking(slip::END);
    for &byte in payload {
        match byte {
            slip::END => {
                uart.write_byte_blocking(slip::ESC);
                uart.write_byte_blocking(slip::ESC_END);
            }
            slip::ESC => {
                uart.write_byte_blocking(slip::ESC);
                uart.write_byte_blocking(slip::ESC_ESC);
            }
            other => uart.write_byte_blocking(other),
        }
    }
    uart.write_byte_blocking(slip::END);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4))]
    struct FakeRegs([u8; 0x10]);

    macro_rules! fake_uart {
        ($regs:ident, $uart:ident) => {
            let $regs = FakeRegs([0; 0x10]);
            let $uart = unsafe { Uart::new(&$regs as *const FakeRegs as usize) };
        };
    }

    #[test]
    fn diagnostic_write_rejected_once_locked() {
        fake_uart!(_regs, uart);
        assert!(uart.diagnostic_write(b"boot\n").is_ok());
        uart.lock_for_slip();
        assert_eq!(
            uart.diagnostic_write(b"oops"),
            Err(FirmwareError::ConfigurationError)
        );
    }

    #[test]
    fn plain_frame_without_escapes() {
        let mut framer: SlipFramer<64> = SlipFramer::new();
        assert_eq!(framer.push_received_byte(1), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(2), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(3), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Complete);
        assert_eq!(framer.frame(), &[1, 2, 3]);
    }

    #[test]
    fn leading_end_bytes_do_not_start_an_empty_frame() {
        let mut framer: SlipFramer<64> = SlipFramer::new();
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(9), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Complete);
        assert_eq!(framer.frame(), &[9]);
    }

    #[test]
    fn escaped_end_and_esc_bytes_decode_correctly() {
        let mut framer: SlipFramer<64> = SlipFramer::new();
        framer.push_received_byte(slip::ESC);
        assert_eq!(framer.push_received_byte(slip::ESC_END), FrameStatus::Continuing);
        framer.push_received_byte(slip::ESC);
        assert_eq!(framer.push_received_byte(slip::ESC_ESC), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Complete);
        assert_eq!(framer.frame(), &[slip::END, slip::ESC]);
    }

    #[test]
    fn bad_escape_sequence_is_a_framing_error_and_resyncs() {
        let mut framer: SlipFramer<64> = SlipFramer::new();
        framer.push_received_byte(1);
        framer.push_received_byte(slip::ESC);
        assert_eq!(framer.push_received_byte(0x42), FrameStatus::Error);
        assert_eq!(framer.error_count(), 1);
        assert_eq!(framer.push_received_byte(7), FrameStatus::Continuing);
        assert_eq!(framer.push_received_byte(slip::END), FrameStatus::Complete);
        assert_eq!(framer.frame(), &[7]);
    }

    #[test]
    fn overflowing_the_buffer_discards_the_frame_and_counts_an_error() {
        let mut framer: SlipFramer<4> = SlipFramer::new();
        framer.push_received_byte(1);
        framer.push_received_byte(2);
        framer.push_received_byte(3);
        framer.push_received_byte(4);
        assert_eq!(framer.push_received_byte(5), FrameStatus::Error);
        assert_eq!(framer.error_count(), 1);
    }

    #[test]
    fn round_trip_through_encoder_and_decoder() {
        let payload = [slip::END, slip::ESC, 0, 1, 2, slip::ESC, slip::END];
        let mut encoded: ArrayVec<[u8; 256]> = ArrayVec::new();
        encoded.push(slip::END);
        for &byte in &payload {
            match byte {
                slip::END => {
                    encoded.push(slip::ESC);
                    encoded.push(slip::ESC_END);
                }
                slip::ESC => {
                    encoded.push(slip::ESC);
                    encoded.push(slip::ESC_ESC);
                }
                other => encoded.push(other),
            }
        }
        encoded.push(slip::END);

        let mut framer: SlipFramer<64> = SlipFramer::new();
        let mut status = FrameStatus::Continuing;
        for &byte in encoded.iter().skip(1) {
            status = framer.push_received_byte(byte);
        }
        assert_eq!(status, FrameStatus::Complete);
        assert_eq!(framer.frame(), &payload[..]);
    }
}
