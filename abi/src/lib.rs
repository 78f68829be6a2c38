// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared definitions between the kernel, the peripheral drivers, and the
//! firmware image: the MMIO register map, IRQ bit assignments, and the
//! error taxonomy that every layer propagates through `Result`.
//!
//! Nothing in here is architecture-specific; it is the contract that the
//! RISC-V-specific code in `kern` and the raw-pointer register code in the
//! `drv-*` crates both have to agree on.

#![no_std]

use bitflags::bitflags;

/// Base address of the peripheral MMIO window.
pub const MMIO_BASE: usize = 0x8000_0000;

/// Offsets into the MMIO window. All are relative to [`MMIO_BASE`].
pub mod reg {
    pub const UART_TX_DATA: usize = 0x00;
    pub const UART_TX_STATUS: usize = 0x04;
    pub const UART_RX_DATA: usize = 0x08;
    pub const UART_RX_STATUS: usize = 0x0C;
    pub const LED: usize = 0x10;
    pub const TIMER_CR: usize = 0x20;
    pub const TIMER_SR: usize = 0x24;
    pub const TIMER_PSC: usize = 0x28;
    pub const TIMER_ARR: usize = 0x2C;
    pub const TIMER_CNT: usize = 0x30;
    pub const SPI_CTRL: usize = 0x50;
    pub const SPI_DATA: usize = 0x54;
    pub const SPI_STATUS: usize = 0x58;
    pub const SPI_CS: usize = 0x5C;
    pub const SPI_BURST: usize = 0x60;
    pub const SPI_DMA_ADDR: usize = 0x64;
    pub const SPI_DMA_CTRL: usize = 0x68;
}

bitflags! {
    /// `UART_TX_STATUS` / `UART_RX_STATUS` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct UartStatus: u32 {
        /// TX: cannot accept a new byte. RX: a byte is available.
        const BUSY_OR_AVAILABLE = 1 << 0;
    }

    /// `TIMER_CR` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TimerControl: u32 {
        const ENABLE = 1 << 0;
        const ONE_SHOT = 1 << 1;
    }

    /// `TIMER_SR` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct TimerStatus: u32 {
        const UPDATE_IRQ = 1 << 0;
    }

    /// `SPI_CTRL` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SpiControl: u32 {
        const CPOL = 1 << 0;
        const CPHA = 1 << 1;
        const DIV_MASK = 0b111 << 2;
    }

    /// `SPI_STATUS` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SpiStatus: u32 {
        const BUSY = 1 << 0;
        const DONE = 1 << 1;
        const BURST = 1 << 2;
        const DMA_ACTIVE = 1 << 3;
    }

    /// `SPI_CS` bits.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SpiChipSelect: u32 {
        /// Clear to assert (0 = asserted, per the register map).
        const LEVEL = 1 << 0;
    }

    /// `SPI_DMA_CTRL` bits. Bit 0 is write-only *start*, bit 2 is
    /// read-only *busy*; the two must never be conflated (see
    /// [`crate::OperationKind`]).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct SpiDmaControl: u32 {
        const START = 1 << 0;
        const DIR_RX = 1 << 1;
        const BUSY = 1 << 2;
        const IRQ_EN = 1 << 3;
    }
}

/// IRQ bit assignments within the CPU's pending-IRQ bitmask (§3 of the
/// hardware contract). All other bits are reserved and must be masked.
pub mod irq {
    pub const TIMER: u32 = 0;
    pub const SPI_DMA: u32 = 2;
    pub const COUNT: usize = 32;
}

/// Maximum byte count for a single SPI burst or DMA transfer.
pub const SPI_MAX_BURST: usize = 8192;

/// Sector size used by the block device adapter.
pub const SECTOR_SIZE: usize = 512;

/// SLIP special bytes (RFC 1055).
pub mod slip {
    pub const END: u8 = 0xC0;
    pub const ESC: u8 = 0xDB;
    pub const ESC_END: u8 = 0xDC;
    pub const ESC_ESC: u8 = 0xDD;
}

/// Clock divider index, mapping to a power-of-two division of the system
/// clock: `0 => /1 .. 7 => /128`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockDiv(u8);

impl ClockDiv {
    pub const MAX_INDEX: u8 = 7;

    /// Builds a divider from an index in `0..=7`. Returns `None` if the
    /// index is out of range.
    pub fn from_index(index: u8) -> Option<Self> {
        (index <= Self::MAX_INDEX).then_some(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

/// The abstract error taxonomy used across the core (§7). Variants that
/// represent programming bugs are never returned to a caller in this
/// crate's design: they are converted into a halt-with-diagnostic by the
/// caller. Variants that represent environmental conditions are ordinary
/// `Result` values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FirmwareError {
    /// A peripheral did not signal completion within an expected bound.
    HardwareTimeout,
    /// A SLIP escape sequence was malformed, or a device response was
    /// outside its legal range.
    ProtocolViolation,
    /// An overlay was too large, a DMA address fell outside RAM, or a
    /// burst count exceeded [`SPI_MAX_BURST`]. Caught at the API boundary.
    BoundsViolation,
    /// No free task slot, no free queue slot, or heap exhaustion.
    ResourceExhaustion,
    /// Clear-first discipline was violated, an IRQ index was registered
    /// twice, or the scheduler was started twice.
    ConfigurationError,
    /// A block-device operation failed once; the caller may retry.
    TransientIo,
}

impl FirmwareError {
    /// Whether this error indicates a programming bug that the design
    /// requires to halt the system rather than be recovered from.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            FirmwareError::BoundsViolation | FirmwareError::ConfigurationError
        )
    }
}

/// Which kind of operation currently owns the SPI engine's transferring
/// state. A single-writer flag: set at transaction start, cleared exactly
/// once at completion, consulted by the completion handler so a
/// manual-burst completion is never mistaken for a DMA completion or vice
/// versa (§9, DMA/IRQ/burst-counter interaction).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperationKind {
    Idle,
    ManualBurst,
    Dma,
}

/// Direction of a DMA or burst SPI transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// A task priority. Higher values run first; ties among ready tasks are
/// broken by scan order (see `kern::sched`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Priority(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_div_rejects_out_of_range() {
        assert!(ClockDiv::from_index(7).is_some());
        assert!(ClockDiv::from_index(8).is_none());
    }

    #[test]
    fn fatal_errors_are_exactly_the_programming_bugs() {
        assert!(FirmwareError::BoundsViolation.is_fatal());
        assert!(FirmwareError::ConfigurationError.is_fatal());
        assert!(!FirmwareError::HardwareTimeout.is_fatal());
        assert!(!FirmwareError::TransientIo.is_fatal());
        assert!(!FirmwareError::ProtocolViolation.is_fatal());
        assert!(!FirmwareError::ResourceExhaustion.is_fatal());
    }
}
