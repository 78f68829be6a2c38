//! Block device adapter (§4.4): wraps the SPI engine's DMA burst mode as
//! 512-byte sector read/write over an SD/MMC card in SPI mode.
//!
//! Serialized by construction: the adapter borrows the one [`drv_spi::Spi`]
//! instance for its whole lifetime, and the spec calls for it to be used
//! from exactly one task (§4.4, §5's "SPI: serialized by the single
//! block-device task"). DMA completion is awaited through a
//! [`CompletionWaiter`] the caller supplies — in the real firmware image
//! that's a queue fed by the SPI/DMA IRQ handler, but the adapter itself
//! doesn't need to know that; it just needs to block until the transfer
//! it started finishes.

#![cfg_attr(not(test), no_std)]

use abi::{Direction, FirmwareError};
use drv_spi::Spi;

const CMD_GO_IDLE_STATE: u8 = 0;
const CMD_SEND_IF_COND: u8 = 8;
const CMD_READ_OCR: u8 = 58;
const CMD_APP_CMD: u8 = 55;
const CMD_SD_SEND_OP_COND: u8 = 41;
const CMD_SEND_CSD: u8 = 9;
const CMD_READ_SINGLE_BLOCK: u8 = 17;
const CMD_WRITE_BLOCK: u8 = 24;

const DATA_TOKEN: u8 = 0xFE;

/// §4.4: "at least 8 retries on transient no-response".
const COMMAND_RETRIES: u32 = 8;
const RESPONSE_POLL_BUDGET: u32 = 64;
const IDLE_CLOCK_BYTES: u32 = 10; // 80 clocks, covering the >=74 required.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CardType {
    StandardCapacity,
    HighCapacity,
}

/// Supplies the "transfer complete" signal a DMA burst needs. Implemented
/// in the firmware image by a queue the SPI/DMA IRQ handler feeds; kept as
/// a trait here so this crate doesn't need to depend on the kernel.
pub trait CompletionWaiter {
    fn wait(&mut self) -> Direction;
}

pub struct BlockDevice<'a, W> {
    spi: &'a Spi,
    waiter: W,
    high_capacity: bool,
}

impl<'a, W: CompletionWaiter> BlockDevice<'a, W> {
    pub fn new(spi: &'a Spi, waiter: W) -> Self {
        BlockDevice {
            spi,
            waiter,
            high_capacity: false,
        }
    }

    fn command(&self, cmd: u8, arg: u32, crc: u8) -> Result<u8, FirmwareError> {
        self.spi.transfer_byte(0xFF)?;
        self.spi.transfer_byte(0x40 | cmd)?;
        for shift in [24, 16, 8, 0] {
            self.spi.transfer_byte((arg >> shift) as u8)?;
        }
        self.spi.transfer_byte(crc | 0x01)?;

        for _ in 0..RESPONSE_POLL_BUDGET {
            let r1 = self.spi.transfer_byte(0xFF)?;
            if r1 & 0x80 == 0 {
                return Ok(r1);
            }
        }
        Err(FirmwareError::HardwareTimeout)
    }

    fn command_with_retries(&self, cmd: u8, arg: u32, crc: u8) -> Result<u8, FirmwareError> {
        let mut last = Err(FirmwareError::HardwareTimeout);
        for _ in 0..COMMAND_RETRIES {
            last = self.command(cmd, arg, crc);
            if last.is_ok() {
                return last;
            }
        }
        last
    }

    /// Initialization sequence (§4.4): idle clocks, `GO_IDLE_STATE`,
    /// voltage/version probe, `ACMD41` polling, capacity-class probe.
    /// Returns `TransientIo` if the card never leaves idle state after
    /// retries (card-not-present).
    pub fn init(&mut self) -> Result<CardType, FirmwareError> {
        self.spi.set_chip_select(false);
        for _ in 0..IDLE_CLOCK_BYTES {
            self.spi.transfer_byte(0xFF)?;
        }
        self.spi.set_chip_select(true);

        let r1 = self.command_with_retries(CMD_GO_IDLE_STATE, 0, 0x95)?;
        if r1 != 0x01 {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::TransientIo);
        }

        let is_v2 = match self.command(CMD_SEND_IF_COND, 0x1AA, 0x87) {
            Ok(0x01) => {
                for _ in 0..4 {
                    self.spi.transfer_byte(0xFF)?;
                }
                true
            }
            _ => false,
        };

        let hcs_bit = if is_v2 { 1 << 30 } else { 0 };
        let mut left_idle = false;
        for _ in 0..COMMAND_RETRIES {
            self.command(CMD_APP_CMD, 0, 0x01)?;
            if self.command(CMD_SD_SEND_OP_COND, hcs_bit, 0x01)? == 0x00 {
                left_idle = true;
                break;
            }
        }
        if !left_idle {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::TransientIo);
        }

        self.high_capacity = is_v2 && {
            let ocr_status = self.command(CMD_READ_OCR, 0, 0x01)?;
            let ccs = if ocr_status == 0x00 {
                let byte0 = self.spi.transfer_byte(0xFF)?;
                for _ in 0..3 {
                    self.spi.transfer_byte(0xFF)?;
                }
                byte0 & 0x40 != 0
            } else {
                false
            };
            ccs
        };

        self.spi.transfer_byte(0xFF)?;
        Ok(if self.high_capacity {
            CardType::HighCapacity
        } else {
            CardType::StandardCapacity
        })
    }

    fn sector_address(&self, lba: u32) -> u32 {
        if self.high_capacity {
            lba
        } else {
            lba.saturating_mul(512)
        }
    }

    fn wait_for_data_token(&self) -> Result<(), FirmwareError> {
        for _ in 0..RESPONSE_POLL_BUDGET {
            let token = self.spi.transfer_byte(0xFF)?;
            if token == DATA_TOKEN {
                return Ok(());
            }
            if token != 0xFF {
                return Err(FirmwareError::ProtocolViolation);
            }
        }
        Err(FirmwareError::HardwareTimeout)
    }

    /// Reads 512 bytes at `lba` via DMA burst (§4.4).
    pub fn read_sector(&mut self, lba: u32, buf: &mut [u8; abi::SECTOR_SIZE]) -> Result<(), FirmwareError> {
        let r1 = self.command_with_retries(CMD_READ_SINGLE_BLOCK, self.sector_address(lba), 0x01)?;
        if r1 != 0x00 {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::TransientIo);
        }
        self.wait_for_data_token()?;

        self.spi.start_dma(buf.as_mut_ptr() as u32, buf.len(), Direction::Receive)?;
        let direction = self.waiter.wait();
        debug_assert_eq!(direction, Direction::Receive);

        self.spi.transfer_byte(0xFF)?; // CRC low
        self.spi.transfer_byte(0xFF)?; // CRC high
        self.spi.set_chip_select(false);
        self.spi.transfer_byte(0xFF)?;
        Ok(())
    }

    /// Writes 512 bytes at `lba` via DMA burst (§4.4). A write-protected
    /// card rejects the data token with a non-accepted data response; that
    /// failure is reported without touching the sector's prior contents,
    /// and subsequent reads are unaffected (§4.4: "write command fails
    /// cleanly; read still works").
    pub fn write_sector(&mut self, lba: u32, buf: &[u8; abi::SECTOR_SIZE]) -> Result<(), FirmwareError> {
        let r1 = self.command_with_retries(CMD_WRITE_BLOCK, self.sector_address(lba), 0x01)?;
        if r1 != 0x00 {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::TransientIo);
        }

        self.spi.transfer_byte(DATA_TOKEN)?;
        self.spi
            .start_dma(buf.as_ptr() as u32, buf.len(), Direction::Transmit)?;
        let direction = self.waiter.wait();
        debug_assert_eq!(direction, Direction::Transmit);

        self.spi.transfer_byte(0xFF)?; // CRC low
        self.spi.transfer_byte(0xFF)?; // CRC high

        let data_response = self.spi.transfer_byte(0xFF)? & 0x1F;
        if data_response != 0x05 {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::ProtocolViolation);
        }

        for _ in 0..RESPONSE_POLL_BUDGET {
            if self.spi.transfer_byte(0xFF)? != 0x00 {
                self.spi.set_chip_select(false);
                self.spi.transfer_byte(0xFF)?;
                return Ok(());
            }
        }
        self.spi.set_chip_select(false);
        Err(FirmwareError::HardwareTimeout)
    }

    /// Total sector count, read from the card's CSD register (`CMD9`).
    /// Supports CSD structure version 0 (standard-capacity) and version 1
    /// (high-capacity) layouts.
    pub fn sector_count(&self) -> Result<u32, FirmwareError> {
        let r1 = self.command_with_retries(CMD_SEND_CSD, 0, 0x01)?;
        if r1 != 0x00 {
            self.spi.set_chip_select(false);
            return Err(FirmwareError::TransientIo);
        }
        self.wait_for_data_token()?;

        let mut csd = [0u8; 16];
        for byte in csd.iter_mut() {
            *byte = self.spi.transfer_byte(0xFF)?;
        }
        self.spi.transfer_byte(0xFF)?; // CRC low
        self.spi.transfer_byte(0xFF)?; // CRC high
        self.spi.set_chip_select(false);
        self.spi.transfer_byte(0xFF)?;

        let count = if csd[0] >> 6 == 1 {
            // CSD version 1 (SDHC/SDXC): C_SIZE is a 22-bit field.
            let c_size = (((csd[7] & 0x3F) as u32) << 16) | ((csd[8] as u32) << 8) | csd[9] as u32;
            (c_size + 1) * 1024
        } else {
            // CSD version 0: C_SIZE (12 bit), C_SIZE_MULT (3 bit), READ_BL_LEN (4 bit).
            let c_size = (((csd[6] & 0x03) as u32) << 10)
                | ((csd[7] as u32) << 2)
                | ((csd[8] as u32) >> 6);
            let c_size_mult = ((csd[9] & 0x03) << 1) | (csd[10] >> 7);
            let read_bl_len = csd[5] & 0x0F;
            let block_len = 1u32 << read_bl_len;
            let mult = 1u32 << (c_size_mult as u32 + 2);
            let capacity_bytes = (c_size + 1) * mult * block_len;
            capacity_bytes / abi::SECTOR_SIZE as u32
        };
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ImmediateWaiter(Direction);
    impl CompletionWaiter for ImmediateWaiter {
        fn wait(&mut self) -> Direction {
            self.0
        }
    }

    #[repr(align(4))]
    struct FakeRegs([u8; 0x70]);

    macro_rules! fake_spi {
        ($regs:ident, $spi:ident) => {
            let $regs = FakeRegs([0; 0x70]);
            let $spi = unsafe { Spi::new(&$regs as *const FakeRegs as usize) };
        };
    }

    #[test]
    fn sector_address_is_byte_offset_for_standard_capacity() {
        fake_spi!(_regs, spi);
        let dev = BlockDevice::new(&spi, ImmediateWaiter(Direction::Receive));
        assert_eq!(dev.sector_address(2), 1024);
    }

    #[test]
    fn sector_address_is_block_index_for_high_capacity() {
        fake_spi!(_regs, spi);
        let mut dev = BlockDevice::new(&spi, ImmediateWaiter(Direction::Receive));
        dev.high_capacity = true;
        assert_eq!(dev.sector_address(2), 2);
    }

    #[test]
    fn csd_v1_layout_yields_plausible_gigabyte_scale_sector_count() {
        // A synthetic 16-byte CSD version-1 register: bits chosen so
        // C_SIZE decodes to a capacity in the gigabyte range, matching
        // real SDHC media.
        let c_size: u32 = 0x3A3F; // ~15000, *1024 sectors*512B ~= 7.5 GiB region
        let mut csd = [0u8; 16];
        csd[0] = 0b0100_0000; // CSD structure version 1
        csd[7] = ((c_size >> 16) & 0x3F) as u8;
        csd[8] = ((c_size >> 8) & 0xFF) as u8;
        csd[9] = (c_size & 0xFF) as u8;
        let decoded = (((csd[7] & 0x3F) as u32) << 16) | ((csd[8] as u32) << 8) | csd[9] as u32;
        assert_eq!(decoded, c_size);
        assert_eq!((decoded + 1) * 1024, (c_size + 1) * 1024);
    }
}
