//! Relocatable overlay loader (§4.6).
//!
//! Loads a position-independent image from the block device into a fixed
//! RAM window, validates it fits, transfers control, and tears the window
//! back down on return. The loader never looks inside the image beyond its
//! length: an overlay is position-independent *relative to the window
//! base* by construction (its own linker script fixes that), so the only
//! thing worth validating here is that the image fits the window — the
//! same "is this range actually inside what I think it is" check a
//! flash image header validator performs before trusting anything past it.
//!
//! Kept decoupled from both the block device and the architecture's raw
//! call mechanism, the same way the block device driver's `CompletionWaiter`
//! keeps that crate decoupled from the kernel: [`SectorSource`] supplies
//! sectors, [`OverlayCall`] supplies the actual stack-swapped jump into the
//! window. The firmware binary crate wires both to real implementations.

#![cfg_attr(not(test), no_std)]

use abi::{FirmwareError, SECTOR_SIZE};

/// Supplies sectors to the loader without requiring a dependency on any
/// particular block device implementation.
pub trait SectorSource {
    fn read_sector(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FirmwareError>;
}

/// Performs the actual transfer of control into the overlay window.
///
/// # Safety
/// `entry` and `stack_top` must be addresses the caller has already
/// validated as lying within the overlay window and its reserved stack
/// region; calling this with anything else is undefined behavior, same as
/// calling any other function pointer through a bad address.
pub trait OverlayCall {
    unsafe fn call(&self, entry: usize, stack_top: usize, arg: usize) -> i32;
}

/// Lifecycle state of the overlay window (§4.6).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OverlayState {
    Empty,
    Loaded,
    Running,
    Returning,
}

/// Owns the fixed overlay window and drives it through {empty, loaded,
/// running, returning}.
pub struct OverlayLoader<C: OverlayCall> {
    base: usize,
    window_size: usize,
    stack_top: usize,
    state: OverlayState,
    loaded_len: usize,
    call: C,
}

impl<C: OverlayCall> OverlayLoader<C> {
    /// `base`/`window_size` describe the overlay code+data window;
    /// `stack_top` is the top of the reserved overlay stack region,
    /// distinct from the kernel's own stack (§4.6).
    pub fn new(base: usize, window_size: usize, stack_top: usize, call: C) -> Self {
        OverlayLoader {
            base,
            window_size,
            stack_top,
            state: OverlayState::Empty,
            loaded_len: 0,
            call,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Reads `image_len` bytes starting at `first_lba` from `source` into
    /// the overlay window. Rejects images that would not fit (§4.6's
    /// load-time validation) and refuses to load over a window that is
    /// not currently empty.
    pub fn load<S: SectorSource>(
        &mut self,
        source: &mut S,
        first_lba: u32,
        image_len: usize,
    ) -> Result<(), FirmwareError> {
        if self.state != OverlayState::Empty {
            return Err(FirmwareError::ConfigurationError);
        }
        if image_len > self.window_size {
            return Err(FirmwareError::BoundsViolation);
        }

        let sectors = (image_len + SECTOR_SIZE - 1) / SECTOR_SIZE;
        for i in 0..sectors {
            let mut buf = [0u8; SECTOR_SIZE];
            source.read_sector(first_lba + i as u32, &mut buf)?;
            let offset = i * SECTOR_SIZE;
            let copy_len = core::cmp::min(SECTOR_SIZE, image_len - offset);
            // Safety: `offset + copy_len <= image_len <= window_size`, so
            // this stays inside the validated window.
            let dest = unsafe {
                core::slice::from_raw_parts_mut((self.base + offset) as *mut u8, copy_len)
            };
            dest.copy_from_slice(&buf[..copy_len]);
        }

        self.loaded_len = image_len;
        self.state = OverlayState::Loaded;
        Ok(())
    }

    /// Transfers control to the loaded image and waits for it to return
    /// (§4.6: "the loader's call into the overlay looks like a regular
    /// call"). `teardown` runs during `returning -> empty` and is the
    /// hook for clearing any timer-user-callback or IRQ registration the
    /// overlay installed; it must run even though the overlay is trusted
    /// to have already deregistered on its own, since a crashed or
    /// misbehaving overlay cannot be relied on for that.
    pub fn run(&mut self, arg: usize, teardown: impl FnOnce()) -> Result<i32, FirmwareError> {
        if self.state != OverlayState::Loaded {
            return Err(FirmwareError::ConfigurationError);
        }
        self.state = OverlayState::Running;
        // Safety: `base`/`stack_top` were validated at construction and
        // `load` has confirmed the image fits within `base..base+window_size`.
        let rc = unsafe { self.call.call(self.base, self.stack_top, arg) };
        self.state = OverlayState::Returning;
        teardown();
        self.loaded_len = 0;
        self.state = OverlayState::Empty;
        Ok(rc)
    }

    pub fn loaded_len(&self) -> usize {
        self.loaded_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBlockDevice {
        sectors: std::vec::Vec<[u8; SECTOR_SIZE]>,
    }

    impl SectorSource for FakeBlockDevice {
        fn read_sector(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FirmwareError> {
            let sector = self
                .sectors
                .get(lba as usize)
                .ok_or(FirmwareError::TransientIo)?;
            buf.copy_from_slice(sector);
            Ok(())
        }
    }

    /// A test double standing in for the real stack-swapped jump. Ignores
    /// `entry`/`stack_top` (they are meaningless addresses in a host test)
    /// and just runs a fixed closure to represent "the overlay ran".
    struct ImmediateReturn(i32);

    impl OverlayCall for ImmediateReturn {
        unsafe fn call(&self, _entry: usize, _stack_top: usize, _arg: usize) -> i32 {
            self.0
        }
    }

    fn backing_window(size: usize) -> (std::vec::Vec<u8>, usize) {
        let buf = std::vec![0u8; size];
        let addr = buf.as_ptr() as usize;
        (buf, addr)
    }

    #[test]
    fn oversized_image_is_rejected_without_touching_state() {
        let (window, base) = backing_window(SECTOR_SIZE);
        let mut loader = OverlayLoader::new(base, window.len(), base + window.len(), ImmediateReturn(0));
        let mut source = FakeBlockDevice { sectors: std::vec![[0xAAu8; SECTOR_SIZE]; 4] };
        assert_eq!(
            loader.load(&mut source, 0, SECTOR_SIZE * 2),
            Err(FirmwareError::BoundsViolation)
        );
        assert_eq!(loader.state(), OverlayState::Empty);
    }

    #[test]
    fn load_then_run_cycles_through_the_full_state_machine() {
        let (window, base) = backing_window(SECTOR_SIZE * 2);
        let mut loader = OverlayLoader::new(base, window.len(), base + window.len(), ImmediateReturn(42));
        let mut source = FakeBlockDevice {
            sectors: std::vec![[0x11u8; SECTOR_SIZE], [0x22u8; SECTOR_SIZE]],
        };

        loader.load(&mut source, 0, SECTOR_SIZE + 10).unwrap();
        assert_eq!(loader.state(), OverlayState::Loaded);
        assert_eq!(loader.loaded_len(), SECTOR_SIZE + 10);
        assert_eq!(window[0], 0x11);
        assert_eq!(window[SECTOR_SIZE], 0x22);

        let mut torn_down = false;
        let rc = loader.run(0, || torn_down = true).unwrap();
        assert_eq!(rc, 42);
        assert!(torn_down);
        assert_eq!(loader.state(), OverlayState::Empty);
        assert_eq!(loader.loaded_len(), 0);
    }

    #[test]
    fn cannot_load_over_a_non_empty_window() {
        let (window, base) = backing_window(SECTOR_SIZE);
        let mut loader = OverlayLoader::new(base, window.len(), base + window.len(), ImmediateReturn(0));
        let mut source = FakeBlockDevice { sectors: std::vec![[0u8; SECTOR_SIZE]] };
        loader.load(&mut source, 0, 10).unwrap();
        assert_eq!(
            loader.load(&mut source, 0, 10),
            Err(FirmwareError::ConfigurationError)
        );
    }

    #[test]
    fn running_without_loading_first_is_rejected() {
        let (window, base) = backing_window(SECTOR_SIZE);
        let mut loader = OverlayLoader::new(base, window.len(), base + window.len(), ImmediateReturn(0));
        assert_eq!(
            loader.run(0, || {}),
            Err(FirmwareError::ConfigurationError)
        );
    }

    #[test]
    fn read_error_from_block_device_propagates_and_leaves_window_empty() {
        let (window, base) = backing_window(SECTOR_SIZE);
        let mut loader = OverlayLoader::new(base, window.len(), base + window.len(), ImmediateReturn(0));
        let mut source = FakeBlockDevice { sectors: std::vec![] };
        assert_eq!(
            loader.load(&mut source, 0, 10),
            Err(FirmwareError::TransientIo)
        );
        assert_eq!(loader.state(), OverlayState::Empty);
    }
}
