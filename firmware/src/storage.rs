//! The block-device task (§4.4, §4.6): the single task that owns the SPI
//! bus and, through it, both the SD card adapter and the overlay loader
//! that reads images from it.
//!
//! What actually triggers an overlay load is external to this core (the
//! TUI or a command task, both out of scope per §1's non-goals); this
//! module only keeps the card initialized and the loader parked in
//! `Empty`, ready for whichever caller reaches [`overlay_mut`].

use crate::completion::{QueueCompletionWaiter, StackSwappedCall};
use drv_block::BlockDevice;
use overlay::OverlayLoader;

static mut BLOCK: Option<BlockDevice<'static, QueueCompletionWaiter>> = None;
static mut OVERLAY: Option<OverlayLoader<StackSwappedCall>> = None;

/// # Safety
/// Must run once, from `main`, before interrupts are unmasked, after
/// [`crate::completion::init_spi`].
pub unsafe fn init() {
    let spi = crate::completion::spi();
    BLOCK = Some(BlockDevice::new(spi, QueueCompletionWaiter));

    let (base, end) = crate::memory_map::overlay_window();
    OVERLAY = Some(OverlayLoader::new(
        base,
        end - base,
        crate::memory_map::overlay_stack_top(),
        StackSwappedCall,
    ));
}

/// # Safety
/// Valid only after [`init`], and only from the storage task (§4.4's
/// single-owner discipline).
pub unsafe fn block_mut() -> &'static mut BlockDevice<'static, QueueCompletionWaiter> {
    BLOCK.as_mut().expect("storage::init not called")
}

/// # Safety
/// Valid only after [`init`], and only from the storage task.
pub unsafe fn overlay_mut() -> &'static mut OverlayLoader<StackSwappedCall> {
    OVERLAY.as_mut().expect("storage::init not called")
}

/// Entry point of the storage task. Probes the card once at startup; a
/// card that never leaves idle state is left for later callers to observe
/// as `TransientIo` rather than halting the image, since a missing card is
/// an environmental condition (§7), not a programming bug.
pub extern "C" fn task_main(_: usize) -> ! {
    // A card that never leaves idle state just leaves `BLOCK` uninitialized
    // for card I/O; later callers see the same `TransientIo` this returns.
    // SAFETY: this is the only task that ever touches `BLOCK`/`OVERLAY`.
    unsafe {
        let _ = block_mut().init();
    }
    loop {
        kern::kernel::delay(1000);
    }
}
