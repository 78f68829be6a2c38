//! Wires the block device's [`drv_block::CompletionWaiter`] and the
//! overlay loader's [`overlay::OverlayCall`] to this platform's actual
//! kernel and architecture, keeping both of those crates themselves free
//! of any dependency on `kern`.

use abi::Direction;
use kern::task::QueueId;

const DMA_COMPLETION_QUEUE: QueueId = QueueId(0);

/// Fed by [`spi_dma_irq`], drained by [`QueueCompletionWaiter::wait`].
/// Capacity 1: the block device never starts a second DMA burst before
/// the first one's completion has been observed (§4.4's serialization by
/// the single block-device task).
static mut DMA_COMPLETION: kern::queue::Queue<Direction, 1> = kern::queue::Queue::new();

static mut SPI: Option<drv_spi::Spi> = None;

/// # Safety
/// Must be called exactly once, from task context, before interrupts are
/// unmasked and before any caller uses [`spi`] or [`spi_dma_irq`].
pub unsafe fn init_spi(spi: drv_spi::Spi) {
    SPI = Some(spi);
}

/// # Safety
/// Valid only after [`init_spi`] has run.
pub unsafe fn spi() -> &'static drv_spi::Spi {
    SPI.as_ref().expect("init_spi not called")
}

/// Registered for `abi::irq::SPI_DMA`. Acknowledges at the peripheral
/// through `handle_dma_irq` regardless of which operation completed, and
/// only wakes the block-device task's waiter when the completion really
/// was a DMA transfer's (§9: a manual burst's residual completion must
/// never be mistaken for one).
pub fn spi_dma_irq() {
    // SAFETY: interrupts are masked for the duration of dispatch, so this
    // has no concurrent writer; `init_spi` has already run by the time
    // interrupts are unmasked.
    unsafe {
        if let Some(direction) = spi().handle_dma_irq() {
            let _ = DMA_COMPLETION.send_from_isr(DMA_COMPLETION_QUEUE, direction);
        }
    }
}

/// The block device's view of DMA completion: a queue fed by
/// [`spi_dma_irq`], drained by the one task that owns the SPI bus.
pub struct QueueCompletionWaiter;

impl drv_block::CompletionWaiter for QueueCompletionWaiter {
    fn wait(&mut self) -> Direction {
        // SAFETY: only the block-device task calls this, and it never
        // runs concurrently with `spi_dma_irq` (interrupts, not threads).
        unsafe { DMA_COMPLETION.receive(DMA_COMPLETION_QUEUE) }
    }
}

/// Transfers control into a loaded overlay by swapping the stack pointer
/// and making an ordinary call, per §4.6: "the loader's call into the
/// overlay looks like a regular call". `ra` is preserved by the compiler's
/// own calling convention around the `call` instruction the `asm!` block
/// below expands to, so only `sp` needs explicit save/restore.
pub struct StackSwappedCall;

impl overlay::OverlayCall for StackSwappedCall {
    #[cfg(target_arch = "riscv32")]
    unsafe fn call(&self, entry: usize, stack_top: usize, arg: usize) -> i32 {
        let entry_fn: extern "C" fn(usize) -> i32 = core::mem::transmute(entry);
        let saved_sp: usize;
        let result: i32;
        core::arch::asm!("mv {saved}, sp", saved = out(reg) saved_sp);
        core::arch::asm!("mv sp, {new_sp}", new_sp = in(reg) stack_top);
        result = entry_fn(arg);
        core::arch::asm!("mv sp, {saved}", saved = in(reg) saved_sp);
        result
    }

    #[cfg(not(target_arch = "riscv32"))]
    unsafe fn call(&self, _entry: usize, _stack_top: usize, _arg: usize) -> i32 {
        unreachable!("overlay calls only happen on-target")
    }
}
