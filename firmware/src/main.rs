//! Firmware image entry point: brings up the MMIO peripherals, wires each
//! driver/kernel seam to a concrete implementation, builds the fixed task
//! table, and hands control to the kernel. Never returns.

#![no_std]
#![no_main]

use abi::Priority;
use kern::task::{StackRegion, Task};
use riscv_rt::entry;

mod completion;
mod memory_map;
mod net;
mod periph;
mod storage;

use panic_halt as _;

const IDLE_STACK_SIZE: usize = 1024;
const STORAGE_STACK_SIZE: usize = 4096;
const NET_STACK_SIZE: usize = 4096;

#[repr(align(16))]
struct Stack<const N: usize>([u8; N]);

static mut IDLE_STACK: Stack<IDLE_STACK_SIZE> = Stack([0; IDLE_STACK_SIZE]);
static mut STORAGE_STACK: Stack<STORAGE_STACK_SIZE> = Stack([0; STORAGE_STACK_SIZE]);
static mut NET_STACK: Stack<NET_STACK_SIZE> = Stack([0; NET_STACK_SIZE]);

extern "C" fn idle_main(_: usize) -> ! {
    loop {
        #[cfg(target_arch = "riscv32")]
        riscv::asm::wfi();
    }
}

/// Reconfigures a freshly constructed timer for a 1 kHz tick (§4.2) at the
/// platform's 50 MHz system clock with no prescaling: `50_000_000 / 50_000
/// = 1_000` counts per tick.
fn configure_timer(timer: &drv_timer::Timer) {
    timer.configure(0, 49_999).expect("timer must be stopped at boot");
}

#[entry]
fn main() -> ! {
    // SAFETY: runs once, before the scheduler starts and before interrupts
    // are unmasked; every `init_*`/`unsafe` access below relies on exactly
    // that ordering.
    unsafe {
        memory_map::init_heap();

        // Every driver's register offsets are already relative to the one
        // shared MMIO window (§6), so all three share the same base.
        let uart = drv_uart_slip::Uart::new(abi::MMIO_BASE);
        periph::init_uart(uart);

        let mut timer = drv_timer::Timer::new(abi::MMIO_BASE);
        configure_timer(&timer);
        timer.set_kernel_callback(periph::kernel_tick);
        timer.set_user_callback(Some(net::on_tick));
        periph::init_timer(timer);

        let spi = drv_spi::Spi::new(abi::MMIO_BASE);
        completion::init_spi(spi);

        storage::init();
        net::init();

        kern::irq::register(abi::irq::TIMER, periph::timer_irq)
            .expect("timer IRQ registered exactly once at boot");
        kern::irq::register(abi::irq::SPI_DMA, completion::spi_dma_irq)
            .expect("SPI/DMA IRQ registered exactly once at boot");

        periph::timer_mut().start();

        let tasks: [Task; 3] = [
            Task::new(
                idle_main,
                StackRegion {
                    base: IDLE_STACK.0.as_mut_ptr(),
                    size: IDLE_STACK_SIZE,
                },
                Priority(0),
            ),
            Task::new(
                storage::task_main,
                StackRegion {
                    base: STORAGE_STACK.0.as_mut_ptr(),
                    size: STORAGE_STACK_SIZE,
                },
                Priority(1),
            ),
            Task::new(
                net::task_main,
                StackRegion {
                    base: NET_STACK.0.as_mut_ptr(),
                    size: NET_STACK_SIZE,
                },
                Priority(2),
            ),
        ];

        static mut TASKS: core::mem::MaybeUninit<[Task; 3]> = core::mem::MaybeUninit::uninit();
        TASKS = core::mem::MaybeUninit::new(tasks);
        let tasks_ref: &'static mut [Task] = &mut *TASKS.as_mut_ptr();
        kern::startup::start(tasks_ref)
    }
}
