//! Process-wide state (§4.9): the linker-provided bounds of the regions
//! this firmware actually reads at runtime (the heap and the overlay
//! window/stack), and the heap allocator built on top of them. The full
//! memory map names more symbols than this (`__text_start/_end`,
//! `__data_start/_end`, `__bss_start/_end`, `__stack_top`,
//! `__overlay_heap_start/_end`): those bound regions riscv-rt's own
//! startup code and the linker script manage directly (zero-init, the
//! kernel's own stack), with no Rust-side reader, so they stay in
//! `memory.x` without an accessor here.
//!
//! None of these symbols have a value Rust can see at compile time; they
//! are addresses, not data, so every one of them is declared as a
//! zero-sized `extern "C"` and only ever used via `&symbol as *const _ as
//! usize`, the standard way a linker-script-provided bound is read from
//! Rust.

extern "C" {
    static __heap_start: u8;
    static __heap_end: u8;
    static __overlay_base: u8;
    static __overlay_end: u8;
    static __overlay_stack_top: u8;
}

fn addr(sym: &u8) -> usize {
    sym as *const u8 as usize
}

pub fn heap_range() -> (usize, usize) {
    unsafe { (addr(&__heap_start), addr(&__heap_end)) }
}

pub fn overlay_window() -> (usize, usize) {
    unsafe { (addr(&__overlay_base), addr(&__overlay_end)) }
}

pub fn overlay_stack_top() -> usize {
    unsafe { addr(&__overlay_stack_top) }
}

/// `linked_list_allocator`'s own `LockedHeap` is built on a CAS-based
/// spinlock, which the RV32IMC target (no atomic extension) cannot execute;
/// this single-core platform's actual mutual-exclusion primitive is an
/// interrupt-masking critical section, so the global allocator is locked
/// with that instead.
struct CriticalSectionHeap(critical_section::Mutex<core::cell::RefCell<linked_list_allocator::Heap>>);

unsafe impl core::alloc::GlobalAlloc for CriticalSectionHeap {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        critical_section::with(|cs| {
            self.0
                .borrow(cs)
                .borrow_mut()
                .allocate_first_fit(layout)
                .map_or(core::ptr::null_mut(), |a| a.as_ptr())
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: core::alloc::Layout) {
        critical_section::with(|cs| {
            self.0
                .borrow(cs)
                .borrow_mut()
                .deallocate(core::ptr::NonNull::new_unchecked(ptr), layout)
        })
    }
}

#[global_allocator]
static ALLOCATOR: CriticalSectionHeap =
    CriticalSectionHeap(critical_section::Mutex::new(core::cell::RefCell::new(
        linked_list_allocator::Heap::empty(),
    )));

/// Hands the firmware-image heap region to the global allocator. Must run
/// exactly once, before the first task that might allocate starts
/// (§3: "heap: single-task-owned"; the overlay's own heap is a separate
/// region entirely and is initialized only while an overlay is loaded, by
/// the overlay itself, never by this call).
///
/// # Safety
/// Must be called exactly once, before any allocation, and before
/// interrupts are unmasked.
pub unsafe fn init_heap() {
    let (start, end) = heap_range();
    critical_section::with(|cs| {
        ALLOCATOR
            .0
            .borrow(cs)
            .borrow_mut()
            .init(start as *mut u8, end - start)
    });
}
