use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Kept in sync by hand with the constants of the same name in `memory.x`;
/// there is no single source of truth linking a linker script and this
/// build script, so a mismatch here is a build.rs bug to fix, not the
/// memory map's.
const RAM_SIZE: u64 = 256 * 1024;
const HEAP_SIZE: u64 = 64 * 1024;
const OVERLAY_WINDOW_SIZE: u64 = 128 * 1024;
const OVERLAY_STACK_SIZE: u64 = 4 * 1024;
const OVERLAY_HEAP_SIZE: u64 = 16 * 1024;
/// Rough floor for the kernel's own stack plus firmware text/data/bss;
/// the overlap check below only confirms the reserved regions leave at
/// least this much room, not that the image itself fits it.
const MINIMUM_KERNEL_REGION: u64 = 32 * 1024;

fn main() {
    let reserved = HEAP_SIZE + OVERLAY_WINDOW_SIZE + OVERLAY_STACK_SIZE + OVERLAY_HEAP_SIZE;
    assert!(
        reserved + MINIMUM_KERNEL_REGION <= RAM_SIZE,
        "memory map doesn't fit: heap + overlay window/stack/heap ({reserved} bytes) \
         leaves less than {MINIMUM_KERNEL_REGION} bytes of RAM ({RAM_SIZE} bytes total) \
         for firmware code/data/bss and the kernel stack"
    );

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set by cargo"));
    File::create(out_dir.join("memory.x"))
        .unwrap()
        .write_all(include_bytes!("memory.x"))
        .unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");

    build_util::expose_target_arch();
    build_util::expose_target_board();
}
