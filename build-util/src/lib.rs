use std::env;

/// Confirms that the crate is being built for the RV32IMC target this
/// firmware is written for, and exposes `cfg(has_compressed)` so driver
/// crates can tell whether they're cross-compiling for the real core or
/// running host-side (e.g. under `cargo test`).
///
/// Panics on a clearly wrong target rather than silently miscompiling;
/// host builds (used for unit tests) are left alone.
pub fn expose_target_arch() {
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("riscv32") {
        println!("cargo:rustc-cfg=has_compressed");
    } else if !target.is_empty() && !target.contains("unknown-linux") {
        println!(
            "cargo:warning=building for unexpected target {target}, expected riscv32imc-unknown-none-elf or a host triple for tests"
        );
    }
    println!("cargo:rerun-if-env-changed=TARGET");
}

/// Exposes the board type from the `FIRMWARE_BOARD` envvar into
/// `cfg(target_board="...")`, the way the application selects which
/// linker memory layout and peripheral instantiation to use.
pub fn expose_target_board() {
    if let Ok(board) = env::var("FIRMWARE_BOARD") {
        println!("cargo:rustc-cfg=target_board=\"{board}\"");
    }
    println!("cargo:rerun-if-env-changed=FIRMWARE_BOARD");
}
