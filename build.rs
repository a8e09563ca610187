//! Build script for mpdweb
//!
//! Captures the toolchain version and target platform at compile time so the
//! version resource can report the runtime descriptor without probing the
//! environment at startup.

use std::process::Command;

fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(&rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "rustc unknown".to_string());

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_else(|_| "unknown".to_string());
    let target_arch =
        std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=MPDWEB_RUSTC_VERSION={}", rustc_version);
    println!("cargo:rustc-env=MPDWEB_TARGET_OS={}", target_os);
    println!("cargo:rustc-env=MPDWEB_TARGET_ARCH={}", target_arch);
}
