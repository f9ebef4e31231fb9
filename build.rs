// build.rs: record the compiler version for baseline environment metadata.
//
// Exposed to the crate as HARNESS_RUSTC_VERSION. Missing rustc output leaves
// the variable unset; the crate falls back to "unknown".

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=RUSTC");

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok());

    if let Some(version) = version {
        println!("cargo:rustc-env=HARNESS_RUSTC_VERSION={}", version.trim());
    }
}
