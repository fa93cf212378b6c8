//! Build script for tsforge-ffi.
//!
//! Generates the C header consumed by the DuckDB extension wrapper.

use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = PathBuf::from(&crate_dir)
        .join("..")
        .join("..")
        .join("include");

    std::fs::create_dir_all(&out_dir).ok();

    let config =
        cbindgen::Config::from_file("cbindgen.toml").expect("Failed to read cbindgen.toml");

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("tsforge_ffi.h"));
        }
        Err(e) => {
            // Header generation failing must not break the library build
            // (e.g. during cross-compilation checks).
            println!("cargo:warning=cbindgen failed: {}", e);
        }
    }

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");
    println!("cargo:rerun-if-changed=src/telemetry.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");
}
