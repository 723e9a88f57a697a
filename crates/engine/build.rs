// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    prost_build::compile_protos(&["proto/fleet/v1/fleet.proto"], &["proto"])?;
    println!("cargo:rerun-if-changed=proto/fleet/v1/fleet.proto");
    Ok(())
}
