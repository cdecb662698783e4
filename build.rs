//! Build script for compiling protobuf definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"),
    );

    let mut config = prost_build::Config::new();
    config.type_attribute(".", "#[allow(clippy::enum_variant_names)]");

    config.compile_protos(
        &["proto/import.proto", "proto/relay.proto"],
        &["proto/"],
    )?;

    println!("cargo:rerun-if-changed=proto/import.proto");
    println!("cargo:rerun-if-changed=proto/relay.proto");

    Ok(())
}
