fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
    let well_known = protoc_bin_vendored::include_path().map_err(|e| e.to_string())?;

    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc);

    tonic_build::configure()
        .build_client(false)
        .compile_protos_with_config(
            config,
            &["proto/sandbox.proto"],
            &[std::path::PathBuf::from("proto"), well_known],
        )?;

    println!("cargo:rerun-if-changed=proto/sandbox.proto");
    Ok(())
}
