fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Builds must not depend on a system-wide protoc.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    tonic_build::compile_protos("proto/telemon.proto")?;
    Ok(())
}
