//! Build Script for the Logvault Backup Server
//!
//! Compiles the backup protocol buffer definitions into Rust code and
//! generates a file descriptor set for gRPC reflection, so tools like
//! `grpcurl` can discover and call the service without the proto files.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
        std::env::set_var("PROTOC", protoc_path);
    }
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path("proto/backup_descriptor.bin")
        .compile(&["proto/backup.proto"], &["proto"])?;
    Ok(())
}
