//! Logvault gRPC Backup Server
//!
//! Exposes the backup protocol over gRPC:
//! - Segment lifecycle (open/write/close/free) for masters replicating their
//!   log
//! - Recovery (start-reading-data, get-recovery-data) for masters taking
//!   over a failed master's partitions
//! - Liveness (ping, get-server-id)

pub mod cluster;
pub mod services;

// Include generated protobuf code
pub mod pb {
    tonic::include_proto!("logvault");
}

pub use cluster::ServerList;
pub use services::BackupService;
