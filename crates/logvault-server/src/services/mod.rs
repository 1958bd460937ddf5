//! Backup gRPC service: translates wire requests into engine operations and
//! engine errors back into in-band statuses.
//!
//! Two error channels, per the protocol contract:
//! - operation failures a master reacts to (`BAD_SEGMENT_ID`,
//!   `SEGMENT_ALREADY_OPEN`, ...) travel as `BackupStatus` inside an OK gRPC
//!   response;
//! - transport-level failures (a recovery read outliving its deadline) are
//!   gRPC statuses and leave engine state untouched.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use logvault_core::{Error, Tablet, TabletState};
use logvault_storage::BackupEngine;

use crate::cluster::ServerList;
use crate::pb;
use crate::pb::backup_server::Backup;

pub struct BackupService {
    engine: Arc<BackupEngine>,
    cluster: Arc<ServerList>,
    server_id: u64,
}

impl BackupService {
    pub fn new(engine: Arc<BackupEngine>, cluster: Arc<ServerList>, server_id: u64) -> Self {
        Self {
            engine,
            cluster,
            server_id,
        }
    }
}

/// In-band status for an engine error. `Timeout` never reaches this map:
/// `get_recovery_data`, the only operation that produces it, intercepts it
/// and surfaces a transport-level DEADLINE_EXCEEDED instead.
fn status_for(err: &Error) -> pb::BackupStatus {
    match err {
        Error::BadSegmentId { .. } => pb::BackupStatus::BadSegmentId,
        Error::SegmentAlreadyOpen { .. } => pb::BackupStatus::SegmentAlreadyOpen,
        Error::SegmentOverflow { .. } => pb::BackupStatus::SegmentOverflow,
        Error::OutOfStorage | Error::PoolExhausted | Error::Io(_) | Error::InvalidConfig(_) => {
            pb::BackupStatus::StorageException
        }
        Error::SegmentRecoveryFailed { .. } | Error::MalformedSegment(_) => {
            pb::BackupStatus::SegmentRecoveryFailed
        }
        Error::CallerNotInCluster(_) => pb::BackupStatus::CallerNotInCluster,
        Error::Timeout(_) => {
            unreachable!("get_recovery_data intercepts Timeout before calling status_for")
        }
    }
}

fn tablet_from_wire(tablet: &pb::Tablet) -> Tablet {
    let state = match pb::TabletState::try_from(tablet.state) {
        Ok(pb::TabletState::Recovering) => TabletState::Recovering,
        _ => TabletState::Normal,
    };
    Tablet {
        table_id: tablet.table_id,
        start_object_id: tablet.start_object_id,
        end_object_id: tablet.end_object_id,
        partition_id: tablet.partition_id,
        state,
    }
}

#[tonic::async_trait]
impl Backup for BackupService {
    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, segment_id = request.get_ref().segment_id))]
    async fn open_segment(
        &self,
        request: Request<pb::OpenSegmentRequest>,
    ) -> Result<Response<pb::OpenSegmentResponse>, Status> {
        let req = request.into_inner();
        // First contact from a master doubles as its enlistment.
        self.cluster.enlist(req.master_id);
        let status = match self.engine.open_segment(req.master_id, req.segment_id).await {
            Ok(()) => pb::BackupStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "open segment failed");
                status_for(&err)
            }
        };
        Ok(Response::new(pb::OpenSegmentResponse {
            status: status as i32,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, segment_id = request.get_ref().segment_id, len = request.get_ref().data.len()))]
    async fn write_segment(
        &self,
        request: Request<pb::WriteSegmentRequest>,
    ) -> Result<Response<pb::WriteSegmentResponse>, Status> {
        let req = request.into_inner();
        let status = match self
            .engine
            .write_segment(req.master_id, req.segment_id, req.offset, &req.data)
            .await
        {
            Ok(()) => pb::BackupStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "write segment failed");
                status_for(&err)
            }
        };
        Ok(Response::new(pb::WriteSegmentResponse {
            status: status as i32,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, segment_id = request.get_ref().segment_id))]
    async fn close_segment(
        &self,
        request: Request<pb::CloseSegmentRequest>,
    ) -> Result<Response<pb::CloseSegmentResponse>, Status> {
        let req = request.into_inner();
        let status = match self
            .engine
            .close_segment(req.master_id, req.segment_id)
            .await
        {
            Ok(()) => pb::BackupStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "close segment failed");
                status_for(&err)
            }
        };
        Ok(Response::new(pb::CloseSegmentResponse {
            status: status as i32,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, segment_id = request.get_ref().segment_id))]
    async fn free_segment(
        &self,
        request: Request<pb::FreeSegmentRequest>,
    ) -> Result<Response<pb::FreeSegmentResponse>, Status> {
        let req = request.into_inner();
        let status = match self.engine.free_segment(req.master_id, req.segment_id).await {
            Ok(()) => pb::BackupStatus::Ok,
            Err(err) => {
                tracing::warn!(error = %err, "free segment failed");
                status_for(&err)
            }
        };
        Ok(Response::new(pb::FreeSegmentResponse {
            status: status as i32,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, tablets = request.get_ref().tablets.len()))]
    async fn start_reading_data(
        &self,
        request: Request<pb::StartReadingDataRequest>,
    ) -> Result<Response<pb::StartReadingDataResponse>, Status> {
        let req = request.into_inner();
        // The coordinator only starts a recovery for a failed master; drop it
        // from the cluster view so a partitioned survivor that pings us
        // learns it has been replaced.
        self.cluster.remove(req.master_id);
        let tablets: Vec<Tablet> = req.tablets.iter().map(tablet_from_wire).collect();
        let segment_ids = self.engine.start_reading_data(req.master_id, tablets).await;
        Ok(Response::new(pb::StartReadingDataResponse {
            status: pb::BackupStatus::Ok as i32,
            segment_ids,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(master_id = request.get_ref().master_id, segment_id = request.get_ref().segment_id, partition_id = request.get_ref().partition_id))]
    async fn get_recovery_data(
        &self,
        request: Request<pb::GetRecoveryDataRequest>,
    ) -> Result<Response<pb::GetRecoveryDataResponse>, Status> {
        let req = request.into_inner();
        let mut data = Vec::new();
        let status = match self
            .engine
            .get_recovery_data(req.master_id, req.segment_id, req.partition_id, &mut data)
            .await
        {
            Ok(()) => pb::BackupStatus::Ok,
            // A read that outlives its deadline is a transport error; the
            // build keeps running and a retry observes its result.
            Err(Error::Timeout(deadline)) => {
                return Err(Status::deadline_exceeded(format!(
                    "recovery data not built within {:?}",
                    deadline
                )));
            }
            Err(err) => {
                tracing::warn!(error = %err, "get recovery data failed");
                status_for(&err)
            }
        };
        Ok(Response::new(pb::GetRecoveryDataResponse {
            status: status as i32,
            data,
        }))
    }

    #[tracing::instrument(skip(self, request), fields(caller_id = request.get_ref().caller_id))]
    async fn ping(
        &self,
        request: Request<pb::PingRequest>,
    ) -> Result<Response<pb::PingResponse>, Status> {
        let req = request.into_inner();
        // Zero is an anonymous liveness probe; a real id must still be in
        // the cluster view.
        let status = if req.caller_id != 0 && !self.cluster.is_up(req.caller_id) {
            tracing::warn!(caller_id = req.caller_id, "ping from server not in cluster");
            pb::BackupStatus::CallerNotInCluster
        } else {
            pb::BackupStatus::Ok
        };
        Ok(Response::new(pb::PingResponse {
            status: status as i32,
        }))
    }

    async fn get_server_id(
        &self,
        _request: Request<pb::GetServerIdRequest>,
    ) -> Result<Response<pb::GetServerIdResponse>, Status> {
        Ok(Response::new(pb::GetServerIdResponse {
            server_id: self.server_id,
        }))
    }
}
