//! Cluster View
//!
//! A minimal in-process list of servers this backup believes are up. The
//! ping handler consults it: a caller with a valid id that the backup no
//! longer considers part of the cluster gets `CALLER_NOT_IN_CLUSTER`, which
//! tells a partitioned master to stop serving before it conflicts with its
//! replacement.
//!
//! Masters are enlisted when the backup first hears from them (their first
//! OpenSegment) and dropped when the coordinator starts a recovery for them
//! (StartReadingData names a master the coordinator has declared dead).

use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Default)]
pub struct ServerList {
    up: RwLock<HashSet<u64>>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `server_id` as up. Idempotent.
    pub fn enlist(&self, server_id: u64) {
        let inserted = self
            .up
            .write()
            .expect("server list poisoned")
            .insert(server_id);
        if inserted {
            tracing::debug!(server_id, "server enlisted in cluster view");
        }
    }

    /// Drop `server_id` from the view; called when a recovery is started for
    /// it, at which point the coordinator has declared it dead.
    pub fn remove(&self, server_id: u64) {
        self.up
            .write()
            .expect("server list poisoned")
            .remove(&server_id);
    }

    pub fn is_up(&self, server_id: u64) -> bool {
        self.up
            .read()
            .expect("server list poisoned")
            .contains(&server_id)
    }

    pub fn len(&self) -> usize {
        self.up.read().expect("server list poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
