//! Server-side snapshots of datatypes.
//!
//! A snapshot is built by replaying the operation log onto the latest stored
//! snapshot. Subscribers receive one as a single snapshot operation, and
//! compaction stores one every `snapshot_interval` server sequences so later
//! builds replay less.

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    ServerError,
    persistence::Persistence,
    records::{DatatypeRecord, SnapshotRecord},
};
use crate::{
    Result,
    clock::Clock,
    crdt::AnySnapshot,
    operations::{OpBody, Operation},
    types::{Duid, OperationId, Uid},
};

/// Snapshot state at a server sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSnapshot {
    pub snapshot: AnySnapshot,
    pub sseq: u64,
    /// Highest lamport among the covered operations
    pub lamport: u64,
}

impl BuiltSnapshot {
    /// The snapshot as an operation for subscribers. Its lamport lets the
    /// subscriber's clock pass every covered operation.
    pub fn to_operation(&self) -> Result<Operation> {
        let mut id = OperationId::new(Uid::nil());
        id.sync_lamport(self.lamport);
        Ok(Operation::new(
            id,
            OpBody::Snapshot {
                state: self.snapshot.to_state()?,
            },
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl SnapshotManager {
    pub fn new(persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self { persistence, clock }
    }

    /// State of `record` after every operation up to its `sseq_end`.
    pub async fn build(&self, record: &DatatypeRecord) -> Result<BuiltSnapshot> {
        let (mut snapshot, from, mut lamport) =
            match self.persistence.get_latest_snapshot(&record.duid).await? {
                Some(stored) => (
                    AnySnapshot::from_state(record.datatype_type, &stored.state)?,
                    stored.sseq + 1,
                    stored.lamport,
                ),
                None => (AnySnapshot::new(record.datatype_type), 1, 0),
            };
        let operations = self
            .persistence
            .get_operations(&record.duid, from, record.sseq_end)
            .await?;
        for stored in &operations {
            snapshot.apply(&stored.operation).map_err(|e| ServerError::DbDecode {
                reason: format!(
                    "cannot replay sseq {} of '{}': {e}",
                    stored.sseq, record.key
                ),
            })?;
            lamport = lamport.max(stored.operation.id.lamport);
        }
        debug!(
            key = %record.key,
            duid = %record.duid,
            from,
            to = record.sseq_end,
            replayed = operations.len(),
            "built snapshot"
        );
        Ok(BuiltSnapshot {
            snapshot,
            sseq: record.sseq_end,
            lamport,
        })
    }

    /// Store a snapshot of `duid` when at least `interval` sequences were
    /// added since the last one. Returns whether one was stored.
    pub async fn compact(&self, duid: &Duid, interval: u64) -> Result<bool> {
        let Some(record) = self.persistence.get_datatype(duid).await? else {
            return Ok(false);
        };
        let last = self
            .persistence
            .get_latest_snapshot(duid)
            .await?
            .map_or(0, |s| s.sseq);
        if interval == 0 || record.sseq_end.saturating_sub(last) < interval {
            return Ok(false);
        }
        let built = self.build(&record).await?;
        self.persistence
            .insert_snapshot(SnapshotRecord {
                duid: record.duid,
                sseq: built.sseq,
                lamport: built.lamport,
                state: built.snapshot.to_state()?,
                created_at: self.clock.now_rfc3339(),
            })
            .await?;
        info!(key = %record.key, duid = %record.duid, sseq = built.sseq, "stored snapshot");
        Ok(true)
    }
}
