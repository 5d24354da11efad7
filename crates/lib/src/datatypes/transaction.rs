//! Transactions and rollback over a snapshot.
//!
//! Every operation, local or remote, runs inside a transaction. Single
//! operations get an implicit one tagged [`SENTINEL_TAG`]; user transactions
//! open one explicitly and may group several operations.
//!
//! Rollback does not deep-copy the snapshot per transaction. Instead a
//! rollback snapshot is kept together with the log of operations committed
//! since it was taken; rolling back clones it and replays the log.

use tracing::{debug, warn};

use super::{DatatypeError, base::BaseDatatype};
use crate::{
    Result,
    constants::{ROLLBACK_LOG_LIMIT, SENTINEL_TAG},
    crdt::Snapshot,
    operations::{OpBody, Operation},
    types::{OperationId, Timestamp},
};

#[derive(Debug)]
struct TransactionContext {
    tag: String,
    start_op_id: OperationId,
    buffer: Vec<Operation>,
    /// Local transactions forward their operations to the push buffer
    local: bool,
    /// Set when a snapshot operation replaced the state
    replaced: bool,
}

/// Apply a committed operation to `snapshot` as a remote replica would.
pub(crate) fn replay<S: Snapshot>(snapshot: &mut S, op: &Operation) -> Result<()> {
    match &op.body {
        OpBody::Snapshot { state } => {
            *snapshot = S::from_state(state)?;
            Ok(())
        }
        OpBody::Transaction { .. } | OpBody::Error { .. } => Ok(()),
        _ => snapshot.execute_remote(op),
    }
}

#[derive(Debug)]
pub(crate) struct TransactionDatatype<S: Snapshot> {
    pub base: BaseDatatype,
    pub snapshot: S,
    rollback_snapshot: S,
    rollback_ops: Vec<Operation>,
    current: Option<TransactionContext>,
}

impl<S: Snapshot> TransactionDatatype<S> {
    pub fn new(base: BaseDatatype) -> Self {
        Self {
            base,
            snapshot: S::default(),
            rollback_snapshot: S::default(),
            rollback_ops: Vec::new(),
            current: None,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// Open a transaction. Returns `false` when one is already open, in which
    /// case the caller joins it.
    ///
    /// User transactions (`with_marker`) begin with a transaction operation
    /// whose operation count is filled in on commit.
    pub fn begin_transaction(&mut self, tag: &str, local: bool, with_marker: bool) -> bool {
        if self.current.is_some() {
            return false;
        }
        let start_op_id = self.base.op_id;
        let mut buffer = Vec::new();
        if with_marker {
            buffer.push(Operation::new(
                self.base.op_id.next(),
                OpBody::Transaction {
                    tag: tag.to_string(),
                    num_of_ops: 0,
                },
            ));
        }
        self.current = Some(TransactionContext {
            tag: tag.to_string(),
            start_op_id,
            buffer,
            local,
            replaced: false,
        });
        true
    }

    /// Execute a local operation inside the open transaction.
    ///
    /// `f` mutates the snapshot at the issued timestamp and annotates the
    /// operation body for remote replay. On failure the operation id is
    /// rewound and the snapshot must be untouched.
    pub fn execute_local<R>(
        &mut self,
        mut body: OpBody,
        f: impl FnOnce(&mut S, Timestamp, &mut OpBody) -> Result<R>,
    ) -> Result<R> {
        let Some(ctx) = self.current.as_mut() else {
            return Err(DatatypeError::Transaction {
                reason: "no open transaction".into(),
            }
            .into());
        };
        let id = self.base.op_id.next();
        match f(&mut self.snapshot, id.timestamp(), &mut body) {
            Ok(result) => {
                ctx.buffer.push(Operation::new(id, body));
                Ok(result)
            }
            Err(err) => {
                self.base.op_id.rollback();
                Err(err)
            }
        }
    }

    /// Execute a remote operation inside the open transaction.
    pub fn execute_remote(&mut self, op: &Operation) -> Result<()> {
        let Some(ctx) = self.current.as_mut() else {
            return Err(DatatypeError::Transaction {
                reason: "no open transaction".into(),
            }
            .into());
        };
        self.base.op_id.sync_lamport(op.id.lamport);
        replay(&mut self.snapshot, op)?;
        if op.is_snapshot() {
            ctx.replaced = true;
        }
        ctx.buffer.push(op.clone());
        Ok(())
    }

    /// Close the open transaction.
    ///
    /// On success the operations are committed to the rollback log and, for
    /// local transactions, returned for delivery. On failure the snapshot
    /// and operation id are rolled back to the transaction start.
    pub fn end_transaction(&mut self, success: bool) -> Result<Vec<Operation>> {
        if !success {
            self.rollback()?;
            return Ok(Vec::new());
        }
        let Some(mut ctx) = self.current.take() else {
            return Ok(Vec::new());
        };
        let num_of_ops = ctx.buffer.iter().filter(|op| !op.is_transaction()).count();
        if let Some(OpBody::Transaction { num_of_ops: n, .. }) =
            ctx.buffer.first_mut().map(|op| &mut op.body)
        {
            if num_of_ops == 0 {
                // an empty user transaction leaves no trace
                self.base.op_id = ctx.start_op_id;
                ctx.buffer.clear();
            } else {
                *n = u32::try_from(num_of_ops).unwrap_or(u32::MAX);
            }
        }

        if ctx.replaced {
            self.refresh_rollback_snapshot();
        } else {
            self.rollback_ops.extend(ctx.buffer.iter().cloned());
            if self.rollback_ops.len() > ROLLBACK_LOG_LIMIT {
                self.refresh_rollback_snapshot();
            }
        }

        if ctx.tag != SENTINEL_TAG {
            debug!(
                key = %self.base.key,
                tag = %ctx.tag,
                num_of_ops,
                "transaction committed"
            );
        }
        Ok(if ctx.local { ctx.buffer } else { Vec::new() })
    }

    /// Restore the state before the open transaction.
    pub fn rollback(&mut self) -> Result<()> {
        let ctx = self.current.take();
        let mut restored = self.rollback_snapshot.clone();
        for op in &self.rollback_ops {
            replay(&mut restored, op).map_err(|e| DatatypeError::Transaction {
                reason: format!("rollback replay failed at {op}: {e}"),
            })?;
        }
        self.snapshot = restored;
        if let Some(ctx) = ctx {
            warn!(
                key = %self.base.key,
                tag = %ctx.tag,
                discarded = ctx.buffer.len(),
                "transaction rolled back"
            );
            self.base.op_id = ctx.start_op_id;
        }
        Ok(())
    }

    /// Take the current snapshot as the new rollback base.
    pub fn refresh_rollback_snapshot(&mut self) {
        self.rollback_snapshot = self.snapshot.clone();
        self.rollback_ops.clear();
    }

    /// Replace the whole state, dropping rollback history.
    pub fn reset_snapshot(&mut self, snapshot: S) {
        self.snapshot = snapshot;
        self.refresh_rollback_snapshot();
    }
}
