//! Checkpoint tracking and push-pull pack handling for one datatype.

use tracing::{debug, info, warn};

use super::{DatatypeError, DatatypeState, transaction::TransactionDatatype};
use crate::{
    Result,
    constants::SENTINEL_TAG,
    crdt::Snapshot,
    operations::{OpBody, Operation},
    pushpull::{PushPullOptions, PushPullPack},
    types::{CheckPoint, Timestamp},
};

/// What happened while a pack was applied, reported to handlers once the
/// datatype lock is released.
#[derive(Debug, Default)]
pub(crate) struct SyncEvents {
    pub state_change: Option<(DatatypeState, DatatypeState)>,
    pub remote_operations: Vec<Operation>,
    pub errors: Vec<crate::Error>,
}

impl SyncEvents {
    fn error(err: impl Into<crate::Error>) -> Self {
        Self {
            errors: vec![err.into()],
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub(crate) struct WiredDatatype<S: Snapshot> {
    pub tx: TransactionDatatype<S>,
    checkpoint: CheckPoint,
    /// Committed local operations not yet acknowledged by the server
    buffer: Vec<Operation>,
}

impl<S: Snapshot> WiredDatatype<S> {
    pub fn new(tx: TransactionDatatype<S>) -> Self {
        Self {
            tx,
            checkpoint: CheckPoint::default(),
            buffer: Vec::new(),
        }
    }

    pub fn checkpoint(&self) -> CheckPoint {
        self.checkpoint
    }

    pub fn state(&self) -> DatatypeState {
        self.tx.base.state
    }

    /// Run a local operation, wrapping it in a micro-transaction unless a
    /// user transaction is already open.
    pub fn execute_local<R>(
        &mut self,
        body: OpBody,
        f: impl FnOnce(&mut S, Timestamp, &mut OpBody) -> Result<R>,
    ) -> Result<R> {
        if matches!(
            self.state(),
            DatatypeState::Deleted | DatatypeState::DueToDelete
        ) {
            return Err(DatatypeError::illegal_operation(format!(
                "datatype '{}' is deleted",
                self.tx.base.key
            ))
            .into());
        }
        let began = self.tx.begin_transaction(SENTINEL_TAG, true, false);
        let result = self.tx.execute_local(body, f);
        if began {
            self.end_transaction(result.is_ok())?;
        }
        result
    }

    /// Open a user transaction. Returns `false` when one is already open,
    /// in which case the caller joins it.
    pub fn begin_transaction(&mut self, tag: &str) -> bool {
        self.tx.begin_transaction(tag, true, true)
    }

    /// Close the open transaction and queue committed operations for push.
    pub fn end_transaction(&mut self, success: bool) -> Result<()> {
        let committed = self.tx.end_transaction(success)?;
        self.buffer.extend(committed);
        Ok(())
    }

    pub fn set_state(&mut self, state: DatatypeState) -> Option<(DatatypeState, DatatypeState)> {
        self.tx.base.set_state(state)
    }

    /// Build the pack carrying everything the server has not acknowledged.
    pub fn create_push_pull_pack(&self) -> PushPullPack {
        let option = match self.state() {
            DatatypeState::DueToCreate => PushPullOptions::CREATE,
            DatatypeState::DueToSubscribe => PushPullOptions::SUBSCRIBE,
            DatatypeState::DueToSubscribeCreate => {
                PushPullOptions::CREATE | PushPullOptions::SUBSCRIBE
            }
            DatatypeState::DueToUnsubscribe => PushPullOptions::UNSUBSCRIBE,
            DatatypeState::DueToDelete => PushPullOptions::DELETE,
            _ => PushPullOptions::empty(),
        };
        let base = &self.tx.base;
        PushPullPack {
            key: base.key.clone(),
            duid: base.duid,
            option,
            checkpoint: self.checkpoint,
            era: base.op_id.era,
            datatype_type: base.typ,
            operations: self
                .buffer
                .iter()
                .filter(|op| op.id.seq > self.checkpoint.cseq)
                .cloned()
                .collect(),
        }
    }

    /// Apply the server's answer to a pack built by [`Self::create_push_pull_pack`].
    pub fn apply_push_pull_pack(&mut self, pack: PushPullPack) -> SyncEvents {
        if let Some(err) = pack.error() {
            warn!(
                key = %self.tx.base.key,
                code = err.code(),
                error = %err,
                "server rejected push-pull"
            );
            let refused_create = err.is_duplicate_key()
                && matches!(
                    self.state(),
                    DatatypeState::DueToCreate | DatatypeState::DueToSubscribeCreate
                );
            let mut events = SyncEvents::error(err);
            if refused_create {
                // the key belongs to another datatype; stop offering this one
                events.state_change = self.set_state(DatatypeState::Unsubscribed);
            }
            return events;
        }
        if pack.option.contains(PushPullOptions::SUBSCRIBE) {
            return self.apply_subscribe(pack);
        }

        let old = self.checkpoint;
        let new = pack.checkpoint;
        let acked = new.cseq.saturating_sub(old.cseq);
        let pulled = new.sseq.saturating_sub(old.sseq).saturating_sub(acked);
        let mut operations = pack.operations;
        if !pack.option.contains(PushPullOptions::SNAPSHOT) && operations.len() as u64 > pulled {
            let surplus = operations.len() - pulled as usize;
            debug!(
                key = %self.tx.base.key,
                surplus,
                "skipping operations already reflected locally"
            );
            operations.drain(..surplus);
        }

        self.checkpoint.raise(&new);
        let acked_cseq = self.checkpoint.cseq;
        self.buffer.retain(|op| op.id.seq > acked_cseq);

        let mut events = SyncEvents::default();
        let next_state = if pack.option.contains(PushPullOptions::DELETE) {
            Some(DatatypeState::Deleted)
        } else if pack.option.contains(PushPullOptions::UNSUBSCRIBE) {
            Some(DatatypeState::Unsubscribed)
        } else if pack.option.contains(PushPullOptions::CREATE) {
            Some(DatatypeState::Subscribed)
        } else {
            None
        };
        if let Some(state) = next_state {
            events.state_change = self.set_state(state);
        }

        match self.replay_remote(&operations) {
            Ok(()) => events.remote_operations = operations,
            Err(err) => {
                // pull these operations again next time
                self.checkpoint.sseq = old.sseq;
                events.errors.push(err);
            }
        }
        events
    }

    fn apply_subscribe(&mut self, pack: PushPullPack) -> SyncEvents {
        let key = self.tx.base.key.clone();
        let Some(OpBody::Snapshot { state }) = pack.operations.first().map(|op| &op.body) else {
            return SyncEvents::error(DatatypeError::Subscribe {
                reason: format!("subscribe response for '{key}' lacks a snapshot"),
            });
        };
        let snapshot = match S::from_state(state) {
            Ok(snapshot) => snapshot,
            Err(err) => return SyncEvents::error(err),
        };

        if !self.buffer.is_empty() {
            info!(
                key = %key,
                discarded = self.buffer.len(),
                "local operations replaced by server snapshot"
            );
        }
        self.buffer.clear();
        self.tx.base.reset_op_id();
        self.tx.base.duid = pack.duid;
        self.tx.reset_snapshot(snapshot);
        self.checkpoint = pack.checkpoint;
        if let Some(first) = pack.operations.first() {
            self.tx.base.op_id.sync_lamport(first.id.lamport);
        }

        let mut events = SyncEvents {
            state_change: self.set_state(DatatypeState::Subscribed),
            ..Default::default()
        };
        let rest = &pack.operations[1..];
        match self.replay_remote(rest) {
            Ok(()) => events.remote_operations = pack.operations,
            Err(err) => events.errors.push(err),
        }
        events
    }

    /// Apply pulled operations as one remote transaction.
    fn replay_remote(&mut self, operations: &[Operation]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        self.tx.begin_transaction(SENTINEL_TAG, false, false);
        let result = operations
            .iter()
            .try_for_each(|op| self.tx.execute_remote(op));
        self.tx.end_transaction(result.is_ok())?;
        result
    }

    /// Whether the server holds operations this replica has not pulled.
    pub fn need_sync(&self, server_sseq: u64) -> bool {
        self.checkpoint.sseq < server_sseq
    }

    /// Whether there is anything to tell the server.
    pub fn need_push(&self) -> bool {
        !self.buffer.is_empty() || self.state().is_pending()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        context::ClientContext,
        crdt::CounterSnapshot,
        datatypes::base::BaseDatatype,
        types::{DatatypeType, OperationId, Uid},
    };

    fn wired(state: DatatypeState) -> WiredDatatype<CounterSnapshot> {
        let ctx = Arc::new(ClientContext::new(Uid::from_slice(b"A"), "a", "c"));
        WiredDatatype::new(TransactionDatatype::new(BaseDatatype::new(
            "k",
            DatatypeType::Counter,
            state,
            ctx,
        )))
    }

    fn increase(w: &mut WiredDatatype<CounterSnapshot>, delta: i32) {
        w.execute_local(OpBody::Increase { delta }, |s, _, _| Ok(s.increase(delta)))
            .unwrap();
    }

    fn response(
        w: &WiredDatatype<CounterSnapshot>,
        option: PushPullOptions,
        checkpoint: CheckPoint,
        operations: Vec<Operation>,
    ) -> PushPullPack {
        PushPullPack {
            option,
            checkpoint,
            operations,
            ..w.create_push_pull_pack()
        }
    }

    fn remote_increase(cuid: &[u8], lamport: u64, delta: i32) -> Operation {
        let mut id = OperationId::new(Uid::from_slice(cuid));
        id.sync_lamport(lamport - 1);
        Operation::new(id.next(), OpBody::Increase { delta })
    }

    #[test]
    fn test_pack_options_follow_state() {
        assert_eq!(
            wired(DatatypeState::DueToSubscribeCreate)
                .create_push_pull_pack()
                .option,
            PushPullOptions::CREATE | PushPullOptions::SUBSCRIBE
        );
        assert!(
            wired(DatatypeState::Subscribed)
                .create_push_pull_pack()
                .option
                .is_empty()
        );
    }

    #[test]
    fn test_create_ack_trims_buffer() {
        let mut w = wired(DatatypeState::DueToCreate);
        increase(&mut w, 1);
        increase(&mut w, 2);
        let pack = w.create_push_pull_pack();
        assert_eq!(pack.operations.len(), 2);
        assert!(w.need_push());

        let events = w.apply_push_pull_pack(response(
            &w,
            PushPullOptions::CREATE,
            CheckPoint::new(2, 2),
            vec![],
        ));
        assert_eq!(
            events.state_change,
            Some((DatatypeState::DueToCreate, DatatypeState::Subscribed))
        );
        assert!(!w.need_push());
        assert_eq!(w.checkpoint(), CheckPoint::new(2, 2));
    }

    #[test]
    fn test_pulled_operations_are_applied_once() {
        let mut w = wired(DatatypeState::Subscribed);
        increase(&mut w, 1);
        let others = vec![remote_increase(b"B", 1, 10), remote_increase(b"B", 2, 20)];

        // server accepted our op (sseq 1) and had two foreign ones (sseq 2, 3)
        let pack = response(&w, PushPullOptions::empty(), CheckPoint::new(3, 1), others.clone());
        let events = w.apply_push_pull_pack(pack);
        assert!(events.errors.is_empty());
        assert_eq!(w.tx.snapshot.value(), 31);

        // a replayed response brings nothing new
        let replay = response(&w, PushPullOptions::empty(), CheckPoint::new(3, 1), others);
        w.apply_push_pull_pack(replay);
        assert_eq!(w.tx.snapshot.value(), 31);
        assert!(!w.need_sync(3));
        assert!(w.need_sync(4));
    }

    #[test]
    fn test_surplus_leading_operations_are_skipped() {
        let mut w = wired(DatatypeState::Subscribed);
        let first = remote_increase(b"B", 1, 10);
        let second = remote_increase(b"B", 2, 20);
        w.apply_push_pull_pack(response(
            &w,
            PushPullOptions::empty(),
            CheckPoint::new(1, 0),
            vec![first.clone()],
        ));
        // the server resent sseq 1 together with sseq 2
        w.apply_push_pull_pack(response(
            &w,
            PushPullOptions::empty(),
            CheckPoint::new(2, 0),
            vec![first, second],
        ));
        assert_eq!(w.tx.snapshot.value(), 30);
    }

    #[test]
    fn test_subscribe_requires_snapshot() {
        let mut w = wired(DatatypeState::DueToSubscribe);
        let events = w.apply_push_pull_pack(response(
            &w,
            PushPullOptions::SUBSCRIBE,
            CheckPoint::new(3, 0),
            vec![remote_increase(b"B", 1, 1)],
        ));
        assert!(events.errors[0].is_subscribe_error());
        assert_eq!(w.state(), DatatypeState::DueToSubscribe);
    }

    #[test]
    fn test_subscribe_adopts_server_state() {
        let mut w = wired(DatatypeState::DueToSubscribeCreate);
        increase(&mut w, 100);
        let server_duid = Uid::new();
        let mut snapshot_id = OperationId::new(Uid::nil());
        snapshot_id.sync_lamport(7);
        let snapshot = Operation::new(
            snapshot_id,
            OpBody::Snapshot {
                state: json!({"value": 5}),
            },
        );
        let mut pack = response(
            &w,
            PushPullOptions::SUBSCRIBE | PushPullOptions::SNAPSHOT,
            CheckPoint::new(4, 0),
            vec![snapshot],
        );
        pack.duid = server_duid;

        let events = w.apply_push_pull_pack(pack);
        assert!(events.errors.is_empty());
        assert_eq!(w.tx.snapshot.value(), 5);
        assert_eq!(w.tx.base.duid, server_duid);
        assert_eq!(w.state(), DatatypeState::Subscribed);
        assert!(!w.need_push());

        increase(&mut w, 1);
        let next = w.create_push_pull_pack();
        assert_eq!(next.operations[0].id.seq, 1);
        assert_eq!(next.operations[0].id.lamport, 8);
    }

    #[test]
    fn test_error_pack_keeps_checkpoint() {
        let mut w = wired(DatatypeState::Subscribed);
        increase(&mut w, 1);
        let request = w.create_push_pull_pack();
        let err: crate::Error = crate::pushpull::PushPullError::AbortionOfServer {
            reason: "busy".into(),
        }
        .into();
        let events = w.apply_push_pull_pack(PushPullPack::error_response(&request, &err));
        assert!(events.errors[0].is_abortion_of_server());
        assert_eq!(events.state_change, None);
        assert_eq!(w.checkpoint(), CheckPoint::default());
        assert!(w.need_push());
    }

    #[test]
    fn test_duplicate_key_ends_create() {
        let mut w = wired(DatatypeState::DueToCreate);
        increase(&mut w, 1);
        let request = w.create_push_pull_pack();
        let err: crate::Error = crate::pushpull::PushPullError::DuplicateKey {
            reason: "k".into(),
        }
        .into();
        let events = w.apply_push_pull_pack(PushPullPack::error_response(&request, &err));
        assert!(events.errors[0].is_duplicate_key());
        assert_eq!(
            events.state_change,
            Some((DatatypeState::DueToCreate, DatatypeState::Unsubscribed))
        );
        assert!(w.state().is_closed());
        assert_eq!(w.checkpoint(), CheckPoint::default());
    }

    #[test]
    fn test_failed_replay_restores_sseq() {
        let mut w = wired(DatatypeState::Subscribed);
        let bad = Operation::new(
            OperationId::new(Uid::from_slice(b"B")).next(),
            OpBody::Remove { key: "x".into() },
        );
        let events = w.apply_push_pull_pack(response(
            &w,
            PushPullOptions::empty(),
            CheckPoint::new(1, 0),
            vec![bad],
        ));
        assert_eq!(events.errors.len(), 1);
        assert_eq!(w.checkpoint().sseq, 0);
        assert_eq!(w.tx.snapshot.value(), 0);
    }
}
