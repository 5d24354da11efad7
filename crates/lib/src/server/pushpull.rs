//! Handling of one push-pull pack.
//!
//! Each pack is classified against the stored datatype record, then created,
//! subscribed, synced or rejected. All of it happens under the per-datatype
//! lock; notification and compaction are started after the lock is released.

use std::{fmt, sync::Arc};

use tracing::{debug, info, warn};

use super::{
    ServerContext,
    records::{ClientRecord, CollectionRecord, DatatypeRecord, OperationRecord},
};
use crate::{
    Result,
    operations::Operation,
    pushpull::{Notification, PushPullError, PushPullOptions, PushPullPack, topic},
    types::CheckPoint,
};

/// How a pack relates to what the server stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCase {
    /// Neither key nor DUID is known
    MatchNothing,
    /// The key is free but the DUID belongs to another datatype
    UsedDuid,
    /// The key holds a datatype of another type
    MatchKeyNotType,
    /// The client is subscribed to the datatype under the key
    AllMatchedSubscribed,
    /// The datatype exists but the client is not subscribed
    AllMatchedNotSubscribed,
    /// The datatype under the key was deleted
    AllMatchedNotVisible,
}

impl fmt::Display for MatchCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to do with a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Subscribe,
    PushPull,
    /// Unsubscribe or delete by a client that is not subscribed
    Acknowledge,
    DuplicateKey,
    NoDatatypeToSubscribe,
}

/// Decide the action for `case` and the pack's create/subscribe bits.
///
/// `same_duid` marks a create resent by the client that already created the
/// datatype, which is treated as a plain push-pull.
pub fn decide(case: MatchCase, option: PushPullOptions, same_duid: bool) -> Action {
    let create = option.contains(PushPullOptions::CREATE);
    let subscribe = option.contains(PushPullOptions::SUBSCRIBE);
    let closing = option.intersects(PushPullOptions::UNSUBSCRIBE | PushPullOptions::DELETE);
    match (case, create, subscribe) {
        (MatchCase::MatchNothing | MatchCase::AllMatchedNotVisible, true, _) => Action::Create,
        (MatchCase::UsedDuid | MatchCase::MatchKeyNotType, true, _) => Action::DuplicateKey,
        (
            MatchCase::AllMatchedSubscribed | MatchCase::AllMatchedNotSubscribed,
            _,
            true,
        ) => Action::Subscribe,
        (MatchCase::AllMatchedSubscribed, true, false) if same_duid => Action::PushPull,
        (MatchCase::AllMatchedSubscribed | MatchCase::AllMatchedNotSubscribed, true, false) => {
            Action::DuplicateKey
        }
        (MatchCase::AllMatchedSubscribed, false, false) => Action::PushPull,
        (MatchCase::AllMatchedNotSubscribed | MatchCase::AllMatchedNotVisible, false, false)
            if closing =>
        {
            Action::Acknowledge
        }
        _ => Action::NoDatatypeToSubscribe,
    }
}

/// Work left for after the lock is released.
#[derive(Debug)]
struct Committed {
    notification: Option<Notification>,
}

pub(crate) struct PushPullHandler {
    ctx: Arc<ServerContext>,
    collection: CollectionRecord,
    client: ClientRecord,
}

impl PushPullHandler {
    pub fn new(ctx: Arc<ServerContext>, collection: CollectionRecord, client: ClientRecord) -> Self {
        Self {
            ctx,
            collection,
            client,
        }
    }

    /// Process `pack`, embedding any failure as an error pack.
    pub async fn process(self, pack: PushPullPack) -> PushPullPack {
        let lock_name = topic(&self.collection.name, &pack.key);
        let Some(token) = self.ctx.locker.try_lock(&lock_name).await else {
            let err: crate::Error = PushPullError::AbortionOfServer {
                reason: format!("timed out locking '{lock_name}'"),
            }
            .into();
            warn!(key = %pack.key, cuid = %self.client.cuid, error = %err, "push-pull aborted");
            return PushPullPack::error_response(&pack, &err);
        };
        let result = self.process_locked(&pack).await;
        self.ctx.locker.unlock(&lock_name, token).await;

        match result {
            Ok((response, committed)) => {
                if let Some(notification) = committed.notification {
                    self.after_commit(&lock_name, notification);
                }
                response
            }
            Err(err) => {
                warn!(
                    key = %pack.key,
                    cuid = %self.client.cuid,
                    code = err.code(),
                    error = %err,
                    "push-pull failed"
                );
                PushPullPack::error_response(&pack, &err)
            }
        }
    }

    fn after_commit(&self, topic_name: &str, notification: Notification) {
        let notifier = Arc::clone(&self.ctx.notifier);
        let topic_name = topic_name.to_string();
        let duid = notification.duid;
        tokio::spawn(async move {
            if let Err(err) = notifier.notify(&topic_name, notification).await {
                warn!(topic = %topic_name, error = %err, "notification failed");
            }
        });
        let snapshots = self.ctx.snapshots.clone();
        let interval = self.ctx.config.snapshot_interval;
        tokio::spawn(async move {
            if let Err(err) = snapshots.compact(&duid, interval).await {
                warn!(duid = %duid, error = %err, "snapshot compaction failed");
            }
        });
    }

    async fn classify(&self, pack: &PushPullPack) -> Result<(MatchCase, Option<DatatypeRecord>)> {
        let persistence = &self.ctx.persistence;
        let by_key = persistence
            .get_datatype_by_key(self.collection.num, &pack.key)
            .await?;
        let by_duid = persistence.get_datatype(&pack.duid).await?;
        let case = match (&by_key, &by_duid) {
            (None, None) => MatchCase::MatchNothing,
            (None, Some(_)) => MatchCase::UsedDuid,
            (Some(record), _) if record.datatype_type != pack.datatype_type => {
                MatchCase::MatchKeyNotType
            }
            (Some(record), other) if !record.visible => match other {
                Some(_) => MatchCase::UsedDuid,
                None => MatchCase::AllMatchedNotVisible,
            },
            (Some(record), _) if self.client.checkpoints.contains_key(&record.duid) => {
                MatchCase::AllMatchedSubscribed
            }
            (Some(_), _) => MatchCase::AllMatchedNotSubscribed,
        };
        Ok((case, by_key))
    }

    async fn process_locked(&self, pack: &PushPullPack) -> Result<(PushPullPack, Committed)> {
        let (case, record) = self.classify(pack).await?;
        let same_duid = record.as_ref().is_some_and(|r| r.duid == pack.duid);
        let action = decide(case, pack.option, same_duid);
        debug!(
            key = %pack.key,
            cuid = %self.client.cuid,
            %case,
            ?action,
            option = pack.option.bits(),
            ops = pack.operations.len(),
            "processing push-pull"
        );

        match (action, record) {
            (Action::Create, _) => self.create(pack).await,
            (Action::Subscribe, Some(record)) => self.subscribe(pack, record).await,
            (Action::PushPull, Some(record)) => {
                let (mut response, committed) = self.push_pull(pack, record).await?;
                // a resent create is acknowledged like the first one
                if pack.option.contains(PushPullOptions::CREATE) {
                    response.option |= PushPullOptions::CREATE;
                }
                Ok((response, committed))
            }
            (Action::Acknowledge, Some(record)) => Ok((
                PushPullPack {
                    key: record.key.clone(),
                    duid: record.duid,
                    option: pack.option
                        & (PushPullOptions::UNSUBSCRIBE | PushPullOptions::DELETE),
                    checkpoint: pack.checkpoint,
                    era: pack.era,
                    datatype_type: record.datatype_type,
                    operations: Vec::new(),
                },
                Committed { notification: None },
            )),
            (Action::DuplicateKey, _) => Err(PushPullError::DuplicateKey {
                reason: format!("'{}' is taken ({case})", pack.key),
            }
            .into()),
            _ => Err(PushPullError::NoDatatypeToSubscribe {
                reason: format!("no datatype '{}' to subscribe ({case})", pack.key),
            }
            .into()),
        }
    }

    async fn create(&self, pack: &PushPullPack) -> Result<(PushPullPack, Committed)> {
        let record = DatatypeRecord::new(
            pack.duid,
            pack.key.clone(),
            self.collection.num,
            pack.datatype_type,
            self.ctx.clock.now_rfc3339(),
        );
        info!(
            key = %pack.key,
            duid = %pack.duid,
            typ = %pack.datatype_type,
            cuid = %self.client.cuid,
            "datatype created"
        );
        let (mut response, committed) = self
            .commit(pack, record, CheckPoint::default(), true)
            .await?;
        response.option = PushPullOptions::CREATE;
        Ok((response, committed))
    }

    async fn subscribe(
        &self,
        pack: &PushPullPack,
        record: DatatypeRecord,
    ) -> Result<(PushPullPack, Committed)> {
        let built = self.ctx.snapshots.build(&record).await?;
        let checkpoint = CheckPoint::new(record.sseq_end, 0);
        self.ctx
            .persistence
            .update_checkpoint(&self.client.cuid, &record.duid, checkpoint)
            .await?;
        if !pack.operations.is_empty() {
            debug!(
                key = %pack.key,
                discarded = pack.operations.len(),
                "discarding operations pushed with subscribe"
            );
        }
        info!(key = %record.key, duid = %record.duid, cuid = %self.client.cuid, sseq = record.sseq_end, "datatype subscribed");
        Ok((
            PushPullPack {
                key: record.key.clone(),
                duid: record.duid,
                option: PushPullOptions::SUBSCRIBE | PushPullOptions::SNAPSHOT,
                checkpoint,
                era: pack.era,
                datatype_type: record.datatype_type,
                operations: vec![built.to_operation()?],
            },
            Committed { notification: None },
        ))
    }

    async fn push_pull(
        &self,
        pack: &PushPullPack,
        record: DatatypeRecord,
    ) -> Result<(PushPullPack, Committed)> {
        let stored = self
            .ctx
            .persistence
            .get_checkpoint(&self.client.cuid, &record.duid)
            .await?
            .unwrap_or_default();
        self.commit(pack, record, stored, false).await
    }

    /// Accept pushed operations, collect pulled ones and persist the result.
    async fn commit(
        &self,
        pack: &PushPullPack,
        mut record: DatatypeRecord,
        stored: CheckPoint,
        created: bool,
    ) -> Result<(PushPullPack, Committed)> {
        let persistence = &self.ctx.persistence;
        let cuid = self.client.cuid;
        let old_end = record.sseq_end;

        let mut cseq = stored.cseq;
        let mut accepted = Vec::new();
        for op in &pack.operations {
            if op.id.seq <= cseq {
                continue;
            }
            if op.id.seq != cseq + 1 {
                return Err(PushPullError::MissingOps {
                    reason: format!(
                        "'{}' expected seq {} but got {}",
                        pack.key,
                        cseq + 1,
                        op.id.seq
                    ),
                }
                .into());
            }
            cseq = op.id.seq;
            accepted.push(OperationRecord {
                duid: record.duid,
                sseq: old_end + accepted.len() as u64 + 1,
                operation: op.clone(),
            });
        }
        let skipped = pack.operations.len() - accepted.len();
        if skipped > 0 {
            debug!(key = %pack.key, skipped, "skipped operations pushed before");
        }

        let from = pack.checkpoint.sseq + 1;
        let mut option = PushPullOptions::empty();
        let pulled: Vec<Operation> = if created {
            Vec::new()
        } else if from < record.sseq_begin {
            option |= PushPullOptions::SNAPSHOT;
            vec![self.ctx.snapshots.build(&record).await?.to_operation()?]
        } else {
            persistence
                .get_operations(&record.duid, from, old_end)
                .await?
                .into_iter()
                .filter(|r| r.operation.id.cuid != cuid)
                .map(|r| r.operation)
                .collect()
        };

        let pushed = accepted.len() as u64;
        record.sseq_end = old_end + pushed;
        if pushed > 0 {
            record.updated_at = self.ctx.clock.now_rfc3339();
            persistence.insert_operations(accepted).await?;
        }
        let checkpoint = CheckPoint::new(record.sseq_end, cseq);

        if pack.option.contains(PushPullOptions::DELETE) {
            record.visible = false;
            option |= PushPullOptions::DELETE;
            info!(key = %record.key, duid = %record.duid, cuid = %cuid, "datatype deleted");
        }
        if pushed > 0 || created || !record.visible {
            persistence.update_datatype(record.clone()).await?;
        }
        if pack
            .option
            .intersects(PushPullOptions::UNSUBSCRIBE | PushPullOptions::DELETE)
        {
            persistence.delete_checkpoint(&cuid, &record.duid).await?;
            if pack.option.contains(PushPullOptions::UNSUBSCRIBE) {
                option |= PushPullOptions::UNSUBSCRIBE;
                info!(key = %record.key, duid = %record.duid, cuid = %cuid, "datatype unsubscribed");
            }
        } else {
            persistence
                .update_checkpoint(&cuid, &record.duid, checkpoint)
                .await?;
        }

        let notification = (pushed > 0).then(|| Notification {
            cuid,
            duid: record.duid,
            key: record.key.clone(),
            sseq: record.sseq_end,
        });
        Ok((
            PushPullPack {
                key: record.key.clone(),
                duid: record.duid,
                option,
                checkpoint,
                era: pack.era,
                datatype_type: record.datatype_type,
                operations: pulled,
            },
            Committed { notification },
        ))
    }
}
