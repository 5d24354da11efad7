//!
//! Datatypes applications work with.
//!
//! A datatype wraps one [`Snapshot`] behind a per-datatype lock together with
//! its transaction and push-pull bookkeeping:
//!
//! * [`Counter`], [`HashMap`], [`List`] and [`Document`] are the façades.
//! * [`Datatype::transaction`] groups several operations through a
//!   [`TransactionHandle`]; a failing closure voids all of them.
//! * [`DatatypeHandlers`] observe state changes, remote operations and errors
//!   after each sync. They run once the lock is released.

use std::{cell::RefCell, fmt, sync::Arc};

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

pub(crate) mod base;
pub mod counter;
pub mod document;
pub mod errors;
pub mod handle;
pub mod list;
pub mod map;
pub(crate) mod transaction;
pub(crate) mod wired;

pub use counter::{Counter, CounterTx};
pub use document::{Document, DocumentTx};
pub use errors::DatatypeError;
pub use handle::TransactionHandle;
pub use list::{List, ListTx};
pub use map::{HashMap, MapTx};

use self::{
    base::BaseDatatype, handle::borrow_mut, transaction::TransactionDatatype,
    wired::WiredDatatype,
};
use crate::{
    Result,
    context::ClientContext,
    crdt::Snapshot,
    operations::{OpBody, Operation},
    pushpull::PushPullPack,
    types::{CheckPoint, DatatypeType, Duid, Timestamp},
};

/// Lifecycle of a datatype on one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatatypeState {
    DueToCreate,
    DueToSubscribe,
    DueToSubscribeCreate,
    Subscribed,
    DueToUnsubscribe,
    Unsubscribed,
    DueToDelete,
    Deleted,
}

impl DatatypeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatatypeState::DueToCreate => "due_to_create",
            DatatypeState::DueToSubscribe => "due_to_subscribe",
            DatatypeState::DueToSubscribeCreate => "due_to_subscribe_create",
            DatatypeState::Subscribed => "subscribed",
            DatatypeState::DueToUnsubscribe => "due_to_unsubscribe",
            DatatypeState::Unsubscribed => "unsubscribed",
            DatatypeState::DueToDelete => "due_to_delete",
            DatatypeState::Deleted => "deleted",
        }
    }

    /// Whether the server still has to acknowledge a state request.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            DatatypeState::DueToCreate
                | DatatypeState::DueToSubscribe
                | DatatypeState::DueToSubscribeCreate
                | DatatypeState::DueToUnsubscribe
                | DatatypeState::DueToDelete
        )
    }

    /// Whether the datatype no longer takes part in sync.
    pub fn is_closed(&self) -> bool {
        matches!(self, DatatypeState::Unsubscribed | DatatypeState::Deleted)
    }
}

impl fmt::Display for DatatypeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of sync results.
///
/// All methods default to doing nothing. They are called without the
/// datatype lock held, so they may read the datatype but should not expect
/// to see the exact state the event was produced in.
pub trait DatatypeHandlers: Send + Sync {
    fn on_state_change(&self, _key: &str, _old: DatatypeState, _new: DatatypeState) {}

    fn on_remote_operations(&self, _key: &str, _operations: &[Operation]) {}

    fn on_errors(&self, _key: &str, _errors: &[crate::Error]) {}
}

struct Shared<S: Snapshot> {
    key: String,
    /// Re-entrant for the owning thread; the cell hands out short borrows
    wired: ReentrantMutex<RefCell<WiredDatatype<S>>>,
    handlers: Option<Arc<dyn DatatypeHandlers>>,
}

/// A replicated datatype over the snapshot `S`.
///
/// Cloning is cheap and every clone refers to the same replica.
pub struct Datatype<S: Snapshot> {
    shared: Arc<Shared<S>>,
}

impl<S: Snapshot> Clone for Datatype<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Snapshot> fmt::Debug for Datatype<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datatype")
            .field("key", &self.shared.key)
            .field("type", &S::TYPE)
            .finish_non_exhaustive()
    }
}

/// Rolls back a user transaction that was never closed, which happens when
/// its closure unwinds.
struct OpenTransaction<'a, S: Snapshot> {
    cell: &'a RefCell<WiredDatatype<S>>,
    key: &'a str,
    tag: &'a str,
    closed: bool,
}

impl<S: Snapshot> Drop for OpenTransaction<'_, S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match self.cell.try_borrow_mut() {
            Ok(mut wired) => {
                if let Err(err) = wired.end_transaction(false) {
                    warn!(key = %self.key, tag = %self.tag, error = %err, "rollback of abandoned transaction failed");
                } else {
                    warn!(key = %self.key, tag = %self.tag, "abandoned transaction rolled back");
                }
            }
            Err(_) => {
                warn!(key = %self.key, tag = %self.tag, "abandoned transaction still borrowed");
            }
        }
    }
}

impl<S: Snapshot> Datatype<S> {
    pub(crate) fn new(
        key: impl Into<String>,
        state: DatatypeState,
        ctx: Arc<ClientContext>,
        handlers: Option<Arc<dyn DatatypeHandlers>>,
    ) -> Self {
        let key = key.into();
        let base = BaseDatatype::new(key.clone(), S::TYPE, state, ctx);
        debug!(key = %key, duid = %base.duid, typ = %S::TYPE, %state, "datatype created");
        Self {
            shared: Arc::new(Shared {
                key,
                wired: ReentrantMutex::new(RefCell::new(WiredDatatype::new(
                    TransactionDatatype::new(base),
                ))),
                handlers,
            }),
        }
    }

    /// Run `f` on the wired datatype under the lock.
    fn with_wired<R>(&self, f: impl FnOnce(&mut WiredDatatype<S>) -> R) -> Result<R> {
        let guard = self.shared.wired.lock();
        let mut wired = borrow_mut(&*guard, &self.shared.key)?;
        Ok(f(&mut wired))
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn datatype_type(&self) -> DatatypeType {
        S::TYPE
    }

    pub fn duid(&self) -> Result<Duid> {
        self.with_wired(|w| w.tx.base.duid)
    }

    pub fn state(&self) -> Result<DatatypeState> {
        self.with_wired(|w| w.state())
    }

    pub fn checkpoint(&self) -> Result<CheckPoint> {
        self.with_wired(|w| w.checkpoint())
    }

    /// Visible value as JSON.
    pub fn to_json(&self) -> Result<Json> {
        self.with_wired(|w| w.tx.snapshot.to_json())
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> Result<S> {
        self.with_wired(|w| w.tx.snapshot.clone())
    }

    /// Run `f` as one transaction tagged `tag`.
    ///
    /// Operations issued through the handle are committed together when `f`
    /// returns `Ok`. When it returns `Err` or unwinds they are all rolled
    /// back. Called from inside an open transaction on the same datatype,
    /// `f` joins the open transaction instead.
    pub fn transaction<R>(
        &self,
        tag: &str,
        f: impl FnOnce(&mut TransactionHandle<'_, S>) -> Result<R>,
    ) -> Result<R> {
        let key = self.shared.key.as_str();
        let guard = self.shared.wired.lock();
        let cell: &RefCell<WiredDatatype<S>> = &guard;
        let began = borrow_mut(cell, key)?.begin_transaction(tag);
        if !began {
            debug!(key = %key, %tag, "joining open transaction");
            return f(&mut TransactionHandle::new(cell, key));
        }

        let mut open = OpenTransaction {
            cell,
            key,
            tag,
            closed: false,
        };
        let result = f(&mut TransactionHandle::new(cell, key));
        open.closed = true;
        if let Err(err) = &result {
            warn!(key = %key, %tag, error = %err, "transaction failed");
        }
        borrow_mut(cell, key)?.end_transaction(result.is_ok())?;
        result
    }

    /// Run `f` with the lock held. Operations issued inside commit on their
    /// own unless a transaction is open.
    pub(crate) fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut TransactionHandle<'_, S>) -> Result<R>,
    ) -> Result<R> {
        let guard = self.shared.wired.lock();
        f(&mut TransactionHandle::new(&*guard, &self.shared.key))
    }

    /// Read the snapshot under the lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R> {
        let guard = self.shared.wired.lock();
        let wired = guard.try_borrow().map_err(|_| DatatypeError::Transaction {
            reason: format!("datatype '{}' is borrowed by the current thread", self.shared.key),
        })?;
        Ok(f(&wired.tx.snapshot))
    }

    fn dispatch(&self, events: wired::SyncEvents) {
        let Some(handlers) = &self.shared.handlers else {
            return;
        };
        let key = self.key();
        if let Some((old, new)) = events.state_change {
            handlers.on_state_change(key, old, new);
        }
        if !events.remote_operations.is_empty() {
            handlers.on_remote_operations(key, &events.remote_operations);
        }
        if !events.errors.is_empty() {
            handlers.on_errors(key, &events.errors);
        }
    }
}

/// Type-erased view a client uses to sync its datatypes.
pub trait SyncableDatatype: Send + Sync + fmt::Debug {
    fn key(&self) -> &str;

    fn datatype_type(&self) -> DatatypeType;

    fn duid(&self) -> Result<Duid>;

    fn state(&self) -> Result<DatatypeState>;

    /// Request a state change to be carried by the next pack.
    fn set_state(&self, state: DatatypeState) -> Result<()>;

    fn create_push_pull_pack(&self) -> Result<PushPullPack>;

    /// Apply a response pack, then notify handlers. Returns the errors the
    /// pack carried or caused.
    fn apply_push_pull_pack(&self, pack: PushPullPack) -> Result<Vec<crate::Error>>;

    fn need_sync(&self, server_sseq: u64) -> Result<bool>;

    fn need_push(&self) -> Result<bool>;
}

impl<S: Snapshot> SyncableDatatype for Datatype<S> {
    fn key(&self) -> &str {
        Datatype::key(self)
    }

    fn datatype_type(&self) -> DatatypeType {
        S::TYPE
    }

    fn duid(&self) -> Result<Duid> {
        Datatype::duid(self)
    }

    fn state(&self) -> Result<DatatypeState> {
        Datatype::state(self)
    }

    fn set_state(&self, state: DatatypeState) -> Result<()> {
        let change = self.with_wired(|w| w.set_state(state))?;
        if let (Some((old, new)), Some(handlers)) = (change, &self.shared.handlers) {
            handlers.on_state_change(self.key(), old, new);
        }
        Ok(())
    }

    fn create_push_pull_pack(&self) -> Result<PushPullPack> {
        self.with_wired(|w| w.create_push_pull_pack())
    }

    fn apply_push_pull_pack(&self, pack: PushPullPack) -> Result<Vec<crate::Error>> {
        let events = self.with_wired(|w| {
            if w.tx.in_transaction() {
                return Err(crate::Error::from(DatatypeError::Transaction {
                    reason: format!("cannot apply a pack to '{}' inside a transaction", w.tx.base.key),
                }));
            }
            Ok(w.apply_push_pull_pack(pack))
        })??;
        let errors = events
            .errors
            .iter()
            .map(|e| crate::Error::from_code(e.code(), e.reason()))
            .collect();
        self.dispatch(events);
        Ok(errors)
    }

    fn need_sync(&self, server_sseq: u64) -> Result<bool> {
        self.with_wired(|w| w.need_sync(server_sseq))
    }

    fn need_push(&self) -> Result<bool> {
        self.with_wired(|w| w.need_push())
    }
}

/// Annotate a position-addressed body with the targets it resolved to.
pub(crate) fn annotate_targets(body: &mut OpBody, resolved: Vec<Timestamp>) {
    match body {
        OpBody::Delete { targets, .. }
        | OpBody::Update { targets, .. }
        | OpBody::DocDelete { targets, .. }
        | OpBody::DocUpdate { targets, .. } => *targets = resolved,
        _ => {}
    }
}

/// Annotate an insert body with the anchor it was inserted after.
pub(crate) fn annotate_target(body: &mut OpBody, anchor: Timestamp) {
    if let OpBody::Insert { target, .. } | OpBody::DocInsert { target, .. } = body {
        *target = Some(anchor);
    }
}
