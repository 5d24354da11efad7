//! Access to a locked datatype.

use std::cell::{Ref, RefCell, RefMut};

use super::{DatatypeError, wired::WiredDatatype};
use crate::{Result, crdt::Snapshot, operations::OpBody, types::Timestamp};

/// Borrow the wired datatype mutably. Fails instead of panicking when the
/// same thread already holds a borrow.
pub(crate) fn borrow_mut<'a, S: Snapshot>(
    cell: &'a RefCell<WiredDatatype<S>>,
    key: &str,
) -> Result<RefMut<'a, WiredDatatype<S>>> {
    cell.try_borrow_mut().map_err(|_| {
        DatatypeError::Transaction {
            reason: format!("datatype '{key}' is borrowed by the current thread"),
        }
        .into()
    })
}

/// View of a datatype while its lock is held by the current thread.
///
/// Handed to the closure of [`super::Datatype::transaction`]. Type-specific
/// operations are provided by [`super::CounterTx`], [`super::MapTx`],
/// [`super::ListTx`] and [`super::DocumentTx`]. The lock is re-entrant, so
/// façade calls made from inside the closure join the open transaction.
pub struct TransactionHandle<'a, S: Snapshot> {
    cell: &'a RefCell<WiredDatatype<S>>,
    key: &'a str,
}

impl<'a, S: Snapshot> TransactionHandle<'a, S> {
    pub(crate) fn new(cell: &'a RefCell<WiredDatatype<S>>, key: &'a str) -> Self {
        Self { cell, key }
    }

    pub(crate) fn execute<R>(
        &mut self,
        body: OpBody,
        f: impl FnOnce(&mut S, Timestamp, &mut OpBody) -> Result<R>,
    ) -> Result<R> {
        borrow_mut(self.cell, self.key)?.execute_local(body, f)
    }

    /// The snapshot as seen inside the transaction.
    ///
    /// Drop the returned borrow before issuing further operations.
    pub fn snapshot(&self) -> Ref<'_, S> {
        Ref::map(self.cell.borrow(), |wired| &wired.tx.snapshot)
    }

    pub fn key(&self) -> &str {
        self.key
    }
}
