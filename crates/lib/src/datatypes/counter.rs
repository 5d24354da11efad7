//! Counter façade.

use super::{Datatype, TransactionHandle};
use crate::{Result, crdt::CounterSnapshot, operations::OpBody};

/// A replicated 32-bit counter.
///
/// ```
/// # use orda::{Client, ClientConfig, Server, ServerConfig, client::LocalTransport};
/// # let server = Server::new(ServerConfig::default());
/// # let client = Client::new(ClientConfig::default(), LocalTransport::new(server));
/// let counter = client.create_counter("visits")?;
/// counter.increase(3)?;
/// counter.increase(-1)?;
/// assert_eq!(counter.get()?, 2);
/// # Ok::<(), orda::Error>(())
/// ```
pub type Counter = Datatype<CounterSnapshot>;

/// Counter operations inside a transaction.
pub type CounterTx<'a> = TransactionHandle<'a, CounterSnapshot>;

impl CounterTx<'_> {
    /// Add `delta` and return the new value.
    pub fn increase(&mut self, delta: i32) -> Result<i32> {
        self.execute(OpBody::Increase { delta }, |snapshot, _, _| {
            Ok(snapshot.increase(delta))
        })
    }

    pub fn get(&self) -> i32 {
        self.snapshot().value()
    }
}

impl Counter {
    /// Add `delta` and return the new value.
    pub fn increase(&self, delta: i32) -> Result<i32> {
        self.with_handle(|tx| tx.increase(delta))
    }

    pub fn get(&self) -> Result<i32> {
        self.read(CounterSnapshot::value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        context::ClientContext,
        datatypes::{DatatypeState, SyncableDatatype},
        types::Uid,
    };

    fn counter() -> Counter {
        let ctx = Arc::new(ClientContext::new(Uid::from_slice(b"A"), "a", "c"));
        Counter::new("k", DatatypeState::DueToCreate, ctx, None)
    }

    #[test]
    fn test_increase_is_buffered() {
        let counter = counter();
        assert_eq!(counter.increase(2).unwrap(), 2);
        assert_eq!(counter.increase(3).unwrap(), 5);
        let pack = counter.create_push_pull_pack().unwrap();
        assert_eq!(pack.operations.len(), 2);
        assert_eq!(pack.operations[1].body, OpBody::Increase { delta: 3 });
    }

    #[test]
    fn test_failed_transaction_is_void() {
        let counter = counter();
        counter.increase(1).unwrap();
        let err = counter
            .transaction("tx", |tx| {
                tx.increase(10)?;
                assert_eq!(tx.get(), 11);
                Err::<(), _>(crate::datatypes::DatatypeError::no_op("abort").into())
            })
            .unwrap_err();
        assert!(err.is_no_op());
        assert_eq!(counter.get().unwrap(), 1);
        assert_eq!(counter.create_push_pull_pack().unwrap().operations.len(), 1);
    }

    #[test]
    fn test_transaction_commits_with_marker() {
        let counter = counter();
        counter
            .transaction("tx", |tx| {
                tx.increase(1)?;
                tx.increase(2)
            })
            .unwrap();
        let ops = counter.create_push_pull_pack().unwrap().operations;
        assert_eq!(ops.len(), 3);
        assert!(ops[0].is_transaction());
    }
}
