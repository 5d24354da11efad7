//! Map façade.

use serde_json::Value as Json;

use super::{Datatype, TransactionHandle};
use crate::{Result, crdt::MapSnapshot, operations::OpBody};

/// A replicated string-keyed map of JSON values.
pub type HashMap = Datatype<MapSnapshot>;

/// Map operations inside a transaction.
pub type MapTx<'a> = TransactionHandle<'a, MapSnapshot>;

impl MapTx<'_> {
    /// Put `value` under `key`. Returns the value it replaced.
    pub fn put(&mut self, key: &str, value: impl Into<Json>) -> Result<Option<Json>> {
        let value = value.into();
        let body = OpBody::Put {
            key: key.to_string(),
            value: value.clone(),
        };
        self.execute(body, |snapshot, ts, _| snapshot.put(key, value, ts))
    }

    /// Remove `key`. Returns the removed value.
    pub fn remove(&mut self, key: &str) -> Result<Json> {
        let body = OpBody::Remove {
            key: key.to_string(),
        };
        self.execute(body, |snapshot, ts, _| snapshot.remove(key, ts))
    }

    pub fn get(&self, key: &str) -> Option<Json> {
        self.snapshot().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.snapshot().keys()
    }
}

impl HashMap {
    /// Put `value` under `key`. Returns the value it replaced.
    pub fn put(&self, key: &str, value: impl Into<Json>) -> Result<Option<Json>> {
        self.with_handle(|tx| tx.put(key, value))
    }

    /// Remove `key`. Returns the removed value.
    pub fn remove(&self, key: &str) -> Result<Json> {
        self.with_handle(|tx| tx.remove(key))
    }

    pub fn get(&self, key: &str) -> Result<Option<Json>> {
        self.read(|snapshot| snapshot.get(key).cloned())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.read(MapSnapshot::keys)
    }

    pub fn len(&self) -> Result<usize> {
        self.read(MapSnapshot::len)
    }
}
