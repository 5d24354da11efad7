//! List façade.

use serde_json::Value as Json;

use super::{Datatype, TransactionHandle, annotate_target, annotate_targets};
use crate::{Result, crdt::ListSnapshot, operations::OpBody};

/// A replicated ordered list of JSON values.
pub type List = Datatype<ListSnapshot>;

/// List operations inside a transaction.
pub type ListTx<'a> = TransactionHandle<'a, ListSnapshot>;

impl ListTx<'_> {
    /// Insert `values` so that the first lands at `pos`.
    pub fn insert(&mut self, pos: usize, values: Vec<Json>) -> Result<()> {
        let body = OpBody::Insert {
            pos,
            target: None,
            values: values.clone(),
        };
        self.execute(body, |snapshot, ts, body| {
            let anchor = snapshot.insert(pos, &values, ts)?;
            annotate_target(body, anchor);
            Ok(())
        })
    }

    /// Delete `num_of_nodes` values starting at `pos`. Returns them.
    pub fn delete(&mut self, pos: usize, num_of_nodes: usize) -> Result<Vec<Json>> {
        let body = OpBody::Delete {
            pos,
            num_of_nodes,
            targets: Vec::new(),
        };
        self.execute(body, |snapshot, ts, body| {
            let (targets, removed) = snapshot.delete(pos, num_of_nodes, ts)?;
            annotate_targets(body, targets);
            Ok(removed)
        })
    }

    /// Overwrite values starting at `pos`. Returns the previous values.
    pub fn update(&mut self, pos: usize, values: Vec<Json>) -> Result<Vec<Json>> {
        let body = OpBody::Update {
            pos,
            targets: Vec::new(),
            values: values.clone(),
        };
        self.execute(body, |snapshot, ts, body| {
            let (targets, previous) = snapshot.update(pos, &values, ts)?;
            annotate_targets(body, targets);
            Ok(previous)
        })
    }

    pub fn get(&self, pos: usize) -> Result<Json> {
        self.snapshot().get(pos)
    }

    pub fn get_many(&self, pos: usize, count: usize) -> Result<Vec<Json>> {
        self.snapshot().get_many(pos, count)
    }

    pub fn size(&self) -> usize {
        self.snapshot().len()
    }
}

impl List {
    /// Insert `values` so that the first lands at `pos`.
    pub fn insert(&self, pos: usize, values: Vec<Json>) -> Result<()> {
        self.with_handle(|tx| tx.insert(pos, values))
    }

    /// Delete `num_of_nodes` values starting at `pos`. Returns them.
    pub fn delete(&self, pos: usize, num_of_nodes: usize) -> Result<Vec<Json>> {
        self.with_handle(|tx| tx.delete(pos, num_of_nodes))
    }

    /// Overwrite values starting at `pos`. Returns the previous values.
    pub fn update(&self, pos: usize, values: Vec<Json>) -> Result<Vec<Json>> {
        self.with_handle(|tx| tx.update(pos, values))
    }

    pub fn get(&self, pos: usize) -> Result<Json> {
        self.read(|snapshot| snapshot.get(pos))?
    }

    pub fn get_many(&self, pos: usize, count: usize) -> Result<Vec<Json>> {
        self.read(|snapshot| snapshot.get_many(pos, count))?
    }

    pub fn size(&self) -> Result<usize> {
        self.read(ListSnapshot::len)
    }

    pub fn values(&self) -> Result<Vec<Json>> {
        self.read(ListSnapshot::values)
    }
}
