//! Document façade.
//!
//! A [`Document`] is a cursor on one node of a replicated JSON tree. Child
//! lookups return new cursors sharing the same datatype. A cursor on a node
//! that was deleted concurrently keeps working, but its changes are only
//! visible from the root if the node is reachable again.

use serde_json::Value as Json;

use super::{Datatype, TransactionHandle, annotate_target, annotate_targets};
use crate::{
    Result,
    crdt::{DocumentSnapshot, DocumentType},
    operations::OpBody,
    types::Timestamp,
};

/// Document operations inside a transaction. Nodes are addressed by the
/// timestamp that created them.
pub type DocumentTx<'a> = TransactionHandle<'a, DocumentSnapshot>;

impl DocumentTx<'_> {
    /// Put `value` under `key` in the object `node`. Returns the replaced value.
    pub fn put_to_object(
        &mut self,
        node: Timestamp,
        key: &str,
        value: impl Into<Json>,
    ) -> Result<Option<Json>> {
        let value = value.into();
        let body = OpBody::DocPut {
            parent: node,
            key: key.to_string(),
            value: value.clone(),
        };
        self.execute(body, |snapshot, ts, _| {
            snapshot.put_in_object(node, key, &value, ts)
        })
    }

    /// Remove `key` from the object `node`. Returns the removed value.
    pub fn remove_in_object(&mut self, node: Timestamp, key: &str) -> Result<Json> {
        let body = OpBody::DocRemove {
            parent: node,
            key: key.to_string(),
        };
        self.execute(body, |snapshot, ts, _| {
            snapshot.remove_in_object(node, key, ts)
        })
    }

    /// Insert `values` into the array `node` so the first lands at `pos`.
    pub fn insert_to_array(&mut self, node: Timestamp, pos: usize, values: Vec<Json>) -> Result<()> {
        let body = OpBody::DocInsert {
            parent: node,
            pos,
            target: None,
            values: values.clone(),
        };
        self.execute(body, |snapshot, ts, body| {
            let anchor = snapshot.insert_in_array(node, pos, &values, ts)?;
            annotate_target(body, anchor);
            Ok(())
        })
    }

    /// Delete `num_of_nodes` elements of the array `node` from `pos`.
    pub fn delete_in_array(
        &mut self,
        node: Timestamp,
        pos: usize,
        num_of_nodes: usize,
    ) -> Result<Vec<Json>> {
        let body = OpBody::DocDelete {
            parent: node,
            pos,
            num_of_nodes,
            targets: Vec::new(),
        };
        self.execute(body, |snapshot, ts, body| {
            let (targets, removed) = snapshot.delete_in_array(node, pos, num_of_nodes, ts)?;
            annotate_targets(body, targets);
            Ok(removed)
        })
    }

    /// Overwrite elements of the array `node` from `pos`. Returns the
    /// previous values.
    pub fn update_in_array(
        &mut self,
        node: Timestamp,
        pos: usize,
        values: Vec<Json>,
    ) -> Result<Vec<Json>> {
        let body = OpBody::DocUpdate {
            parent: node,
            pos,
            targets: Vec::new(),
            values: values.clone(),
        };
        self.execute(body, |snapshot, ts, body| {
            let (targets, previous) = snapshot.update_in_array(node, pos, &values, ts)?;
            annotate_targets(body, targets);
            Ok(previous)
        })
    }

    pub fn get_root_document(&self) -> Timestamp {
        self.snapshot().get_root_document()
    }

    pub fn get_from_object(&self, node: &Timestamp, key: &str) -> Result<Option<Timestamp>> {
        self.snapshot().get_from_object(node, key)
    }

    pub fn get_from_array(&self, node: &Timestamp, pos: usize) -> Result<Timestamp> {
        self.snapshot().get_from_array(node, pos)
    }

    pub fn get_many_from_array(
        &self,
        node: &Timestamp,
        pos: usize,
        count: usize,
    ) -> Result<Vec<Timestamp>> {
        self.snapshot().get_many_from_array(node, pos, count)
    }

    pub fn get_parent_document(&self, node: &Timestamp) -> Result<Option<Timestamp>> {
        self.snapshot().get_parent_document(node)
    }

    pub fn get_document_type(&self, node: &Timestamp) -> Result<DocumentType> {
        self.snapshot().get_document_type(node)
    }

    pub fn is_garbage(&self, node: &Timestamp) -> bool {
        self.snapshot().is_garbage(node)
    }

    pub fn to_json(&self, node: &Timestamp) -> Result<Json> {
        self.snapshot().to_json_at(node)
    }
}

/// A cursor on one node of a replicated JSON document.
#[derive(Debug, Clone)]
pub struct Document {
    datatype: Datatype<DocumentSnapshot>,
    node: Timestamp,
}

impl Document {
    pub(crate) fn root(datatype: Datatype<DocumentSnapshot>) -> Self {
        Self {
            datatype,
            node: Timestamp::head(),
        }
    }

    fn at(&self, node: Timestamp) -> Self {
        Self {
            datatype: self.datatype.clone(),
            node,
        }
    }

    /// The underlying datatype, shared by every cursor on this document.
    pub fn datatype(&self) -> &Datatype<DocumentSnapshot> {
        &self.datatype
    }

    /// Timestamp that created the node under the cursor.
    pub fn node(&self) -> Timestamp {
        self.node
    }

    pub fn key(&self) -> &str {
        self.datatype.key()
    }

    /// Run `f` as one transaction. See [`Datatype::transaction`].
    pub fn transaction<R>(
        &self,
        tag: &str,
        f: impl FnOnce(&mut DocumentTx<'_>) -> Result<R>,
    ) -> Result<R> {
        self.datatype.transaction(tag, f)
    }

    pub fn put_to_object(&self, key: &str, value: impl Into<Json>) -> Result<Option<Json>> {
        self.datatype
            .with_handle(|tx| tx.put_to_object(self.node, key, value))
    }

    pub fn remove_in_object(&self, key: &str) -> Result<Json> {
        self.datatype
            .with_handle(|tx| tx.remove_in_object(self.node, key))
    }

    pub fn insert_to_array(&self, pos: usize, values: Vec<Json>) -> Result<()> {
        self.datatype
            .with_handle(|tx| tx.insert_to_array(self.node, pos, values))
    }

    pub fn delete_in_array(&self, pos: usize, num_of_nodes: usize) -> Result<Vec<Json>> {
        self.datatype
            .with_handle(|tx| tx.delete_in_array(self.node, pos, num_of_nodes))
    }

    pub fn update_in_array(&self, pos: usize, values: Vec<Json>) -> Result<Vec<Json>> {
        self.datatype
            .with_handle(|tx| tx.update_in_array(self.node, pos, values))
    }

    /// Cursor on the child stored under `key`, if the node is an object.
    pub fn get_from_object(&self, key: &str) -> Result<Option<Document>> {
        let child = self
            .datatype
            .read(|s| s.get_from_object(&self.node, key))??;
        Ok(child.map(|c| self.at(c)))
    }

    /// Cursor on the element at `pos`, if the node is an array.
    pub fn get_from_array(&self, pos: usize) -> Result<Document> {
        let child = self.datatype.read(|s| s.get_from_array(&self.node, pos))??;
        Ok(self.at(child))
    }

    pub fn get_many_from_array(&self, pos: usize, count: usize) -> Result<Vec<Document>> {
        let children = self
            .datatype
            .read(|s| s.get_many_from_array(&self.node, pos, count))??;
        Ok(children.into_iter().map(|c| self.at(c)).collect())
    }

    /// Cursor on the parent, or `None` at the root.
    pub fn get_parent_document(&self) -> Result<Option<Document>> {
        let parent = self.datatype.read(|s| s.get_parent_document(&self.node))??;
        Ok(parent.map(|p| self.at(p)))
    }

    pub fn get_root_document(&self) -> Document {
        self.at(Timestamp::head())
    }

    pub fn get_document_type(&self) -> Result<DocumentType> {
        self.datatype.read(|s| s.get_document_type(&self.node))?
    }

    /// Whether the node is no longer reachable from the root.
    pub fn is_garbage(&self) -> Result<bool> {
        self.datatype.read(|s| s.is_garbage(&self.node))
    }

    /// JSON value of the subtree under the cursor.
    pub fn to_json(&self) -> Result<Json> {
        self.datatype.read(|s| s.to_json_at(&self.node))?
    }
}
