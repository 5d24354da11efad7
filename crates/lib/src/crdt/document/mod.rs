//! Document snapshot: a JSON tree of objects, arrays and elements.
//!
//! All nodes of a document live in one arena keyed by their creation
//! timestamp; parent and child links are arena keys. The root is an object at
//! [`Timestamp::head`].
//!
//! Objects resolve conflicts like the map snapshot and arrays like the list
//! snapshot, with child node keys as values. A replaced or deleted container
//! is moved to the cemetery and stays addressable, so operations issued
//! concurrently against its subtree still apply (invisibly). Replaced or
//! deleted elements are evicted since nothing can reference them.
//!
//! Nested JSON values are expanded depth-first into nodes whose keys share the
//! operation timestamp with increasing delimiters.

mod node;

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::trace;

use node::{DocNode, NodeKind};

use super::{Snapshot, TimedList, TimedMap, UpdateOutcome, unexpected_operation};
use crate::{
    Result,
    datatypes::DatatypeError,
    operations::{OpBody, Operation},
    types::{DatatypeType, Timestamp},
};

/// The kind of a document node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Element,
    Object,
    Array,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentType::Element => f.write_str("element"),
            DocumentType::Object => f.write_str("object"),
            DocumentType::Array => f.write_str("array"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DocumentState", into = "DocumentState")]
pub struct DocumentSnapshot {
    nodes: HashMap<Timestamp, DocNode>,
    cemetery: BTreeSet<Timestamp>,
}

/// Wire form of a document: nodes sorted by key.
#[derive(Serialize, Deserialize)]
struct DocumentState {
    nodes: Vec<DocNode>,
    #[serde(default)]
    cemetery: Vec<Timestamp>,
}

impl From<DocumentSnapshot> for DocumentState {
    fn from(doc: DocumentSnapshot) -> Self {
        let mut nodes: Vec<DocNode> = doc.nodes.into_values().collect();
        nodes.sort_by_key(|n| n.key);
        DocumentState {
            nodes,
            cemetery: doc.cemetery.into_iter().collect(),
        }
    }
}

impl TryFrom<DocumentState> for DocumentSnapshot {
    type Error = String;

    fn try_from(state: DocumentState) -> std::result::Result<Self, Self::Error> {
        let mut nodes = HashMap::with_capacity(state.nodes.len());
        for node in state.nodes {
            if nodes.insert(node.key, node).is_some() {
                return Err("duplicate document node".to_string());
            }
        }
        match nodes.get(&Timestamp::head()) {
            Some(root) if matches!(root.kind, NodeKind::Object(_)) => {}
            _ => return Err("document root must be an object".to_string()),
        }
        if let Some(missing) = state.cemetery.iter().find(|k| !nodes.contains_key(k)) {
            return Err(format!("cemetery references unknown node {missing}"));
        }
        Ok(DocumentSnapshot {
            nodes,
            cemetery: state.cemetery.into_iter().collect(),
        })
    }
}

impl Default for DocumentSnapshot {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(Timestamp::head(), DocNode::root());
        Self {
            nodes,
            cemetery: BTreeSet::new(),
        }
    }
}

fn invalid_parent(key: &Timestamp) -> crate::Error {
    DatatypeError::InvalidParent {
        reason: format!("no document node {key}"),
    }
    .into()
}

fn wrong_kind(key: &Timestamp, expected: DocumentType, actual: DocumentType) -> crate::Error {
    DatatypeError::illegal_operation(format!("node {key} is {actual}, expected {expected}")).into()
}

impl DocumentSnapshot {
    fn node(&self, key: &Timestamp) -> Result<&DocNode> {
        self.nodes.get(key).ok_or_else(|| invalid_parent(key))
    }

    fn object(&self, key: &Timestamp) -> Result<&TimedMap<Timestamp>> {
        let node = self.node(key)?;
        match &node.kind {
            NodeKind::Object(map) => Ok(map),
            _ => Err(wrong_kind(key, DocumentType::Object, node.document_type())),
        }
    }

    fn object_mut(&mut self, key: &Timestamp) -> Result<&mut TimedMap<Timestamp>> {
        let node = self.nodes.get_mut(key).ok_or_else(|| invalid_parent(key))?;
        let actual = node.document_type();
        match &mut node.kind {
            NodeKind::Object(map) => Ok(map),
            _ => Err(wrong_kind(key, DocumentType::Object, actual)),
        }
    }

    fn array(&self, key: &Timestamp) -> Result<&TimedList<Timestamp>> {
        let node = self.node(key)?;
        match &node.kind {
            NodeKind::Array(list) => Ok(list),
            _ => Err(wrong_kind(key, DocumentType::Array, node.document_type())),
        }
    }

    fn array_mut(&mut self, key: &Timestamp) -> Result<&mut TimedList<Timestamp>> {
        let node = self.nodes.get_mut(key).ok_or_else(|| invalid_parent(key))?;
        let actual = node.document_type();
        match &mut node.kind {
            NodeKind::Array(list) => Ok(list),
            _ => Err(wrong_kind(key, DocumentType::Array, actual)),
        }
    }

    /// Expand `value` into nodes under `parent`, returning the new subtree root.
    fn create_nodes(
        &mut self,
        parent: Timestamp,
        value: &Json,
        cursor: &mut Timestamp,
    ) -> Result<Timestamp> {
        let key = cursor.next_delimiter();
        let kind = match value {
            Json::Object(fields) => {
                let mut map = TimedMap::new();
                for (field, child) in fields {
                    let child = self.create_nodes(key, child, cursor)?;
                    map.put(field, child, child);
                }
                NodeKind::Object(map)
            }
            Json::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    let child = self.create_nodes(key, item, cursor)?;
                    children.push((child, child));
                }
                let mut list = TimedList::new();
                list.insert_after(Timestamp::head(), children)?;
                NodeKind::Array(list)
            }
            scalar => NodeKind::Element(scalar.clone()),
        };
        self.nodes.insert(key, DocNode::new(key, parent, kind));
        Ok(key)
    }

    fn create_many(
        &mut self,
        parent: Timestamp,
        values: &[Json],
        ts: Timestamp,
    ) -> Result<Vec<(Timestamp, Timestamp)>> {
        let mut cursor = ts;
        let mut children = Vec::with_capacity(values.len());
        for value in values {
            let child = self.create_nodes(parent, value, &mut cursor)?;
            children.push((child, child));
        }
        Ok(children)
    }

    /// Delete the node at `key` on behalf of the operation at `ts`.
    fn delete_node(&mut self, key: Timestamp, ts: Timestamp) {
        let Some(node) = self.nodes.get_mut(&key) else {
            return;
        };
        let first = node.mark_deleted(ts);
        if !node.is_container() {
            self.nodes.remove(&key);
        } else if first {
            trace!(node = %key, "moving node to cemetery");
            self.cemetery.insert(key);
        }
    }

    fn node_json(&self, key: &Timestamp) -> Json {
        let Some(node) = self.nodes.get(key) else {
            return Json::Null;
        };
        match &node.kind {
            NodeKind::Element(value) => value.clone(),
            NodeKind::Object(map) => Json::Object(
                map.iter()
                    .map(|(field, child)| (field.to_string(), self.node_json(child)))
                    .collect(),
            ),
            NodeKind::Array(list) => Json::Array(list.iter().map(|c| self.node_json(c)).collect()),
        }
    }

    /// Put `value` under `key` in the object `parent`. Returns the replaced
    /// value when the put won.
    pub fn put_in_object(
        &mut self,
        parent: Timestamp,
        key: &str,
        value: &Json,
        ts: Timestamp,
    ) -> Result<Option<Json>> {
        self.object(&parent)?;
        let mut cursor = ts;
        let child = self.create_nodes(parent, value, &mut cursor)?;
        let outcome = self.object_mut(&parent)?.put(key, child, ts);
        let Some(loser) = outcome.removed else {
            return Ok(None);
        };
        let replaced = outcome.applied.then(|| self.node_json(&loser));
        let winner = match outcome.applied {
            true => ts,
            false => self.object(&parent)?.entry(key).map_or(ts, |e| e.ts),
        };
        self.delete_node(loser, winner);
        Ok(replaced)
    }

    /// Local remove of `key` from the object `parent`. Returns the removed value.
    pub fn remove_in_object(&mut self, parent: Timestamp, key: &str, ts: Timestamp) -> Result<Json> {
        let child = self.object_mut(&parent)?.remove_local(key, ts)?;
        let removed = self.node_json(&child);
        self.delete_node(child, ts);
        Ok(removed)
    }

    fn remove_in_object_remote(&mut self, parent: Timestamp, key: &str, ts: Timestamp) -> Result<()> {
        if let Some(child) = self.object_mut(&parent)?.remove_remote(key, ts) {
            self.delete_node(child, ts);
        }
        Ok(())
    }

    /// Local insert into the array `parent`. Returns the anchor inserted after.
    pub fn insert_in_array(
        &mut self,
        parent: Timestamp,
        pos: usize,
        values: &[Json],
        ts: Timestamp,
    ) -> Result<Timestamp> {
        if values.is_empty() {
            return Err(DatatypeError::illegal_parameters("nothing to insert").into());
        }
        let target = self.array(&parent)?.anchor_for_insert(pos)?;
        self.insert_after_in_array(parent, target, values, ts)?;
        Ok(target)
    }

    fn insert_after_in_array(
        &mut self,
        parent: Timestamp,
        target: Timestamp,
        values: &[Json],
        ts: Timestamp,
    ) -> Result<()> {
        if self.array(&parent)?.is_tomb(&target).is_none() {
            return Err(DatatypeError::NoTarget {
                reason: format!("no array element {target} in {parent}"),
            }
            .into());
        }
        let children = self.create_many(parent, values, ts)?;
        self.array_mut(&parent)?.insert_after(target, children)?;
        Ok(())
    }

    /// Local delete from the array `parent`. Returns targets and removed values.
    pub fn delete_in_array(
        &mut self,
        parent: Timestamp,
        pos: usize,
        num_of_nodes: usize,
        ts: Timestamp,
    ) -> Result<(Vec<Timestamp>, Vec<Json>)> {
        let removed = self.array_mut(&parent)?.delete_at(pos, num_of_nodes, ts)?;
        let mut targets = Vec::with_capacity(removed.len());
        let mut values = Vec::with_capacity(removed.len());
        for (target, child) in removed {
            values.push(self.node_json(&child));
            self.delete_node(child, ts);
            targets.push(target);
        }
        Ok((targets, values))
    }

    fn delete_in_array_remote(
        &mut self,
        parent: Timestamp,
        targets: &[Timestamp],
        ts: Timestamp,
    ) -> Result<()> {
        let removed = self.array_mut(&parent)?.delete_targets(targets, ts)?;
        for child in removed.into_iter().flatten() {
            self.delete_node(child, ts);
        }
        Ok(())
    }

    /// Local update in the array `parent`. Returns targets and previous values.
    pub fn update_in_array(
        &mut self,
        parent: Timestamp,
        pos: usize,
        values: &[Json],
        ts: Timestamp,
    ) -> Result<(Vec<Timestamp>, Vec<Json>)> {
        let array = self.array(&parent)?;
        if values.is_empty() || pos.saturating_add(values.len()) > array.len() {
            return Err(DatatypeError::illegal_parameters(format!(
                "cannot update {} values at {pos} in array of {}",
                values.len(),
                array.len()
            ))
            .into());
        }
        let targets = (pos..pos + values.len())
            .map(|i| array.target_at(i))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DatatypeError::corruption("array size out of sync"))?;
        let previous = self.update_targets_in_array(parent, &targets, values, ts)?;
        let previous = previous
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DatatypeError::corruption("local update lost"))?;
        Ok((targets, previous))
    }

    fn update_targets_in_array(
        &mut self,
        parent: Timestamp,
        targets: &[Timestamp],
        values: &[Json],
        ts: Timestamp,
    ) -> Result<Vec<Option<Json>>> {
        let array = self.array(&parent)?;
        if targets.len() != values.len() {
            return Err(DatatypeError::illegal_parameters(format!(
                "{} targets for {} values",
                targets.len(),
                values.len()
            ))
            .into());
        }
        if let Some(missing) = targets
            .iter()
            .find(|t| t.is_head() || array.is_tomb(t).is_none())
        {
            return Err(DatatypeError::NoTarget {
                reason: format!("no array element {missing} in {parent}"),
            }
            .into());
        }
        let children = self.create_many(parent, values, ts)?;
        let outcomes = self.array_mut(&parent)?.update_targets(targets, children.clone())?;
        let mut previous = Vec::with_capacity(outcomes.len());
        for ((outcome, (stamp, _)), target) in outcomes.into_iter().zip(children).zip(targets) {
            match outcome {
                UpdateOutcome::Applied(old) => {
                    previous.push(Some(self.node_json(&old)));
                    self.delete_node(old, stamp);
                }
                UpdateOutcome::Rejected(new) => {
                    let winner = self.array(&parent)?.value_ts(target).unwrap_or(stamp);
                    previous.push(None);
                    self.delete_node(new, winner);
                }
            }
        }
        Ok(previous)
    }

    /// The root object.
    pub fn get_root_document(&self) -> Timestamp {
        Timestamp::head()
    }

    pub fn get_document_type(&self, node: &Timestamp) -> Result<DocumentType> {
        Ok(self.node(node)?.document_type())
    }

    /// Child of the object `node` stored under `key`.
    pub fn get_from_object(&self, node: &Timestamp, key: &str) -> Result<Option<Timestamp>> {
        Ok(self.object(node)?.get(key).copied())
    }

    /// Child of the array `node` at `pos`.
    pub fn get_from_array(&self, node: &Timestamp, pos: usize) -> Result<Timestamp> {
        let array = self.array(node)?;
        array.get(pos).copied().ok_or_else(|| {
            DatatypeError::illegal_parameters(format!(
                "position {pos} out of bounds for array of {}",
                array.len()
            ))
            .into()
        })
    }

    pub fn get_many_from_array(
        &self,
        node: &Timestamp,
        pos: usize,
        count: usize,
    ) -> Result<Vec<Timestamp>> {
        Ok(self.array(node)?.get_many(pos, count)?)
    }

    /// Parent of `node`, or `None` for the root.
    pub fn get_parent_document(&self, node: &Timestamp) -> Result<Option<Timestamp>> {
        Ok(self.node(node)?.parent)
    }

    /// Whether `node` is unreachable from the root: deleted itself, below a
    /// deleted ancestor, or already evicted.
    pub fn is_garbage(&self, node: &Timestamp) -> bool {
        let mut cursor = *node;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(&cursor) {
                None => return true,
                Some(n) if n.deleted => return true,
                Some(n) => match n.parent {
                    None => return false,
                    Some(parent) => cursor = parent,
                },
            }
        }
        true
    }

    /// JSON value of the subtree at `node`.
    pub fn to_json_at(&self, node: &Timestamp) -> Result<Json> {
        self.node(node)?;
        Ok(self.node_json(node))
    }

    /// Timestamp of the operation that deleted or replaced `node`.
    pub fn precedence(&self, node: &Timestamp) -> Option<Timestamp> {
        self.nodes.get(node).and_then(|n| n.precedence)
    }

    /// Deleted containers still kept in the arena.
    pub fn cemetery(&self) -> impl Iterator<Item = &Timestamp> {
        self.cemetery.iter()
    }

    pub fn contains(&self, node: &Timestamp) -> bool {
        self.nodes.contains_key(node)
    }
}

impl Snapshot for DocumentSnapshot {
    const TYPE: DatatypeType = DatatypeType::Document;

    fn execute_remote(&mut self, op: &Operation) -> Result<()> {
        let ts = op.timestamp();
        match &op.body {
            OpBody::DocPut { parent, key, value } => {
                self.put_in_object(*parent, key, value, ts)?;
            }
            OpBody::DocRemove { parent, key } => {
                self.remove_in_object_remote(*parent, key, ts)?;
            }
            OpBody::DocInsert {
                parent,
                target,
                values,
                ..
            } => {
                let target = target.ok_or_else(|| DatatypeError::NoTarget {
                    reason: "insert without target".into(),
                })?;
                self.insert_after_in_array(*parent, target, values, ts)?;
            }
            OpBody::DocDelete {
                parent, targets, ..
            } => {
                self.delete_in_array_remote(*parent, targets, ts)?;
            }
            OpBody::DocUpdate {
                parent,
                targets,
                values,
                ..
            } => {
                self.update_targets_in_array(*parent, targets, values, ts)?;
            }
            _ => return Err(unexpected_operation(Self::TYPE, op)),
        }
        Ok(())
    }

    fn to_json(&self) -> Json {
        self.node_json(&Timestamp::head())
    }
}
