//! Nodes of the document arena.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::DocumentType;
use crate::{
    crdt::{TimedList, TimedMap},
    types::Timestamp,
};

/// Payload of a document node. Containers hold the keys of their children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub(crate) enum NodeKind {
    Element(Json),
    Object(TimedMap<Timestamp>),
    Array(TimedList<Timestamp>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DocNode {
    /// Creation timestamp, also the node's arena key
    pub key: Timestamp,
    /// Timestamp of the operation that deleted or replaced this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedence: Option<Timestamp>,
    /// `None` only for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Timestamp>,
    #[serde(default)]
    pub deleted: bool,
    pub kind: NodeKind,
}

impl DocNode {
    pub fn new(key: Timestamp, parent: Timestamp, kind: NodeKind) -> Self {
        Self {
            key,
            precedence: None,
            parent: Some(parent),
            deleted: false,
            kind,
        }
    }

    pub fn root() -> Self {
        Self {
            key: Timestamp::head(),
            precedence: None,
            parent: None,
            deleted: false,
            kind: NodeKind::Object(TimedMap::new()),
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self.kind {
            NodeKind::Element(_) => DocumentType::Element,
            NodeKind::Object(_) => DocumentType::Object,
            NodeKind::Array(_) => DocumentType::Array,
        }
    }

    pub fn is_container(&self) -> bool {
        !matches!(self.kind, NodeKind::Element(_))
    }

    /// Mark as deleted by the operation at `ts`. Precedence only moves forward.
    /// Returns `true` the first time the node is deleted.
    pub fn mark_deleted(&mut self, ts: Timestamp) -> bool {
        self.precedence = Some(self.precedence.map_or(ts, |p| p.max(ts)));
        !std::mem::replace(&mut self.deleted, true)
    }
}
