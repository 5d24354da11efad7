//! Operations exchanged between replicas.
//!
//! Every operation is an [`OperationId`] plus one [`OpBody`] variant. Local
//! operations address list elements by position; once executed they are
//! annotated with the target timestamps they resolved to, so a remote replica
//! can replay them without depending on its own positions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::types::{DatatypeType, OperationId, Timestamp};

/// A single replicated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub body: OpBody,
}

/// The closed set of operation kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpBody {
    /// Full snapshot state replacing the replica's snapshot
    Snapshot { state: Json },
    /// Marks the start of a user transaction of `num_of_ops` operations
    Transaction { tag: String, num_of_ops: u32 },
    /// Error reported by the server, see [`crate::Error::from_code`]
    Error { code: u32, msg: String },

    Increase { delta: i32 },

    Put { key: String, value: Json },
    Remove { key: String },

    Insert {
        pos: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Timestamp>,
        values: Vec<Json>,
    },
    Delete {
        pos: usize,
        num_of_nodes: usize,
        #[serde(default)]
        targets: Vec<Timestamp>,
    },
    Update {
        pos: usize,
        #[serde(default)]
        targets: Vec<Timestamp>,
        values: Vec<Json>,
    },

    DocPut {
        parent: Timestamp,
        key: String,
        value: Json,
    },
    DocRemove {
        parent: Timestamp,
        key: String,
    },
    DocInsert {
        parent: Timestamp,
        pos: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Timestamp>,
        values: Vec<Json>,
    },
    DocDelete {
        parent: Timestamp,
        pos: usize,
        num_of_nodes: usize,
        #[serde(default)]
        targets: Vec<Timestamp>,
    },
    DocUpdate {
        parent: Timestamp,
        pos: usize,
        #[serde(default)]
        targets: Vec<Timestamp>,
        values: Vec<Json>,
    },
}

impl OpBody {
    pub fn name(&self) -> &'static str {
        match self {
            OpBody::Snapshot { .. } => "snapshot",
            OpBody::Transaction { .. } => "transaction",
            OpBody::Error { .. } => "error",
            OpBody::Increase { .. } => "increase",
            OpBody::Put { .. } => "put",
            OpBody::Remove { .. } => "remove",
            OpBody::Insert { .. } => "insert",
            OpBody::Delete { .. } => "delete",
            OpBody::Update { .. } => "update",
            OpBody::DocPut { .. } => "doc_put",
            OpBody::DocRemove { .. } => "doc_remove",
            OpBody::DocInsert { .. } => "doc_insert",
            OpBody::DocDelete { .. } => "doc_delete",
            OpBody::DocUpdate { .. } => "doc_update",
        }
    }

    /// The datatype this body mutates, or `None` for protocol bodies.
    pub fn datatype_type(&self) -> Option<DatatypeType> {
        match self {
            OpBody::Snapshot { .. } | OpBody::Transaction { .. } | OpBody::Error { .. } => None,
            OpBody::Increase { .. } => Some(DatatypeType::Counter),
            OpBody::Put { .. } | OpBody::Remove { .. } => Some(DatatypeType::Map),
            OpBody::Insert { .. } | OpBody::Delete { .. } | OpBody::Update { .. } => {
                Some(DatatypeType::List)
            }
            OpBody::DocPut { .. }
            | OpBody::DocRemove { .. }
            | OpBody::DocInsert { .. }
            | OpBody::DocDelete { .. }
            | OpBody::DocUpdate { .. } => Some(DatatypeType::Document),
        }
    }
}

impl Operation {
    pub fn new(id: OperationId, body: OpBody) -> Self {
        Self { id, body }
    }

    /// The timestamp that orders this operation's effects.
    pub fn timestamp(&self) -> Timestamp {
        self.id.timestamp()
    }

    pub fn is_snapshot(&self) -> bool {
        matches!(self.body, OpBody::Snapshot { .. })
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self.body, OpBody::Transaction { .. })
    }

    /// The embedded error of an [`OpBody::Error`] operation.
    pub fn to_error(&self) -> Option<crate::Error> {
        match &self.body {
            OpBody::Error { code, msg } => Some(crate::Error::from_code(*code, msg)),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.body.name(), self.id)
    }
}
